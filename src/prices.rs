use crate::http::build_client;
use crate::models::MetalType;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum PriceFeedError {
    #[error("price feed request failed: {0}")]
    Request(String),
    #[error("invalid price feed payload: {0}")]
    Deserialize(String),
}

/// Current USD-per-gram spot prices.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpotPrices {
    #[serde(default)]
    pub gold: Option<f64>,
    #[serde(default)]
    pub silver: Option<f64>,
    #[serde(default)]
    pub platinum: Option<f64>,
    #[serde(default)]
    pub palladium: Option<f64>,
}

impl SpotPrices {
    pub fn usd_per_gram(&self, metal: MetalType) -> Option<f64> {
        let price = match metal {
            MetalType::Gold => self.gold,
            MetalType::Silver => self.silver,
            MetalType::Platinum => self.platinum,
            MetalType::Palladium => self.palladium,
        };
        price.filter(|p| *p > 0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.gold.is_none()
            && self.silver.is_none()
            && self.platinum.is_none()
            && self.palladium.is_none()
    }
}

#[async_trait]
pub trait SpotPriceSource: Send + Sync {
    async fn current(&self) -> Result<SpotPrices, PriceFeedError>;
}

/// Prices pinned through `SPOT_<METAL>_USD_PER_GRAM`.
#[derive(Debug, Clone)]
pub struct StaticSpotPrices(pub SpotPrices);

impl StaticSpotPrices {
    pub fn from_env() -> Self {
        let read = |metal: &str| {
            std::env::var(format!("SPOT_{metal}_USD_PER_GRAM"))
                .ok()
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|v| *v > 0.0)
        };
        Self(SpotPrices {
            gold: read("GOLD"),
            silver: read("SILVER"),
            platinum: read("PLATINUM"),
            palladium: read("PALLADIUM"),
        })
    }
}

#[async_trait]
impl SpotPriceSource for StaticSpotPrices {
    async fn current(&self) -> Result<SpotPrices, PriceFeedError> {
        Ok(self.0.clone())
    }
}

/// JSON feed shaped like `SpotPrices`, refreshed at most once per `ttl`.
pub struct HttpSpotPriceFeed {
    url: String,
    ttl: Duration,
    http: Client,
    cached: Arc<Mutex<Option<(Instant, SpotPrices)>>>,
}

impl HttpSpotPriceFeed {
    pub fn new(url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            url: url.into(),
            ttl,
            http: build_client(),
            cached: Arc::new(Mutex::new(None)),
        }
    }

    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SPOT_PRICE_FEED_URL").ok()?;
        Some(Self::new(url, Duration::from_secs(24 * 60 * 60)))
    }

    async fn fetch(&self) -> Result<SpotPrices, PriceFeedError> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|err| PriceFeedError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(PriceFeedError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }
        response
            .json::<SpotPrices>()
            .await
            .map_err(|err| PriceFeedError::Deserialize(err.to_string()))
    }
}

#[async_trait]
impl SpotPriceSource for HttpSpotPriceFeed {
    async fn current(&self) -> Result<SpotPrices, PriceFeedError> {
        let mut guard = self.cached.lock().await;
        if let Some((fetched_at, prices)) = guard.as_ref()
            && fetched_at.elapsed() < self.ttl
        {
            return Ok(prices.clone());
        }
        match self.fetch().await {
            Ok(prices) => {
                info!(
                    target = "scout.prices",
                    gold = ?prices.gold,
                    silver = ?prices.silver,
                    "spot_prices_refreshed"
                );
                *guard = Some((Instant::now(), prices.clone()));
                Ok(prices)
            }
            Err(err) => {
                // Fall back to the last quote.
                if let Some((_, prices)) = guard.as_ref() {
                    warn!(
                        target = "scout.prices",
                        error = %err,
                        "spot_price_refresh_failed_using_stale"
                    );
                    return Ok(prices.clone());
                }
                Err(err)
            }
        }
    }
}
