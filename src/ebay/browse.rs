#![allow(non_snake_case)]

use crate::ebay::config::EbayEndpoints;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use serde_with::{DisplayFromStr, PickFirst, serde_as};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EbayBrowseError {
    #[error("browse request failed: {0}")]
    Request(String),
    #[error("browse rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
    #[error("invalid browse response: {0}")]
    Deserialize(String),
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct Amount {
    #[serde_as(as = "PickFirst<(DisplayFromStr, _)>")]
    pub value: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategoryRef {
    pub categoryId: String,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct SellerSummary {
    #[serde(default)]
    pub username: Option<String>,
    #[serde_as(as = "Option<PickFirst<(DisplayFromStr, _)>>")]
    pub feedbackPercentage: Option<f64>,
    #[serde(default)]
    pub feedbackScore: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalizedAspect {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

/// One entry of `itemSummaries` from `item_summary/search`.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemSummary {
    pub itemId: String,
    pub title: String,
    #[serde(default)]
    pub price: Option<Amount>,
    #[serde(default)]
    pub currentBidPrice: Option<Amount>,
    #[serde(default)]
    pub buyingOptions: Vec<String>,
    #[serde(default)]
    pub itemWebUrl: Option<String>,
    #[serde(default)]
    pub categories: Vec<CategoryRef>,
    #[serde(default)]
    pub leafCategoryIds: Vec<String>,
    #[serde(default)]
    pub seller: Option<SellerSummary>,
    #[serde(default)]
    pub shippingOptions: Option<Value>,
    #[serde(default)]
    pub shortDescription: Option<String>,
    #[serde(default)]
    pub localizedAspects: Vec<LocalizedAspect>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    itemSummaries: Vec<Value>,
}

/// Item detail from `item/{id}`; only the fields the extractor consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemDetail {
    #[serde(default)]
    pub localizedAspects: Vec<LocalizedAspect>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub shortDescription: Option<String>,
    #[serde(default)]
    pub shippingOptions: Option<Value>,
}

/// Raw item summaries; each entry is parsed separately so one malformed item cannot
/// sink the page.
pub async fn search_item_summaries(
    client: &Client,
    endpoints: &EbayEndpoints,
    access_token: &str,
    query_string: &str,
) -> Result<Vec<Value>, EbayBrowseError> {
    let url = format!("{}?{}", endpoints.search_url(), query_string);
    let response = client
        .get(url)
        .bearer_auth(access_token)
        .header("X-EBAY-C-MARKETPLACE-ID", endpoints.marketplace_id.as_str())
        .send()
        .await
        .map_err(|err| EbayBrowseError::Request(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EbayBrowseError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    let payload: SearchResponse = response
        .json()
        .await
        .map_err(|err| EbayBrowseError::Deserialize(err.to_string()))?;
    Ok(payload.itemSummaries)
}

pub async fn get_item(
    client: &Client,
    endpoints: &EbayEndpoints,
    access_token: &str,
    item_id: &str,
) -> Result<ItemDetail, EbayBrowseError> {
    let response = client
        .get(endpoints.item_url(item_id))
        .bearer_auth(access_token)
        .header("X-EBAY-C-MARKETPLACE-ID", endpoints.marketplace_id.as_str())
        .send()
        .await
        .map_err(|err| EbayBrowseError::Request(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EbayBrowseError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<ItemDetail>()
        .await
        .map_err(|err| EbayBrowseError::Deserialize(err.to_string()))
}
