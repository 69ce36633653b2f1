use crate::credentials::{CallOutcome, CredentialPool, RotationStrategy, classify_failure};
use crate::ebay::browse::{ItemSummary, LocalizedAspect, get_item, search_item_summaries};
use crate::ebay::{EbayAuthError, EbayBrowseError};
use crate::models::{ItemSpecs, ListingFormat, ListingItem};
use crate::query::QuerySpec;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const NO_CREDENTIALS: &str = "no marketplace credentials configured";

#[derive(Debug, Error)]
pub enum SearchFailure {
    #[error("credential `{label}` is rate limited")]
    RateLimited { label: String },
    #[error("credential `{label}` failed authentication: {message}")]
    AuthError { label: String, message: String },
    #[error("search transport error: {0}")]
    Transport(String),
    #[error("malformed search response: {0}")]
    Parse(String),
}

/// Result of driving one query across the credential pool.
#[derive(Debug)]
pub enum FailoverOutcome {
    Success {
        items: Vec<ListingItem>,
        credential: String,
    },
    AllRateLimited,
    AuthErrors(Vec<String>),
    Failed(String),
}

impl FailoverOutcome {
    pub fn message(&self) -> String {
        match self {
            FailoverOutcome::Success { items, credential } => {
                format!("fetched {} items with credential `{credential}`", items.len())
            }
            FailoverOutcome::AllRateLimited => {
                concat!(
                    "every marketplace credential is rate limited; ",
                    "wait for the daily quota reset or add credentials"
                )
                .to_string()
            }
            FailoverOutcome::AuthErrors(labels) => format!(
                "marketplace authentication failed for {}; check the app id and secret",
                labels.join(", ")
            ),
            FailoverOutcome::Failed(message) => format!("marketplace search failed: {message}"),
        }
    }
}

fn specs_from_aspects(aspects: &[LocalizedAspect]) -> ItemSpecs {
    aspects
        .iter()
        .filter(|a| !a.value.trim().is_empty())
        .map(|a| (a.name.trim().to_lowercase(), a.value.trim().to_string()))
        .collect()
}

/// Converts one Browse item summary; `None` when it carries no usable price.
pub fn listing_from_summary(summary: ItemSummary) -> Option<ListingItem> {
    let amount = summary.price.or(summary.currentBidPrice)?;
    if !amount.value.is_finite() || amount.value < 0.0 {
        return None;
    }
    let mut category_ids: Vec<String> = summary.leafCategoryIds.clone();
    for category in &summary.categories {
        if !category_ids.contains(&category.categoryId) {
            category_ids.push(category.categoryId.clone());
        }
    }
    let (seller_username, seller_feedback_pct, seller_feedback_score) = summary
        .seller
        .map(|s| (s.username, s.feedbackPercentage, s.feedbackScore))
        .unwrap_or((None, None, None));
    Some(ListingItem {
        listing_id: summary.itemId,
        title: summary.title,
        price: amount.value,
        currency: amount.currency.unwrap_or_else(|| "USD".to_string()),
        url: summary.itemWebUrl,
        format: ListingFormat::from_buying_options(&summary.buyingOptions),
        seller_username,
        seller_feedback_pct,
        seller_feedback_score,
        category_ids,
        specs: specs_from_aspects(&summary.localizedAspects),
        description: summary.shortDescription,
        shipping: summary.shippingOptions.unwrap_or(Value::Null),
    })
}

fn parse_items(raw: Vec<Value>, label: &str) -> Vec<ListingItem> {
    raw.into_iter()
        .filter_map(|value| {
            let item_id = value
                .get("itemId")
                .and_then(Value::as_str)
                .unwrap_or("<unknown>")
                .to_string();
            match serde_json::from_value::<ItemSummary>(value) {
                Ok(summary) => {
                    let parsed = listing_from_summary(summary);
                    if parsed.is_none() {
                        warn!(
                            target = "scout.ebay",
                            label,
                            item_id = %item_id,
                            "item_without_price_skipped"
                        );
                    }
                    parsed
                }
                Err(err) => {
                    warn!(
                        target = "scout.ebay",
                        label,
                        item_id = %item_id,
                        error = %err,
                        "malformed_item_skipped"
                    );
                    None
                }
            }
        })
        .collect()
}

fn within_allow_list(item: &ListingItem, allowed: &[String]) -> bool {
    allowed.is_empty()
        || item.category_ids.is_empty()
        || item.category_ids.iter().any(|id| allowed.contains(id))
}

fn auth_failure(label: &str, err: &EbayAuthError) -> (CallOutcome, SearchFailure) {
    let outcome = match err {
        EbayAuthError::MissingCredentials(_) => CallOutcome::AuthError,
        EbayAuthError::Request(_) => CallOutcome::Failure,
        EbayAuthError::Rejected { status, body } => classify_failure(Some(*status), body),
    };
    (outcome, failure_for(label, outcome, err.to_string()))
}

fn browse_failure(label: &str, err: &EbayBrowseError) -> (CallOutcome, SearchFailure) {
    match err {
        EbayBrowseError::Rejected { status, body } => {
            let outcome = classify_failure(Some(*status), body);
            (outcome, failure_for(label, outcome, err.to_string()))
        }
        EbayBrowseError::Request(message) => {
            (CallOutcome::Failure, SearchFailure::Transport(message.clone()))
        }
        EbayBrowseError::Deserialize(message) => {
            (CallOutcome::Failure, SearchFailure::Parse(message.clone()))
        }
    }
}

fn failure_for(label: &str, outcome: CallOutcome, message: String) -> SearchFailure {
    match outcome {
        CallOutcome::RateLimited => SearchFailure::RateLimited {
            label: label.to_string(),
        },
        CallOutcome::AuthError => SearchFailure::AuthError {
            label: label.to_string(),
            message,
        },
        CallOutcome::Success | CallOutcome::Failure => SearchFailure::Transport(message),
    }
}

#[derive(Clone)]
pub struct SearchExecutor {
    pool: CredentialPool,
    fetch_details: bool,
}

impl SearchExecutor {
    pub fn new(pool: CredentialPool, fetch_details: bool) -> Self {
        Self {
            pool,
            fetch_details,
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    /// One search call with one credential. The outcome is always reported to the pool.
    pub async fn search(
        &self,
        spec: &QuerySpec,
        label: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ListingItem>, SearchFailure> {
        let token = match self.pool.access_token(label, now).await {
            Ok(token) => token,
            Err(err) => {
                let (outcome, failure) = auth_failure(label, &err);
                self.pool.record_outcome(label, outcome, now).await;
                return Err(failure);
            }
        };

        let query_string = spec.to_query_string();
        debug!(target = "scout.ebay", label, query = %query_string, "search_request");
        let raw = match search_item_summaries(
            self.pool.http(),
            self.pool.endpoints(),
            &token,
            &query_string,
        )
        .await
        {
            Ok(raw) => raw,
            Err(err) => {
                let (outcome, failure) = browse_failure(label, &err);
                self.pool.record_outcome(label, outcome, now).await;
                return Err(failure);
            }
        };
        self.pool
            .record_outcome(label, CallOutcome::Success, now)
            .await;

        let received = raw.len();
        let mut items: Vec<ListingItem> = parse_items(raw, label)
            .into_iter()
            .filter(|item| {
                let keep = within_allow_list(item, &spec.allowed_categories);
                if !keep {
                    debug!(
                        target = "scout.ebay",
                        listing_id = %item.listing_id,
                        categories = ?item.category_ids,
                        "item_outside_category_dropped"
                    );
                }
                keep
            })
            .collect();

        if self.fetch_details {
            for item in items.iter_mut().filter(|item| item.specs.is_empty()) {
                self.fill_details(item, &token).await;
            }
        }

        info!(
            target = "scout.ebay",
            label,
            keywords = %spec.keywords,
            received,
            kept = items.len(),
            "search_completed"
        );
        Ok(items)
    }

    async fn fill_details(&self, item: &mut ListingItem, token: &str) {
        match get_item(self.pool.http(), self.pool.endpoints(), token, &item.listing_id).await {
            Ok(detail) => {
                item.specs.extend(specs_from_aspects(&detail.localizedAspects));
                if let Some(description) = detail.description.or(detail.shortDescription) {
                    item.description = Some(description);
                }
                if item.shipping.is_null()
                    && let Some(shipping) = detail.shippingOptions
                {
                    item.shipping = shipping;
                }
            }
            Err(err) => {
                warn!(
                    target = "scout.ebay",
                    listing_id = %item.listing_id,
                    error = %err,
                    "item_detail_failed"
                );
            }
        }
    }

    /// Tries credentials in strategy order until one succeeds. `failed` carries the
    /// labels that already failed earlier in the same task cycle and is extended with
    /// every credential that fails here.
    pub async fn run_with_failover(
        &self,
        spec: &QuerySpec,
        strategy: RotationStrategy,
        failed: &mut HashSet<String>,
        now: DateTime<Utc>,
    ) -> FailoverOutcome {
        if self.pool.len().await == 0 {
            return FailoverOutcome::Failed(NO_CREDENTIALS.to_string());
        }

        let mut attempts = 0usize;
        let mut rate_limited = 0usize;
        let mut auth_errors = Vec::new();
        let mut last_error: Option<String> = None;

        while let Some(credential) = self.pool.select(strategy, failed, now).await {
            attempts += 1;
            match self.search(spec, &credential.label, now).await {
                Ok(items) => {
                    return FailoverOutcome::Success {
                        items,
                        credential: credential.label,
                    };
                }
                Err(err) => {
                    warn!(
                        target = "scout.credentials",
                        label = %credential.label,
                        error = %err,
                        "credential_failed_trying_next"
                    );
                    match err {
                        SearchFailure::RateLimited { .. } => rate_limited += 1,
                        SearchFailure::AuthError { label, .. } => auth_errors.push(label),
                        other => last_error = Some(other.to_string()),
                    }
                    failed.insert(credential.label);
                }
            }
        }

        if attempts > 0 && rate_limited == attempts {
            FailoverOutcome::AllRateLimited
        } else if !auth_errors.is_empty() {
            FailoverOutcome::AuthErrors(auth_errors)
        } else if attempts == 0 {
            FailoverOutcome::AllRateLimited
        } else {
            let message = last_error.unwrap_or_else(|| "every credential failed".to_string());
            FailoverOutcome::Failed(message)
        }
    }
}
