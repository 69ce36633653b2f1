use crate::models::{ExtractedAttributes, ListingItem, Match, MatchStatus};
use crate::store::{MatchStore, StoreError};
use crate::valuation::Valuation;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Inserted(Match),
    Duplicate,
}

pub fn build_match(
    task_id: &str,
    item: &ListingItem,
    attributes: &ExtractedAttributes,
    valuation: &Valuation,
    found_at: DateTime<Utc>,
) -> Match {
    Match {
        id: Uuid::new_v4(),
        task_id: task_id.to_string(),
        listing_id: item.listing_id.clone(),
        title: item.title.clone(),
        url: item.url.clone(),
        price: item.price,
        currency: item.currency.clone(),
        format: item.format,
        karat: attributes.karat,
        weight_g: attributes.weight_g,
        metal: attributes.metal,
        purity: attributes.purity,
        shipping_cost: attributes.shipping_cost,
        shipping_type: attributes.shipping_type.clone(),
        spot_price_per_gram: valuation.spot_price_per_gram,
        melt_value: valuation.melt_value,
        total_cost: valuation.total_cost,
        margin: valuation.margin,
        status: MatchStatus::New,
        found_at,
    }
}

/// Writes matches keyed by (task_id, listing_id). Callers check `is_known` before doing
/// the per-item work; a unique-key conflict on insert is folded into `Duplicate`.
#[derive(Clone)]
pub struct MatchPersister {
    store: Arc<dyn MatchStore>,
}

impl MatchPersister {
    pub fn new(store: Arc<dyn MatchStore>) -> Self {
        Self { store }
    }

    pub async fn is_known(&self, task_id: &str, listing_id: &str) -> Result<bool, StoreError> {
        self.store.match_exists(task_id, listing_id).await
    }

    pub async fn persist(&self, record: Match) -> Result<PersistOutcome, StoreError> {
        match self.store.insert_match(&record).await {
            Ok(()) => Ok(PersistOutcome::Inserted(record)),
            Err(StoreError::Conflict { task_id, listing_id }) => {
                debug!(
                    target = "scout.store",
                    %task_id,
                    %listing_id,
                    "insert_conflict_treated_as_duplicate"
                );
                Ok(PersistOutcome::Duplicate)
            }
            Err(err) => Err(err),
        }
    }
}
