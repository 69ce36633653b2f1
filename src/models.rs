use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Structured item specifics keyed by lowercased aspect name.
pub type ItemSpecs = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Watch,
    Jewelry,
    Gemstone,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Watch => "watch",
            ItemType::Jewelry => "jewelry",
            ItemType::Gemstone => "gemstone",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Active,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum TaskFilters {
    Jewelry(JewelryFilters),
    Watch(WatchFilters),
    Gemstone(GemstoneFilters),
}

impl TaskFilters {
    pub fn item_type(&self) -> ItemType {
        match self {
            TaskFilters::Jewelry(_) => ItemType::Jewelry,
            TaskFilters::Watch(_) => ItemType::Watch,
            TaskFilters::Gemstone(_) => ItemType::Gemstone,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JewelryFilters {
    #[serde(default)]
    pub metals: Vec<String>,
    #[serde(default)]
    pub purity: Vec<String>,
    #[serde(default)]
    pub main_stone: Vec<String>,
    #[serde(default)]
    pub brand: Vec<String>,
    #[serde(default = "default_true")]
    pub no_stone: bool,
}

impl Default for JewelryFilters {
    fn default() -> Self {
        Self {
            metals: Vec::new(),
            purity: Vec::new(),
            main_stone: Vec::new(),
            brand: Vec::new(),
            no_stone: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct WatchFilters {
    #[serde(default)]
    pub brand: Vec<String>,
    #[serde(default)]
    pub movement: Vec<String>,
    #[serde(default)]
    pub case_material: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GemstoneFilters {
    #[serde(default)]
    pub stone_types: Vec<String>,
    #[serde(default)]
    pub cut: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u32 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    pub filters: TaskFilters,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    /// Minutes between cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u32,
    #[serde(default)]
    pub exclude_keywords: Vec<String>,
    #[serde(default)]
    pub listing_formats: Vec<ListingFormat>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub category_id: Option<String>,
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

impl Task {
    pub fn item_type(&self) -> ItemType {
        self.filters.item_type()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Active {
            return false;
        }
        match self.last_run {
            None => true,
            Some(last) => last + Duration::minutes(i64::from(self.poll_interval)) <= now,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CredentialStatus {
    #[default]
    Active,
    RateLimited,
    AuthError,
    Error,
}

fn default_success_rate() -> f64 {
    100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub label: String,
    pub app_id: String,
    pub secret: String,
    #[serde(default)]
    pub status: CredentialStatus,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(default)]
    pub cached_token: Option<String>,
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(label: &str, app_id: &str, secret: &str) -> Self {
        Self {
            label: label.to_string(),
            app_id: app_id.to_string(),
            secret: secret.to_string(),
            status: CredentialStatus::Active,
            last_used: None,
            success_rate: default_success_rate(),
            cached_token: None,
            token_expiry: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ListingFormat {
    Auction,
    FixedPrice,
    BestOffer,
    Unknown,
}

impl ListingFormat {
    pub fn buying_option(&self) -> Option<&'static str> {
        match self {
            ListingFormat::Auction => Some("AUCTION"),
            ListingFormat::FixedPrice => Some("FIXED_PRICE"),
            ListingFormat::BestOffer => Some("BEST_OFFER"),
            ListingFormat::Unknown => None,
        }
    }

    /// Auction wins over fixed price; fixed price with offers enabled is `BestOffer`.
    pub fn from_buying_options(options: &[String]) -> Self {
        let has = |needle: &str| options.iter().any(|o| o.eq_ignore_ascii_case(needle));
        if has("AUCTION") {
            ListingFormat::Auction
        } else if has("FIXED_PRICE") && has("BEST_OFFER") {
            ListingFormat::BestOffer
        } else if has("FIXED_PRICE") {
            ListingFormat::FixedPrice
        } else {
            ListingFormat::Unknown
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListingItem {
    pub listing_id: String,
    pub title: String,
    pub price: f64,
    pub currency: String,
    pub url: Option<String>,
    pub format: ListingFormat,
    pub seller_username: Option<String>,
    pub seller_feedback_pct: Option<f64>,
    pub seller_feedback_score: Option<i64>,
    pub category_ids: Vec<String>,
    pub specs: ItemSpecs,
    pub description: Option<String>,
    /// Provider shipping payload, normalised later by the extractor.
    pub shipping: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetalType {
    #[default]
    Gold,
    Silver,
    Platinum,
    Palladium,
}

impl MetalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetalType::Gold => "gold",
            MetalType::Silver => "silver",
            MetalType::Platinum => "platinum",
            MetalType::Palladium => "palladium",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShippingCost {
    pub cost: f64,
    pub kind: String,
}

impl ShippingCost {
    pub fn unknown() -> Self {
        Self {
            cost: 0.0,
            kind: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedAttributes {
    pub karat: Option<u32>,
    pub weight_g: Option<f64>,
    pub metal: Option<MetalType>,
    /// Millesimal fineness for non-gold metals.
    pub purity: Option<u32>,
    pub shipping_cost: Option<f64>,
    pub shipping_type: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    #[default]
    New,
    Reviewed,
    Offered,
    Purchased,
    Passed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub id: Uuid,
    pub task_id: String,
    pub listing_id: String,
    pub title: String,
    pub url: Option<String>,
    pub price: f64,
    pub currency: String,
    pub format: ListingFormat,
    pub karat: Option<u32>,
    pub weight_g: Option<f64>,
    pub metal: Option<MetalType>,
    pub purity: Option<u32>,
    pub shipping_cost: Option<f64>,
    pub shipping_type: Option<String>,
    pub spot_price_per_gram: Option<f64>,
    pub melt_value: Option<f64>,
    pub total_cost: f64,
    pub margin: Option<f64>,
    pub status: MatchStatus,
    pub found_at: DateTime<Utc>,
}

/// Timing and output of one cycle stage.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StageReport {
    pub name: String,
    pub elapsed_ms: u128,
    pub timestamp: DateTime<Utc>,
    pub output: Value,
}

impl StageReport {
    pub fn new(name: &str, elapsed_ms: u128, output: Value) -> Self {
        Self {
            name: name.to_string(),
            elapsed_ms,
            timestamp: Utc::now(),
            output,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_deserialize_by_item_type_tag() {
        let filters: TaskFilters =
            serde_json::from_value(json!({"item_type": "jewelry", "metals": ["Gold"]}))
                .expect("jewelry filters");
        match filters {
            TaskFilters::Jewelry(inner) => {
                assert_eq!(inner.metals, vec!["Gold".to_string()]);
                assert!(inner.no_stone, "no_stone defaults to true");
            }
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn task_is_due_after_poll_interval() {
        let now = Utc::now();
        let mut task: Task = serde_json::from_value(json!({
            "id": "t1",
            "filters": {"item_type": "watch"},
            "poll_interval": 30,
        }))
        .expect("task");
        assert!(task.is_due(now));
        task.last_run = Some(now - Duration::minutes(10));
        assert!(!task.is_due(now));
        task.last_run = Some(now - Duration::minutes(31));
        assert!(task.is_due(now));
        task.status = TaskStatus::Paused;
        assert!(!task.is_due(now));
    }

    #[test]
    fn listing_format_prefers_auction() {
        let opts = vec!["FIXED_PRICE".to_string(), "AUCTION".to_string()];
        assert_eq!(ListingFormat::from_buying_options(&opts), ListingFormat::Auction);
        let opts = vec!["FIXED_PRICE".to_string(), "BEST_OFFER".to_string()];
        assert_eq!(ListingFormat::from_buying_options(&opts), ListingFormat::BestOffer);
        assert_eq!(ListingFormat::from_buying_options(&[]), ListingFormat::Unknown);
    }
}
