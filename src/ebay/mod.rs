pub mod auth;
pub mod browse;
pub mod config;
pub mod taxonomy;

pub use auth::{AppToken, EbayAuthError, get_app_access_token};
pub use browse::{EbayBrowseError, ItemDetail, ItemSummary};
pub use config::EbayEndpoints;
pub use taxonomy::{CategoryTable, EbayCondition};
