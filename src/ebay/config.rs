use once_cell::sync::Lazy;
use std::env;

pub static EBAY_ENV: Lazy<String> =
    Lazy::new(|| env::var("EBAY_ENV").unwrap_or_else(|_| "SANDBOX".to_string()));

pub static MARKETPLACE_ID: Lazy<String> =
    Lazy::new(|| env::var("EBAY_MARKETPLACE_ID").unwrap_or_else(|_| "EBAY_US".to_string()));

pub static ROOT: Lazy<String> = Lazy::new(|| {
    if let Ok(root) = env::var("EBAY_API_ROOT") {
        return root.trim_end_matches('/').to_string();
    }
    if EBAY_ENV.as_str().eq_ignore_ascii_case("PROD") {
        "https://api.ebay.com".to_string()
    } else {
        "https://api.sandbox.ebay.com".to_string()
    }
});

pub const APP_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

/// Endpoint set for one eBay environment.
#[derive(Debug, Clone)]
pub struct EbayEndpoints {
    root: String,
    pub marketplace_id: String,
}

impl EbayEndpoints {
    pub fn from_env() -> Self {
        Self {
            root: ROOT.clone(),
            marketplace_id: MARKETPLACE_ID.clone(),
        }
    }

    #[cfg(test)]
    pub fn with_root(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
            marketplace_id: "EBAY_US".to_string(),
        }
    }

    pub fn oauth_token_url(&self) -> String {
        format!("{}/identity/v1/oauth2/token", self.root)
    }

    pub fn search_url(&self) -> String {
        format!("{}/buy/browse/v1/item_summary/search", self.root)
    }

    pub fn item_url(&self, item_id: &str) -> String {
        format!(
            "{}/buy/browse/v1/item/{}",
            self.root,
            urlencoding::encode(item_id)
        )
    }
}
