use crate::ebay::config::{APP_SCOPE, EbayEndpoints};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error("credential `{0}` is missing app id or secret")]
    MissingCredentials(String),
    #[error("oauth request failed: {0}")]
    Request(String),
    /// Non-2xx from the token endpoint; status and body feed outcome classification.
    #[error("oauth rejected with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

impl EbayAuthError {
    pub fn status(&self) -> Option<u16> {
        match self {
            EbayAuthError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppToken {
    pub access_token: String,
    #[serde(default = "AppToken::default_expiry")]
    pub expires_in: i64,
}

impl AppToken {
    fn default_expiry() -> i64 {
        7200
    }
}

fn basic_auth_header(app_id: &str, secret: &str) -> String {
    let raw = format!("{app_id}:{secret}");
    format!("Basic {}", BASE64.encode(raw))
}

/// Client-credentials grant for one application identity.
pub async fn get_app_access_token(
    client: &Client,
    endpoints: &EbayEndpoints,
    label: &str,
    app_id: &str,
    secret: &str,
) -> Result<AppToken, EbayAuthError> {
    if app_id.trim().is_empty() || secret.trim().is_empty() {
        return Err(EbayAuthError::MissingCredentials(label.to_string()));
    }
    let body = [("grant_type", "client_credentials"), ("scope", APP_SCOPE)];
    let response = client
        .post(endpoints.oauth_token_url())
        .header(reqwest::header::AUTHORIZATION, basic_auth_header(app_id, secret))
        .form(&body)
        .send()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(EbayAuthError::Rejected {
            status: status.as_u16(),
            body,
        });
    }

    response
        .json::<AppToken>()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))
}
