use crate::http::build_client;
use crate::models::Match;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub gateway_url: String,
    pub api_key: Option<String>,
    pub function_name: Option<String>,
    pub model: Option<String>,
}

impl LlmConfig {
    /// Deal scoring is only enabled when a gateway is configured.
    pub fn from_env() -> Option<Self> {
        let gateway_url = std::env::var("TENSORZERO_GATEWAY_URL").ok()?;
        Some(Self {
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            api_key: std::env::var("TENSORZERO_API_KEY").ok(),
            function_name: std::env::var("TENSORZERO_FUNCTION").ok(),
            model: std::env::var("TENSORZERO_MODEL").ok(),
        })
    }

    #[cfg(test)]
    pub fn with_gateway(gateway_url: impl Into<String>) -> Self {
        Self {
            gateway_url: gateway_url.into(),
            api_key: None,
            function_name: None,
            model: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("missing gateway url")]
    MissingGateway,
    #[error("http error: {0}")]
    Http(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    #[serde(default)]
    pub usage: Option<LlmUsage>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmUsage {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

/// Model verdict on a stored match.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DealScore {
    /// 0 (pass) to 100 (buy now).
    pub score: u8,
    #[serde(default)]
    pub summary: String,
}

const SCORING_PROMPT: &str = "You grade second-hand precious-metal listings for resale. \
Reply with JSON only: {\"score\": <0-100>, \"summary\": \"<one sentence>\"}.";

pub struct LlmClient {
    http: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            http: build_client(),
            config,
        }
    }

    pub async fn chat(&self, messages: &[LlmMessage]) -> Result<LlmResponse, LlmError> {
        let gateway = self.config.gateway_url.trim();
        if gateway.is_empty() {
            return Err(LlmError::MissingGateway);
        }

        let function_name = self
            .config
            .function_name
            .as_deref()
            .unwrap_or("deal_scoring");

        let body = ChatRequest {
            function_name: function_name.to_string(),
            model_name: self.config.model.clone(),
            input: ChatInput {
                messages: messages.to_vec(),
            },
        };

        let mut request = self.http.post(format!("{gateway}/inference")).json(&body);

        if let Some(key) = &self.config.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| LlmError::Http(err.to_string()))?;

        if !response.status().is_success() {
            return Err(LlmError::Http(format!("HTTP {}", response.status())));
        }

        let payload: TensorZeroResponse = response
            .json()
            .await
            .map_err(|err| LlmError::InvalidResponse(err.to_string()))?;

        let text = payload
            .content
            .into_iter()
            .find(|item| item.r#type == "text")
            .map(|item| item.text)
            .ok_or_else(|| LlmError::InvalidResponse("missing text".into()))?;

        Ok(LlmResponse {
            text,
            usage: payload.usage,
        })
    }

    pub async fn score_deal(&self, record: &Match) -> Result<DealScore, LlmError> {
        let listing = json!({
            "title": record.title,
            "price": record.price,
            "currency": record.currency,
            "format": record.format,
            "metal": record.metal,
            "karat": record.karat,
            "purity": record.purity,
            "weight_g": record.weight_g,
            "shipping_cost": record.shipping_cost,
            "melt_value": record.melt_value,
            "total_cost": record.total_cost,
            "margin": record.margin,
        });
        let messages = [
            LlmMessage {
                role: "system".into(),
                content: SCORING_PROMPT.into(),
            },
            LlmMessage {
                role: "user".into(),
                content: listing.to_string(),
            },
        ];
        let response = self.chat(&messages).await?;
        parse_score(&response.text)
    }
}

/// Accepts bare JSON or JSON wrapped in prose / code fences.
fn parse_score(text: &str) -> Result<DealScore, LlmError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let body = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(LlmError::InvalidResponse(format!("no JSON object in `{text}`"))),
    };
    let mut score: DealScore =
        serde_json::from_str(body).map_err(|err| LlmError::InvalidResponse(err.to_string()))?;
    score.score = score.score.min(100);
    Ok(score)
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    function_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    model_name: Option<String>,
    input: ChatInput,
}

#[derive(Debug, Serialize)]
struct ChatInput {
    messages: Vec<LlmMessage>,
}

#[derive(Debug, Deserialize)]
struct TensorZeroResponse {
    content: Vec<ResponseContent>,
    #[serde(default)]
    usage: Option<LlmUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseContent {
    r#type: String,
    text: String,
}
