use reqwest::Client;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct HttpTimeouts {
    pub request: Duration,
    pub connect: Duration,
}

impl HttpTimeouts {
    pub fn from_env() -> Self {
        let secs = |key: &str, default: u64| {
            std::env::var(key)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };
        Self {
            request: Duration::from_secs(secs("HTTP_TIMEOUT_SECS", 15)),
            connect: Duration::from_secs(secs("HTTP_CONNECT_TIMEOUT_SECS", 5)),
        }
    }
}

pub fn build_client() -> Client {
    build_client_with(HttpTimeouts::from_env())
}

/// Every outbound call carries a bounded timeout so one slow upstream cannot stall a
/// task cycle.
pub fn build_client_with(timeouts: HttpTimeouts) -> Client {
    Client::builder()
        .timeout(timeouts.request)
        .connect_timeout(timeouts.connect)
        .user_agent(concat!("lustre-scout/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|_| Client::new())
}
