//! Marketplace credential pool: selection, health bookkeeping and per-credential OAuth
//! token cache.

use crate::ebay::{EbayAuthError, EbayEndpoints, get_app_access_token};
use crate::models::{Credential, CredentialStatus};
use chrono::{DateTime, Duration, Utc};
use rand::seq::IndexedRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Tokens are refreshed this long before the provider's expiry.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
pub const ROUND_ROBIN_BUCKET_SECS: i64 = 60;
const SUCCESS_STEP: f64 = 2.0;
const FAILURE_STEP: f64 = 10.0;

const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "quota",
    "request limit",
    "call limit",
    "limit exceeded",
];

const AUTH_MARKERS: &[&str] = &[
    "invalid_token",
    "invalid token",
    "invalid access token",
    "invalid_client",
    "expired token",
    "token expired",
    "unauthorized",
    "authentication failed",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    LeastUsed,
    Random,
}

impl RotationStrategy {
    pub fn from_raw(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "round_robin" => Some(Self::RoundRobin),
            "least_used" => Some(Self::LeastUsed),
            "random" => Some(Self::Random),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    RateLimited,
    AuthError,
    Failure,
}

/// Maps a failed call onto a health outcome from its HTTP status and body text.
pub fn classify_failure(status: Option<u16>, body: &str) -> CallOutcome {
    let lower = body.to_lowercase();
    if status == Some(429) || RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        CallOutcome::RateLimited
    } else if matches!(status, Some(401) | Some(403))
        || AUTH_MARKERS.iter().any(|m| lower.contains(m))
    {
        CallOutcome::AuthError
    } else {
        CallOutcome::Failure
    }
}

fn is_available(credential: &Credential) -> bool {
    !matches!(
        credential.status,
        CredentialStatus::RateLimited | CredentialStatus::Error
    )
}

/// Picks the next credential to try. Healthy credentials are preferred; when none is
/// left, any untried credential is returned so the cycle still makes an attempt.
pub fn select_credential<'a>(
    credentials: &'a [Credential],
    strategy: RotationStrategy,
    tried: &HashSet<String>,
    now: DateTime<Utc>,
) -> Option<&'a Credential> {
    let untried: Vec<&Credential> = credentials
        .iter()
        .filter(|c| !tried.contains(&c.label))
        .collect();
    if untried.is_empty() {
        return None;
    }
    let available: Vec<&Credential> = untried.iter().copied().filter(|c| is_available(c)).collect();
    if available.is_empty() {
        debug!(
            target = "scout.credentials",
            untried = untried.len(),
            "no_healthy_credential_degraded_pick"
        );
        return untried.first().copied();
    }
    match strategy {
        RotationStrategy::RoundRobin => {
            let bucket = now.timestamp().max(0) / ROUND_ROBIN_BUCKET_SECS;
            let idx = (bucket as usize) % available.len();
            available.get(idx).copied()
        }
        RotationStrategy::LeastUsed => available.iter().copied().min_by_key(|c| c.last_used),
        RotationStrategy::Random => available.choose(&mut rand::rng()).copied(),
    }
}

/// Applies one call outcome to a credential record.
pub fn apply_outcome(credential: &mut Credential, outcome: CallOutcome, now: DateTime<Utc>) {
    credential.last_used = Some(now);
    match outcome {
        CallOutcome::Success => {
            credential.success_rate = (credential.success_rate + SUCCESS_STEP).min(100.0);
            credential.status = CredentialStatus::Active;
        }
        CallOutcome::RateLimited => credential.status = CredentialStatus::RateLimited,
        CallOutcome::AuthError => credential.status = CredentialStatus::AuthError,
        CallOutcome::Failure => {
            credential.success_rate = (credential.success_rate - FAILURE_STEP).max(0.0);
            credential.status = CredentialStatus::Error;
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

struct PoolState {
    credentials: Vec<Credential>,
    tokens: HashMap<String, CachedToken>,
}

/// Shared handle over the credential records and their tokens. Concurrent writers are
/// last-writer-wins; health only steers future selection.
#[derive(Clone)]
pub struct CredentialPool {
    state: Arc<Mutex<PoolState>>,
    http: Client,
    endpoints: EbayEndpoints,
}

impl CredentialPool {
    pub fn new(credentials: Vec<Credential>, http: Client, endpoints: EbayEndpoints) -> Self {
        let tokens = seed_tokens(&credentials);
        Self {
            state: Arc::new(Mutex::new(PoolState {
                credentials,
                tokens,
            })),
            http,
            endpoints,
        }
    }

    pub fn endpoints(&self) -> &EbayEndpoints {
        &self.endpoints
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Swaps in freshly loaded records, keeping in-memory tokens that are newer than
    /// what the store returned.
    pub async fn replace(&self, credentials: Vec<Credential>) {
        let mut guard = self.state.lock().await;
        let mut tokens = seed_tokens(&credentials);
        for (label, cached) in guard.tokens.drain() {
            let keep = credentials.iter().any(|c| c.label == label)
                && tokens
                    .get(&label)
                    .is_none_or(|stored| stored.expires_at < cached.expires_at);
            if keep {
                tokens.insert(label, cached);
            }
        }
        guard.credentials = credentials;
        guard.tokens = tokens;
    }

    pub async fn snapshot(&self) -> Vec<Credential> {
        self.state.lock().await.credentials.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.credentials.len()
    }

    pub async fn select(
        &self,
        strategy: RotationStrategy,
        tried: &HashSet<String>,
        now: DateTime<Utc>,
    ) -> Option<Credential> {
        let guard = self.state.lock().await;
        select_credential(&guard.credentials, strategy, tried, now).cloned()
    }

    pub async fn record_outcome(&self, label: &str, outcome: CallOutcome, now: DateTime<Utc>) {
        let mut guard = self.state.lock().await;
        let Some(credential) = guard.credentials.iter_mut().find(|c| c.label == label) else {
            warn!(target = "scout.credentials", label, "outcome_for_unknown_credential");
            return;
        };
        let previous = credential.status;
        apply_outcome(credential, outcome, now);
        if previous != credential.status {
            info!(
                target = "scout.credentials",
                label,
                from = ?previous,
                to = ?credential.status,
                success_rate = credential.success_rate,
                "credential_status_changed"
            );
        }
        if matches!(outcome, CallOutcome::AuthError) {
            guard.tokens.remove(label);
        }
        crate::metrics::credential_outcome(outcome);
    }

    /// Bearer token for `label`, exchanged on demand and cached until
    /// `TOKEN_REFRESH_MARGIN_SECS` before expiry.
    pub async fn access_token(
        &self,
        label: &str,
        now: DateTime<Utc>,
    ) -> Result<String, EbayAuthError> {
        let (app_id, secret) = {
            let guard = self.state.lock().await;
            if let Some(cached) = guard.tokens.get(label)
                && cached.is_fresh(now)
            {
                return Ok(cached.token.clone());
            }
            let credential = guard
                .credentials
                .iter()
                .find(|c| c.label == label)
                .ok_or_else(|| EbayAuthError::MissingCredentials(label.to_string()))?;
            (credential.app_id.clone(), credential.secret.clone())
        };

        let token = get_app_access_token(
            &self.http,
            &self.endpoints,
            label,
            &app_id,
            &secret,
        ).await?;
        let expires_at = now + Duration::seconds(token.expires_in.max(0));
        debug!(
            target = "scout.credentials",
            label,
            expires_in = token.expires_in,
            "token_exchanged"
        );

        let mut guard = self.state.lock().await;
        if let Some(credential) = guard.credentials.iter_mut().find(|c| c.label == label) {
            credential.cached_token = Some(token.access_token.clone());
            credential.token_expiry = Some(expires_at);
        }
        guard.tokens.insert(
            label.to_string(),
            CachedToken {
                token: token.access_token.clone(),
                expires_at,
            },
        );
        Ok(token.access_token)
    }
}

fn seed_tokens(credentials: &[Credential]) -> HashMap<String, CachedToken> {
    credentials
        .iter()
        .filter_map(|c| {
            Some((
                c.label.clone(),
                CachedToken {
                    token: c.cached_token.clone()?,
                    expires_at: c.token_expiry?,
                },
            ))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use crate::testing::spawn_mock_ebay;
    use std::sync::atomic::Ordering;

    fn creds(statuses: &[CredentialStatus]) -> Vec<Credential> {
        statuses
            .iter()
            .enumerate()
            .map(|(idx, status)| {
                let mut c = Credential::new(&format!("c{idx}"), &format!("app-{idx}"), "secret");
                c.status = *status;
                c
            })
            .collect()
    }

    #[test]
    fn round_robin_skips_rate_limited() {
        let pool = creds(&[
            CredentialStatus::RateLimited,
            CredentialStatus::RateLimited,
            CredentialStatus::Active,
        ]);
        for minute in 0..5 {
            let now = DateTime::from_timestamp(minute * 60, 0).expect("ts");
            let picked = select_credential(
                &pool,
                RotationStrategy::RoundRobin,
                &HashSet::new(),
                now,
            )
                .expect("pick");
            assert_eq!(picked.label, "c2");
        }
    }

    #[test]
    fn round_robin_rotates_by_time_bucket() {
        let pool = creds(&[CredentialStatus::Active, CredentialStatus::Active]);
        let first = DateTime::from_timestamp(0, 0).expect("ts");
        let second = DateTime::from_timestamp(60, 0).expect("ts");
        let a = select_credential(&pool, RotationStrategy::RoundRobin, &HashSet::new(), first);
        let b = select_credential(&pool, RotationStrategy::RoundRobin, &HashSet::new(), second);
        assert_ne!(a.map(|c| &c.label), b.map(|c| &c.label));
    }

    #[test]
    fn least_used_prefers_never_used_then_oldest() {
        let now = Utc::now();
        let mut pool = creds(&[CredentialStatus::Active; 3]);
        pool[0].last_used = Some(now - Duration::minutes(1));
        pool[1].last_used = Some(now - Duration::minutes(30));
        pool[2].last_used = Some(now);
        let picked = select_credential(&pool, RotationStrategy::LeastUsed, &HashSet::new(), now);
        assert_eq!(picked.map(|c| c.label.as_str()), Some("c1"));
        pool[2].last_used = None;
        let picked = select_credential(&pool, RotationStrategy::LeastUsed, &HashSet::new(), now);
        assert_eq!(picked.map(|c| c.label.as_str()), Some("c2"));
    }

    #[test]
    fn random_only_returns_available() {
        let pool = creds(&[CredentialStatus::Error, CredentialStatus::Active]);
        for _ in 0..20 {
            let picked = select_credential(
                &pool,
                RotationStrategy::Random,
                &HashSet::new(),
                Utc::now(),
            );
            assert_eq!(picked.map(|c| c.label.as_str()), Some("c1"));
        }
    }

    #[test]
    fn degraded_mode_returns_untried_credential() {
        let pool = creds(&[CredentialStatus::RateLimited, CredentialStatus::Error]);
        let mut tried = HashSet::new();
        let picked = select_credential(&pool, RotationStrategy::RoundRobin, &tried, Utc::now());
        assert_eq!(picked.map(|c| c.label.as_str()), Some("c0"));
        tried.insert("c0".to_string());
        let picked = select_credential(&pool, RotationStrategy::RoundRobin, &tried, Utc::now());
        assert_eq!(picked.map(|c| c.label.as_str()), Some("c1"));
        tried.insert("c1".to_string());
        let picked = select_credential(&pool, RotationStrategy::RoundRobin, &tried, Utc::now());
        assert!(picked.is_none());
    }

    #[test]
    fn outcomes_adjust_health() {
        let now = Utc::now();
        let mut c = Credential::new("a", "app", "s");
        c.success_rate = 99.0;
        apply_outcome(&mut c, CallOutcome::Success, now);
        assert_eq!(c.success_rate, 100.0);
        assert_eq!(c.last_used, Some(now));
        apply_outcome(&mut c, CallOutcome::Failure, now);
        assert_eq!(c.success_rate, 90.0);
        assert_eq!(c.status, CredentialStatus::Error);
        c.success_rate = 5.0;
        apply_outcome(&mut c, CallOutcome::Failure, now);
        assert_eq!(c.success_rate, 0.0);
        apply_outcome(&mut c, CallOutcome::RateLimited, now);
        assert_eq!(c.status, CredentialStatus::RateLimited);
        apply_outcome(&mut c, CallOutcome::Success, now);
        assert_eq!(c.status, CredentialStatus::Active);
    }

    #[test]
    fn classification_by_status_and_language() {
        assert_eq!(classify_failure(Some(429), ""), CallOutcome::RateLimited);
        assert_eq!(
            classify_failure(Some(500), "Daily call quota exhausted"),
            CallOutcome::RateLimited
        );
        assert_eq!(classify_failure(Some(401), ""), CallOutcome::AuthError);
        assert_eq!(classify_failure(Some(403), "forbidden"), CallOutcome::AuthError);
        assert_eq!(
            classify_failure(Some(400), "{\"error\":\"invalid_client\"}"),
            CallOutcome::AuthError
        );
        assert_eq!(
            classify_failure(Some(500), "Call limit exceeded for this application"),
            CallOutcome::RateLimited
        );
        assert_eq!(classify_failure(None, "connection reset"), CallOutcome::Failure);
    }

    #[test]
    fn exceeded_alone_is_not_a_rate_limit() {
        assert_eq!(
            classify_failure(
                Some(400),
                "The 'limit' value exceeded the maximum allowed value of 200."
            ),
            CallOutcome::Failure
        );
        assert_eq!(
            classify_failure(Some(504), "upstream deadline exceeded"),
            CallOutcome::Failure
        );
    }

    #[tokio::test]
    async fn rate_limited_credential_excluded_on_next_selection() {
        let pool = CredentialPool::new(
            creds(&[CredentialStatus::Active, CredentialStatus::Active]),
            build_client(),
            EbayEndpoints::with_root("http://127.0.0.1:9"),
        );
        let now = DateTime::from_timestamp(0, 0).expect("ts");
        let first = pool
            .select(RotationStrategy::RoundRobin, &HashSet::new(), now)
            .await
            .expect("first");
        pool.record_outcome(&first.label, CallOutcome::RateLimited, now).await;
        let next = pool
            .select(RotationStrategy::RoundRobin, &HashSet::new(), now)
            .await
            .expect("next");
        assert_ne!(next.label, first.label);
        let snapshot = pool.snapshot().await;
        let limited = snapshot.iter().find(|c| c.label == first.label).expect("record");
        assert_eq!(limited.status, CredentialStatus::RateLimited);
    }

    #[tokio::test]
    async fn tokens_are_cached_per_credential() {
        let (root, state) = spawn_mock_ebay().await;
        let pool = CredentialPool::new(
            creds(&[CredentialStatus::Active, CredentialStatus::Active]),
            build_client(),
            EbayEndpoints::with_root(root),
        );
        let now = Utc::now();
        let a1 = pool.access_token("c0", now).await.expect("c0 token");
        let a2 = pool.access_token("c0", now).await.expect("c0 cached");
        let b = pool.access_token("c1", now).await.expect("c1 token");
        assert_eq!(a1, "tok-app-0");
        assert_eq!(a1, a2);
        assert_eq!(b, "tok-app-1");
        assert_eq!(state.token_requests.load(Ordering::SeqCst), 2);

        // Inside the refresh margin the token is exchanged again.
        let later = now + Duration::seconds(7200 - 30);
        pool.access_token("c0", later).await.expect("refreshed");
        assert_eq!(state.token_requests.load(Ordering::SeqCst), 3);

        let snapshot = pool.snapshot().await;
        assert_eq!(snapshot[0].cached_token.as_deref(), Some("tok-app-0"));
        assert!(snapshot[0].token_expiry.is_some());
    }

    #[tokio::test]
    async fn replace_keeps_newer_in_memory_tokens() {
        let now = Utc::now();
        let mut stale = Credential::new("c0", "app-0", "s");
        stale.cached_token = Some("old".into());
        stale.token_expiry = Some(now - Duration::minutes(5));
        let pool = CredentialPool::new(
            vec![stale.clone()],
            build_client(),
            EbayEndpoints::with_root("http://127.0.0.1:9"),
        );
        {
            let mut guard = pool.state.lock().await;
            guard.tokens.insert(
                "c0".into(),
                CachedToken { token: "fresh".into(), expires_at: now + Duration::hours(1) },
            );
        }
        pool.replace(vec![stale]).await;
        let token = pool.access_token("c0", now).await.expect("cached token");
        assert_eq!(token, "fresh");
    }
}
