mod config;
mod credentials;
mod dedup;
mod ebay;
mod eligibility;
mod enrich;
mod extract;
mod http;
mod lease;
mod llm;
mod metrics;
mod models;
mod persist;
mod prices;
mod query;
mod scheduler;
mod search;
mod security;
mod store;
mod supabase;
#[cfg(test)]
mod testing;
mod valuation;

use axum::{
    Json, Router,
    extract::{Extension, Path, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use config::ScannerConfig;
use credentials::CredentialPool;
use ebay::EbayEndpoints;
use enrich::{EnrichmentQueue, EnrichmentWorker};
use eyre::WrapErr;
use lease::{MemoryLease, RedisLease, TaskLease};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, Credential};
use prices::{HttpSpotPriceFeed, SpotPriceSource, StaticSpotPrices};
use scheduler::{CycleErrorKind, CycleReport, Scanner, ScannerParts};
use security::{AuthContext, AuthState, require_api_auth};
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use store::{CredentialStore, MatchStore, MemoryStore, TaskStore};
use supabase::SupabaseClient;
use tokio::time::MissedTickBehavior;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "scout.api", "scanner crashed: {err:?}");
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = ScannerConfig::from_env().wrap_err("loading scanner config")?;
    let (tasks, credentials, matches) = build_stores()?;
    let seed = credentials
        .load_credentials()
        .await
        .wrap_err("loading marketplace credentials")?;
    info!(
        target = "scout.api",
        credentials = seed.len(),
        strategy = ?config.strategy,
        "credential pool loaded"
    );
    let pool = CredentialPool::new(seed, http::build_client(), EbayEndpoints::from_env());

    let prices: Arc<dyn SpotPriceSource> = match HttpSpotPriceFeed::from_env() {
        Some(feed) => Arc::new(feed),
        None => Arc::new(StaticSpotPrices::from_env()),
    };
    let lease: Arc<dyn TaskLease> = match RedisLease::from_env() {
        Some(redis) => Arc::new(redis),
        None => {
            warn!(target = "scout.api", "REDIS_URL not set; task leases are process-local");
            Arc::new(MemoryLease::default())
        }
    };
    let (enrichment, _worker) = EnrichmentQueue::spawn(
        EnrichmentWorker::from_env(matches.clone()),
        config.enrichment_queue_capacity,
    );

    let scan_interval = config.scan_interval;
    let scanner = Scanner::new(ScannerParts {
        config,
        tasks,
        credentials,
        matches,
        pool,
        prices,
        lease,
        enrichment: Some(enrichment),
    });
    tokio::spawn(scan_loop(scanner.clone(), scan_interval));

    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;
    let state = AppState {
        scanner,
        prometheus_handle,
        metrics_key: std::env::var("METRICS_KEY").ok().filter(|k| !k.is_empty()),
    };
    let app = router(state, AuthState::from_env()).layer(
        CorsLayer::new()
            .allow_headers(Any)
            .allow_methods(Any)
            .allow_origin(Any),
    );

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "scout.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!(target = "scout.api", "shutdown requested");
        })
        .await?;
    Ok(())
}

type Stores = (Arc<dyn TaskStore>, Arc<dyn CredentialStore>, Arc<dyn MatchStore>);

fn build_stores() -> eyre::Result<Stores> {
    if let Some(client) = SupabaseClient::from_env() {
        info!(target = "scout.store", "using Supabase persistence");
        let client = Arc::new(client);
        let tasks: Arc<dyn TaskStore> = client.clone();
        let credentials: Arc<dyn CredentialStore> = client.clone();
        let matches: Arc<dyn MatchStore> = client;
        return Ok((tasks, credentials, matches));
    }
    warn!(target = "scout.store", "SUPABASE_URL not set; using in-memory store with no tasks");
    let credentials = credentials_from_env()?;
    let memory = Arc::new(MemoryStore::new(Vec::new(), credentials));
    let tasks: Arc<dyn TaskStore> = memory.clone();
    let credentials: Arc<dyn CredentialStore> = memory.clone();
    let matches: Arc<dyn MatchStore> = memory;
    Ok((tasks, credentials, matches))
}

/// `EBAY_CREDENTIALS` holds a JSON array of credential records.
fn credentials_from_env() -> eyre::Result<Vec<Credential>> {
    match std::env::var("EBAY_CREDENTIALS") {
        Ok(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(&raw).wrap_err("EBAY_CREDENTIALS is not a credential array")
        }
        _ => Ok(Vec::new()),
    }
}

async fn scan_loop(scanner: Scanner, every: std::time::Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match scanner.run_due(Utc::now()).await {
            Ok(reports) if !reports.is_empty() => {
                info!(target = "scout.scheduler", cycles = reports.len(), "scan_tick_finished");
            }
            Ok(_) => {}
            Err(err) => error!(target = "scout.scheduler", error = %err, "scan_tick_failed"),
        }
    }
}

#[derive(Clone)]
struct AppState {
    scanner: Scanner,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
}

fn router(state: AppState, auth: AuthState) -> Router {
    let protected = Router::new()
        .route("/scans", post(trigger_due_scans))
        .route("/scans/{task_id}", post(trigger_task_scan))
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Liveness check; no auth.
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "lustre-scout",
    }))
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Run every task whose poll interval has elapsed.
///
/// - Method: `POST`
/// - Path: `/scans`
/// - Auth: `Authorization: Bearer <key>` or `X-Scout-Key: <key>`
/// - Response: one `CycleReport` per task that ran
async fn trigger_due_scans(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<Vec<CycleReport>>, AppError> {
    crate::metrics::inc_requests("/scans");
    info!(target = "scout.api", operator = %context.operator, "manual scan of due tasks");
    Ok(Json(state.scanner.run_due(Utc::now()).await?))
}

/// Force one cycle of a task, ignoring its poll interval.
async fn trigger_task_scan(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
    Path(task_id): Path<String>,
) -> Result<Json<CycleReport>, AppError> {
    crate::metrics::inc_requests("/scans/{task_id}");
    info!(target = "scout.api", operator = %context.operator, %task_id, "manual scan of task");
    Ok(Json(state.scanner.run_task(&task_id, Utc::now()).await?))
}

#[derive(Debug)]
struct AppError(scheduler::CycleError);

impl From<scheduler::CycleError> for AppError {
    fn from(value: scheduler::CycleError) -> Self {
        Self(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self.0.kind() {
            CycleErrorKind::NotFound => StatusCode::NOT_FOUND,
            CycleErrorKind::CredentialsExhausted => StatusCode::SERVICE_UNAVAILABLE,
            CycleErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            CycleErrorKind::Store => StatusCode::BAD_GATEWAY,
        };
        let payload = ApiError {
            error: self.0.stage().to_string(),
            detail: Some(self.0.detail().to_string()),
        };
        (status, Json(payload)).into_response()
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JewelryFilters, Task, TaskFilters, TaskStatus};
    use crate::prices::SpotPrices;
    use crate::testing::{SearchBehavior, item_summary, spawn_mock_ebay};
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app_with(store: MemoryStore, ebay_root: &str, metrics_key: Option<&str>) -> Router {
        let store = Arc::new(store);
        let pool = CredentialPool::new(
            Vec::new(),
            http::build_client(),
            EbayEndpoints::with_root(ebay_root),
        );
        let scanner = Scanner::new(ScannerParts {
            config: ScannerConfig::default(),
            tasks: store.clone(),
            credentials: store.clone(),
            matches: store,
            pool,
            prices: Arc::new(StaticSpotPrices(SpotPrices {
                gold: Some(80.0),
                ..SpotPrices::default()
            })),
            lease: Arc::new(MemoryLease::default()),
            enrichment: None,
        });
        let state = AppState {
            scanner,
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
            metrics_key: metrics_key.map(str::to_string),
        };
        router(state, AuthState::new("ops:secret", 10.0, 10.0))
    }

    fn post(uri: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method("POST").uri(uri);
        if let Some(key) = key {
            builder = builder.header(security::API_KEY_HEADER, key);
        }
        builder.body(Body::empty()).expect("request")
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), 1 << 20).await.expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn health_needs_no_key() {
        let app = app_with(MemoryStore::default(), "http://127.0.0.1:9", None);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["service"], "lustre-scout");
    }

    #[tokio::test]
    async fn metrics_respects_key() {
        let app = app_with(MemoryStore::default(), "http://127.0.0.1:9", Some("m"));
        let denied = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        let allowed = app
            .oneshot(
                Request::get("/metrics")
                    .header("X-Metrics-Key", "m")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");
        assert_eq!(allowed.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn scans_require_a_key() {
        let app = app_with(MemoryStore::default(), "http://127.0.0.1:9", None);
        let response = app.oneshot(post("/scans", None)).await.expect("response");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_task_is_404() {
        let app = app_with(MemoryStore::default(), "http://127.0.0.1:9", None);
        let response = app
            .oneshot(post("/scans/missing", Some("secret")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "load_task");
    }

    #[tokio::test]
    async fn forced_scan_persists_matches() {
        let (root, ebay) = spawn_mock_ebay().await;
        ebay.set(
            "app-a",
            SearchBehavior::Items(vec![item_summary("v1|100|0", "14K Gold Chain 10g", "300.00")]),
        )
        .await;
        let task = Task {
            id: "t1".into(),
            owner: None,
            status: TaskStatus::Active,
            filters: TaskFilters::Jewelry(JewelryFilters {
                metals: vec!["Gold".into()],
                ..Default::default()
            }),
            min_price: None,
            max_price: None,
            poll_interval: 15,
            exclude_keywords: vec![],
            listing_formats: vec![],
            conditions: vec![],
            category_id: None,
            last_run: None,
        };
        let credential = Credential::new("a", "app-a", "secret");
        let store = MemoryStore::new(vec![task], vec![credential]);
        let app = app_with(store.clone(), &root, None);
        let response = app
            .oneshot(post("/scans/t1", Some("secret")))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let report = json_body(response).await;
        assert_eq!(report["state"], "done");
        assert_eq!(report["persisted"], 1);
        assert_eq!(store.matches().await.len(), 1);
        assert!(store.task("t1").await.expect("task").last_run.is_some());
    }
}
