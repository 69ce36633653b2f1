//! Shared fixtures for unit tests: an in-process HTTP server standing in for eBay and
//! the price feed, plus a scripted eBay router.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Value, json};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::Mutex};

pub async fn spawn_mock(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock listener");
    let addr = listener.local_addr().expect("mock addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app.into_make_service()).await;
    });
    format!("http://{addr}")
}

/// How the mock search endpoint answers for a given app id.
#[derive(Clone, Debug)]
pub enum SearchBehavior {
    Items(Vec<Value>),
    RateLimited,
    Unauthorized,
    ServerError,
}

#[derive(Default)]
pub struct MockEbayState {
    pub behaviors: Mutex<HashMap<String, SearchBehavior>>,
    /// Keyed by the `q` parameter; wins over the per-app behavior.
    pub query_behaviors: Mutex<HashMap<String, SearchBehavior>>,
    pub search_delay_ms: AtomicU64,
    pub token_requests: AtomicUsize,
    pub search_requests: Mutex<Vec<(String, HashMap<String, String>)>>,
    pub details: Mutex<HashMap<String, Value>>,
}

impl MockEbayState {
    pub async fn set(&self, app_id: &str, behavior: SearchBehavior) {
        self.behaviors
            .lock()
            .await
            .insert(app_id.to_string(), behavior);
    }

    pub async fn set_for_query(&self, keywords: &str, behavior: SearchBehavior) {
        self.query_behaviors
            .lock()
            .await
            .insert(keywords.to_string(), behavior);
    }

    pub async fn searches_by(&self, app_id: &str) -> usize {
        self.search_requests
            .lock()
            .await
            .iter()
            .filter(|(who, _)| who == app_id)
            .count()
    }
}

pub fn item_summary(id: &str, title: &str, price: &str) -> Value {
    json!({
        "itemId": id,
        "title": title,
        "price": {"value": price, "currency": "USD"},
        "buyingOptions": ["FIXED_PRICE"],
        "itemWebUrl": format!("https://www.ebay.com/itm/{id}"),
        "categories": [{"categoryId": "4196", "categoryName": "Fine Jewelry"}],
        "seller": {"username": "seller1", "feedbackPercentage": "99.5", "feedbackScore": 1200},
        "shippingOptions": [{
            "shippingCostType": "FIXED",
            "shippingCost": {"value": "0.00", "currency": "USD"}
        }]
    })
}

fn app_id_from_basic(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    let encoded = raw.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    text.split(':').next().map(str::to_string)
}

fn app_id_from_bearer(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    raw.strip_prefix("Bearer tok-").map(str::to_string)
}

async fn oauth(State(state): State<Arc<MockEbayState>>, headers: HeaderMap) -> Response {
    state.token_requests.fetch_add(1, Ordering::SeqCst);
    match app_id_from_basic(&headers) {
        Some(app_id) if app_id.starts_with("bad") => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid_client"})),
        )
            .into_response(),
        Some(app_id) => Json(json!({
            "access_token": format!("tok-{app_id}"),
            "expires_in": 7200,
            "token_type": "Application Access Token"
        }))
        .into_response(),
        None => StatusCode::BAD_REQUEST.into_response(),
    }
}

async fn search(
    State(state): State<Arc<MockEbayState>>,
    headers: HeaderMap,
    axum::extract::Query(params): axum::extract::Query<HashMap<String, String>>,
) -> Response {
    let Some(app_id) = app_id_from_bearer(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let delay = state.search_delay_ms.load(Ordering::SeqCst);
    if delay > 0 {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
    let by_query = match params.get("q") {
        Some(q) => state.query_behaviors.lock().await.get(q).cloned(),
        None => None,
    };
    state
        .search_requests
        .lock()
        .await
        .push((app_id.clone(), params));
    let behavior = match by_query {
        Some(behavior) => behavior,
        None => state
            .behaviors
            .lock()
            .await
            .get(&app_id)
            .cloned()
            .unwrap_or(SearchBehavior::Items(Vec::new())),
    };
    match behavior {
        SearchBehavior::Items(items) => Json(json!({
            "total": items.len(),
            "itemSummaries": items,
        }))
        .into_response(),
        SearchBehavior::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"errors": [{
                "errorId": 2001,
                "message": "Too many requests. The request limit has been reached for the resource."
            }]})),
        )
            .into_response(),
        SearchBehavior::Unauthorized => (
            StatusCode::UNAUTHORIZED,
            Json(json!({"errors": [{"errorId": 1001, "message": "Invalid access token"}]})),
        )
            .into_response(),
        SearchBehavior::ServerError => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"errors": [{"errorId": 10001, "message": "System error"}]})),
        )
            .into_response(),
    }
}

async fn item_detail(
    State(state): State<Arc<MockEbayState>>,
    Path(id): Path<String>,
) -> Response {
    match state.details.lock().await.get(&id).cloned() {
        Some(detail) => Json(detail).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Starts a scripted eBay and returns its root URL together with the shared state.
pub async fn spawn_mock_ebay() -> (String, Arc<MockEbayState>) {
    let state = Arc::new(MockEbayState::default());
    let app = Router::new()
        .route("/identity/v1/oauth2/token", post(oauth))
        .route("/buy/browse/v1/item_summary/search", get(search))
        .route("/buy/browse/v1/item/{id}", get(item_detail))
        .with_state(state.clone());
    (spawn_mock(app).await, state)
}
