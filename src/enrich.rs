//! Best-effort side channel for freshly persisted matches: LLM deal scoring and a chat
//! webhook notification. Nothing here can fail or slow down the persistence path.

use crate::http::build_client;
use crate::llm::{LlmClient, LlmConfig};
use crate::models::Match;
use crate::store::MatchStore;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};

/// What the worker did for one match.
#[derive(Clone, Debug, PartialEq)]
pub struct Enrichment {
    pub score: Option<u8>,
    pub notified: bool,
}

#[derive(Clone)]
pub struct WebhookNotifier {
    url: String,
    http: Client,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            http: build_client(),
        }
    }

    pub fn from_env() -> Option<Self> {
        std::env::var("NOTIFY_WEBHOOK_URL")
            .ok()
            .filter(|url| !url.trim().is_empty())
            .map(Self::new)
    }

    pub async fn notify(&self, record: &Match, score: Option<u8>) -> Result<(), String> {
        let mut text = format!(
            "New match: {} for {:.2} {}",
            record.title, record.price, record.currency
        );
        if let Some(melt) = record.melt_value {
            text.push_str(&format!(" (melt {melt:.2})"));
        }
        if let Some(score) = score {
            text.push_str(&format!(" score {score}/100"));
        }
        if let Some(url) = &record.url {
            text.push_str(&format!(" {url}"));
        }
        let response = self
            .http
            .post(&self.url)
            .json(&json!({"text": text, "content": text}))
            .send()
            .await
            .map_err(|err| err.to_string())?;
        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }
        Ok(())
    }
}

pub struct EnrichmentWorker {
    llm: Option<LlmClient>,
    notifier: Option<WebhookNotifier>,
    store: Arc<dyn MatchStore>,
}

impl EnrichmentWorker {
    pub fn new(
        llm: Option<LlmClient>,
        notifier: Option<WebhookNotifier>,
        store: Arc<dyn MatchStore>,
    ) -> Self {
        Self {
            llm,
            notifier,
            store,
        }
    }

    pub fn from_env(store: Arc<dyn MatchStore>) -> Self {
        Self::new(
            LlmConfig::from_env().map(LlmClient::new),
            WebhookNotifier::from_env(),
            store,
        )
    }

    async fn handle(&self, record: &Match) -> Result<Enrichment, String> {
        let mut score = None;
        if let Some(llm) = &self.llm {
            let deal = llm.score_deal(record).await.map_err(|err| err.to_string())?;
            self.store
                .annotate_match(
                    record.id,
                    json!({"deal_score": deal.score, "deal_summary": deal.summary}),
                )
                .await
                .map_err(|err| err.to_string())?;
            score = Some(deal.score);
        }
        let mut notified = false;
        if let Some(notifier) = &self.notifier {
            notifier.notify(record, score).await?;
            notified = true;
        }
        Ok(Enrichment { score, notified })
    }
}

#[derive(Clone)]
pub struct EnrichmentQueue {
    tx: mpsc::Sender<Match>,
}

impl EnrichmentQueue {
    pub fn spawn(worker: EnrichmentWorker, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Match>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match worker.handle(&record).await {
                    Ok(done) => info!(
                        target = "scout.enrich",
                        match_id = %record.id,
                        score = ?done.score,
                        notified = done.notified,
                        "enrichment_completed"
                    ),
                    Err(error) => warn!(
                        target = "scout.enrich",
                        match_id = %record.id,
                        %error,
                        "enrichment_failed"
                    ),
                }
            }
        });

        (Self { tx }, handle)
    }

    /// Never waits: a full or closed queue drops the event.
    pub fn publish(&self, record: Match) -> bool {
        let id = record.id;
        match self.tx.try_send(record) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    target = "scout.enrich",
                    match_id = %id,
                    error = %err,
                    "enrichment_event_dropped"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListingFormat, MatchStatus};
    use crate::store::MemoryStore;
    use crate::testing::spawn_mock;
    use axum::{Json, Router, routing::post};
    use chrono::Utc;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    fn record() -> Match {
        Match {
            id: Uuid::new_v4(),
            task_id: "t1".into(),
            listing_id: "l1".into(),
            title: "14K Gold Ring".into(),
            url: Some("https://www.ebay.com/itm/l1".into()),
            price: 300.0,
            currency: "USD".into(),
            format: ListingFormat::FixedPrice,
            karat: Some(14),
            weight_g: Some(5.0),
            metal: None,
            purity: None,
            shipping_cost: Some(0.0),
            shipping_type: Some("free".into()),
            spot_price_per_gram: Some(80.0),
            melt_value: Some(233.33),
            total_cost: 300.0,
            margin: Some(-66.67),
            status: MatchStatus::New,
            found_at: Utc::now(),
        }
    }

    async fn wait_for_annotation(store: &MemoryStore, id: Uuid) -> Option<Value> {
        for _ in 0..100 {
            if let Some(annotation) = store.annotation(id).await {
                return Some(annotation);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        None
    }

    #[tokio::test]
    async fn scores_annotates_and_notifies() {
        let hooks = Arc::new(AtomicUsize::new(0));
        let counter = hooks.clone();
        let app = Router::new()
            .route(
                "/inference",
                post(|| async {
                    let text = r#"{"score": 71, "summary": "near melt"}"#;
                    Json(json!({"content": [{"type": "text", "text": text}]}))
                }),
            )
            .route(
                "/hook",
                post(move |Json(body): Json<Value>| {
                    let counter = counter.clone();
                    async move {
                        assert!(body["text"].as_str().unwrap_or_default().contains("score 71/100"));
                        counter.fetch_add(1, Ordering::SeqCst);
                        Json(json!({"ok": true}))
                    }
                }),
            );
        let base = spawn_mock(app).await;
        let store = MemoryStore::default();
        let m = record();
        store.insert_match(&m).await.expect("seed match");
        let worker = EnrichmentWorker::new(
            Some(LlmClient::new(LlmConfig::with_gateway(base.clone()))),
            Some(WebhookNotifier::new(format!("{base}/hook"))),
            Arc::new(store.clone()),
        );
        let (queue, _handle) = EnrichmentQueue::spawn(worker, 4);
        assert!(queue.publish(m.clone()));
        let annotation = wait_for_annotation(&store, m.id).await.expect("annotation");
        assert_eq!(annotation["deal_score"], 71);
        for _ in 0..100 {
            if hooks.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_stay_in_the_side_channel() {
        let store = MemoryStore::default();
        let m = record();
        store.insert_match(&m).await.expect("seed match");
        let worker = EnrichmentWorker::new(
            Some(LlmClient::new(LlmConfig::with_gateway("http://127.0.0.1:9"))),
            None,
            Arc::new(store.clone()),
        );
        assert!(worker.handle(&m).await.is_err());
        assert_eq!(store.matches().await.len(), 1);
        assert!(store.annotation(m.id).await.is_none());
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_waiting() {
        let (tx, mut rx) = mpsc::channel::<Match>(1);
        let queue = EnrichmentQueue { tx };
        assert!(queue.publish(record()));
        assert!(!queue.publish(record()));
        assert!(rx.recv().await.is_some());
        assert!(queue.publish(record()));
    }
}
