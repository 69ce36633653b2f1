use crate::config::ScannerConfig;
use crate::credentials::CredentialPool;
use crate::dedup::dedup_listings;
use crate::eligibility::check_item;
use crate::enrich::EnrichmentQueue;
use crate::extract::extract_attributes;
use crate::lease::TaskLease;
use crate::models::{ListingItem, StageReport, Task};
use crate::persist::{MatchPersister, PersistOutcome, build_match};
use crate::prices::{SpotPriceSource, SpotPrices};
use crate::query::build_queries;
use crate::search::{FailoverOutcome, SearchExecutor};
use crate::store::{CredentialStore, MatchStore, StoreError, TaskStore};
use crate::valuation::value_listing;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::{collections::HashSet, sync::Arc, time::Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Fetching,
    Processing,
    Done,
    Failed,
    /// Another run holds the task lease.
    Skipped,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Idle => "idle",
            CycleState::Fetching => "fetching",
            CycleState::Processing => "processing",
            CycleState::Done => "done",
            CycleState::Failed => "failed",
            CycleState::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    pub listing_id: String,
    pub reason: String,
}

/// Transcript of one task cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub task_id: String,
    pub state: CycleState,
    pub queries: usize,
    pub fetched: usize,
    pub unique: usize,
    pub duplicates: usize,
    /// Listings already stored for this task by an earlier cycle.
    pub known: usize,
    pub rejected: Vec<Rejection>,
    pub persisted: usize,
    pub item_failures: usize,
    pub credentials_used: Vec<String>,
    pub error: Option<String>,
    pub watermark_advanced: bool,
    pub stages: Vec<StageReport>,
    pub elapsed_ms: u128,
}

impl CycleReport {
    fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            state: CycleState::Idle,
            queries: 0,
            fetched: 0,
            unique: 0,
            duplicates: 0,
            known: 0,
            rejected: Vec::new(),
            persisted: 0,
            item_failures: 0,
            credentials_used: Vec::new(),
            error: None,
            watermark_advanced: false,
            stages: Vec::new(),
            elapsed_ms: 0,
        }
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct CycleError {
    stage: &'static str,
    message: String,
    kind: CycleErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleErrorKind {
    CredentialsExhausted,
    DeadlineExceeded,
    NotFound,
    Store,
}

impl CycleError {
    pub fn exhausted(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, CycleErrorKind::CredentialsExhausted)
    }

    pub fn deadline(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, CycleErrorKind::DeadlineExceeded)
    }

    pub fn not_found(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, CycleErrorKind::NotFound)
    }

    pub fn store(stage: &'static str, err: StoreError) -> Self {
        Self::with_kind(stage, err.to_string(), CycleErrorKind::Store)
    }

    fn with_kind(stage: &'static str, message: impl Into<String>, kind: CycleErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
        }
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> CycleErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

enum ItemOutcome {
    Known,
    Rejected(String),
    Persisted,
}

pub struct ScannerParts {
    pub config: ScannerConfig,
    pub tasks: Arc<dyn TaskStore>,
    pub credentials: Arc<dyn CredentialStore>,
    pub matches: Arc<dyn MatchStore>,
    pub pool: CredentialPool,
    pub prices: Arc<dyn SpotPriceSource>,
    pub lease: Arc<dyn TaskLease>,
    pub enrichment: Option<EnrichmentQueue>,
}

/// Drives task cycles. Tasks run one after another, as do the queries of one task.
#[derive(Clone)]
pub struct Scanner {
    config: Arc<ScannerConfig>,
    tasks: Arc<dyn TaskStore>,
    credentials: Arc<dyn CredentialStore>,
    persister: MatchPersister,
    executor: SearchExecutor,
    prices: Arc<dyn SpotPriceSource>,
    lease: Arc<dyn TaskLease>,
    enrichment: Option<EnrichmentQueue>,
}

impl Scanner {
    pub fn new(parts: ScannerParts) -> Self {
        let executor = SearchExecutor::new(parts.pool, parts.config.fetch_item_details);
        Self {
            config: Arc::new(parts.config),
            tasks: parts.tasks,
            credentials: parts.credentials,
            persister: MatchPersister::new(parts.matches),
            executor,
            prices: parts.prices,
            lease: parts.lease,
            enrichment: parts.enrichment,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    async fn reload_credentials(&self) {
        match self.credentials.load_credentials().await {
            Ok(credentials) => self.executor.pool().replace(credentials).await,
            Err(err) => {
                warn!(
                    target = "scout.scheduler",
                    error = %err,
                    "credential_reload_failed_using_cached"
                );
            }
        }
    }

    async fn save_credentials(&self) {
        let snapshot = self.executor.pool().snapshot().await;
        if let Err(err) = self.credentials.save_credentials(&snapshot).await {
            warn!(target = "scout.scheduler", error = %err, "credential_save_failed");
        }
    }

    /// Runs every active task whose poll interval has elapsed.
    pub async fn run_due(&self, now: DateTime<Utc>) -> Result<Vec<CycleReport>, CycleError> {
        let tasks = self
            .tasks
            .active_tasks()
            .await
            .map_err(|err| CycleError::store("load_tasks", err))?;
        let due: Vec<Task> = tasks.into_iter().filter(|t| t.is_due(now)).collect();
        if due.is_empty() {
            debug!(target = "scout.scheduler", "no_tasks_due");
            return Ok(Vec::new());
        }
        self.reload_credentials().await;
        let mut reports = Vec::with_capacity(due.len());
        for task in &due {
            reports.push(self.run_cycle(task, now).await);
        }
        Ok(reports)
    }

    /// Forces one cycle of `task_id` regardless of its poll interval.
    pub async fn run_task(
        &self,
        task_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, CycleError> {
        let task = self
            .tasks
            .get_task(task_id)
            .await
            .map_err(|err| CycleError::store("load_task", err))?
            .ok_or_else(|| {
                CycleError::not_found("load_task", format!("task {task_id} not found"))
            })?;
        self.reload_credentials().await;
        Ok(self.run_cycle(&task, now).await)
    }

    async fn run_cycle(&self, task: &Task, now: DateTime<Utc>) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::new(&task.id);

        let lease_token = match self.lease.acquire(&task.id, self.config.lease_ttl).await {
            Ok(Some(token)) => Some(token),
            Ok(None) => {
                info!(target = "scout.scheduler", task_id = %task.id, "task_lease_held_skipping");
                report.state = CycleState::Skipped;
                crate::metrics::cycle_finished(report.state.as_str(), 0, 0);
                return report;
            }
            Err(err) => {
                warn!(
                    target = "scout.scheduler",
                    task_id = %task.id,
                    error = %err,
                    "task_lease_unavailable_running_unlocked"
                );
                None
            }
        };

        report.state = CycleState::Fetching;
        let deadline = self.config.task_deadline;
        let outcome = tokio::time::timeout(deadline, self.execute(task, &mut report, now)).await;
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(_) => Some(CycleError::deadline(
                report.state.as_str(),
                format!("cycle exceeded {deadline:?} deadline"),
            )),
        };

        match &failure {
            None => report.state = CycleState::Done,
            Some(err) => {
                error!(
                    target = "scout.scheduler",
                    task_id = %task.id,
                    stage = err.stage(),
                    kind = ?err.kind(),
                    error = %err.detail(),
                    "task_cycle_failed"
                );
                report.state = CycleState::Failed;
                report.error = Some(err.detail().to_string());
            }
        }

        if failure.is_none() || self.config.advance_watermark_on_failure {
            match self.tasks.update_last_run(&task.id, now).await {
                Ok(()) => report.watermark_advanced = true,
                Err(err) => {
                    warn!(
                        target = "scout.scheduler",
                        task_id = %task.id,
                        error = %err,
                        "watermark_update_failed"
                    );
                }
            }
        }

        self.save_credentials().await;

        if let Some(token) = lease_token
            && let Err(err) = self.lease.release(&task.id, &token).await
        {
            warn!(
                target = "scout.scheduler",
                task_id = %task.id,
                error = %err,
                "task_lease_release_failed"
            );
        }

        report.elapsed_ms = started.elapsed().as_millis();
        crate::metrics::cycle_finished(report.state.as_str(), report.fetched, report.persisted);
        info!(
            target = "scout.scheduler",
            task_id = %task.id,
            state = report.state.as_str(),
            fetched = report.fetched,
            unique = report.unique,
            rejected = report.rejected.len(),
            persisted = report.persisted,
            elapsed_ms = report.elapsed_ms as u64,
            "task_cycle_finished"
        );
        report
    }

    async fn execute(
        &self,
        task: &Task,
        report: &mut CycleReport,
        now: DateTime<Utc>,
    ) -> Result<(), CycleError> {
        let started = Instant::now();
        let (batches, fetch_failure) = self.fetch(task, report, now).await;
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed("fetch", elapsed_ms);
        report.stages.push(StageReport::new(
            "fetch",
            elapsed_ms,
            json!({
                "queries": report.queries,
                "fetched": report.fetched,
                "credentials": report.credentials_used,
                "error": fetch_failure.as_ref().map(|err| err.detail().to_string()),
            }),
        ));

        report.state = CycleState::Processing;
        let started = Instant::now();
        let (unique, duplicates) = dedup_listings(batches);
        report.unique = unique.len();
        report.duplicates = duplicates;

        let prices = match self.prices.current().await {
            Ok(prices) => Some(prices),
            Err(err) => {
                warn!(target = "scout.scheduler", error = %err, "spot_prices_unavailable");
                None
            }
        };

        for item in &unique {
            match self.process_item(task, item, prices.as_ref(), now).await {
                Ok(ItemOutcome::Known) => report.known += 1,
                Ok(ItemOutcome::Persisted) => report.persisted += 1,
                Ok(ItemOutcome::Rejected(reason)) => {
                    debug!(
                        target = "scout.scheduler",
                        listing_id = %item.listing_id,
                        %reason,
                        "item_rejected"
                    );
                    report.rejected.push(Rejection {
                        listing_id: item.listing_id.clone(),
                        reason,
                    });
                }
                Err(err) => {
                    warn!(
                        target = "scout.scheduler",
                        listing_id = %item.listing_id,
                        error = %err,
                        "item_failed"
                    );
                    report.item_failures += 1;
                }
            }
        }
        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed("process", elapsed_ms);
        report.stages.push(StageReport::new(
            "process",
            elapsed_ms,
            json!({
                "unique": report.unique,
                "duplicates": report.duplicates,
                "known": report.known,
                "rejected": report.rejected.len(),
                "persisted": report.persisted,
                "failed": report.item_failures,
            }),
        ));
        match fetch_failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Runs every query of the task. A query that exhausts the pool does not stop its
    /// siblings; batches already fetched are still processed and the first failure is
    /// returned alongside them.
    async fn fetch(
        &self,
        task: &Task,
        report: &mut CycleReport,
        now: DateTime<Utc>,
    ) -> (Vec<Vec<ListingItem>>, Option<CycleError>) {
        let queries = build_queries(task, &self.config.categories, self.config.search_limit, now);
        report.queries = queries.len();
        let mut failed = HashSet::new();
        let mut batches = Vec::with_capacity(queries.len());
        let mut failure = None;
        for spec in &queries {
            match self
                .executor
                .run_with_failover(spec, self.config.strategy, &mut failed, now)
                .await
            {
                FailoverOutcome::Success { items, credential } => {
                    report.fetched += items.len();
                    if !report.credentials_used.contains(&credential) {
                        report.credentials_used.push(credential);
                    }
                    batches.push(items);
                }
                outcome => {
                    warn!(
                        target = "scout.scheduler",
                        task_id = %task.id,
                        keywords = %spec.keywords,
                        error = %outcome.message(),
                        "query_failed"
                    );
                    failure
                        .get_or_insert_with(|| CycleError::exhausted("fetch", outcome.message()));
                }
            }
        }
        (batches, failure)
    }

    async fn process_item(
        &self,
        task: &Task,
        item: &ListingItem,
        prices: Option<&SpotPrices>,
        now: DateTime<Utc>,
    ) -> Result<ItemOutcome, StoreError> {
        if self.persister.is_known(&task.id, &item.listing_id).await? {
            return Ok(ItemOutcome::Known);
        }
        let verdict = check_item(task, item);
        if !verdict.passed {
            return Ok(ItemOutcome::Rejected(verdict.reason().to_string()));
        }
        let attributes = extract_attributes(item);
        let valuation = value_listing(&attributes, item.price, prices);
        let record = build_match(&task.id, item, &attributes, &valuation, now);
        match self.persister.persist(record).await? {
            PersistOutcome::Inserted(record) => {
                info!(
                    target = "scout.scheduler",
                    task_id = %task.id,
                    listing_id = %record.listing_id,
                    karat = ?record.karat,
                    melt_value = ?record.melt_value,
                    "match_persisted"
                );
                if let Some(queue) = &self.enrichment {
                    queue.publish(record);
                }
                Ok(ItemOutcome::Persisted)
            }
            PersistOutcome::Duplicate => Ok(ItemOutcome::Known),
        }
    }
}
