use crate::models::{Credential, Match, Task, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),
    #[error("invalid store response: {0}")]
    Deserialize(String),
    /// Unique (task_id, listing_id) violation; expected when two runs race.
    #[error("match already stored for task {task_id} listing {listing_id}")]
    Conflict { task_id: String, listing_id: String },
    #[error("{0} not found")]
    NotFound(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn active_tasks(&self) -> Result<Vec<Task>, StoreError>;
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError>;
    async fn update_last_run(&self, task_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load_credentials(&self) -> Result<Vec<Credential>, StoreError>;
    async fn save_credentials(&self, credentials: &[Credential]) -> Result<(), StoreError>;
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn match_exists(&self, task_id: &str, listing_id: &str) -> Result<bool, StoreError>;
    async fn insert_match(&self, record: &Match) -> Result<(), StoreError>;
    /// Attaches enrichment output (deal score, notes) to a stored match.
    async fn annotate_match(&self, match_id: Uuid, annotation: Value) -> Result<(), StoreError>;
}

#[derive(Default)]
struct MemoryState {
    tasks: Vec<Task>,
    credentials: Vec<Credential>,
    matches: Vec<Match>,
    annotations: HashMap<Uuid, Value>,
}

/// Process-local store for tests and runs without a database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new(tasks: Vec<Task>, credentials: Vec<Credential>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                tasks,
                credentials,
                ..Default::default()
            })),
        }
    }

    #[cfg(test)]
    pub async fn matches(&self) -> Vec<Match> {
        self.state.lock().await.matches.clone()
    }

    pub async fn credentials(&self) -> Vec<Credential> {
        self.state.lock().await.credentials.clone()
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        self.state
            .lock()
            .await
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
    }

    #[cfg(test)]
    pub async fn annotation(&self, match_id: Uuid) -> Option<Value> {
        self.state.lock().await.annotations.get(&match_id).cloned()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn active_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Active)
            .cloned()
            .collect())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.task(task_id).await)
    }

    async fn update_last_run(&self, task_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        let task = guard
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| StoreError::NotFound(format!("task {task_id}")))?;
        task.last_run = Some(at);
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load_credentials(&self) -> Result<Vec<Credential>, StoreError> {
        Ok(self.credentials().await)
    }

    async fn save_credentials(&self, credentials: &[Credential]) -> Result<(), StoreError> {
        self.state.lock().await.credentials = credentials.to_vec();
        Ok(())
    }
}

#[async_trait]
impl MatchStore for MemoryStore {
    async fn match_exists(&self, task_id: &str, listing_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .matches
            .iter()
            .any(|m| m.task_id == task_id && m.listing_id == listing_id))
    }

    async fn insert_match(&self, record: &Match) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        if guard
            .matches
            .iter()
            .any(|m| m.task_id == record.task_id && m.listing_id == record.listing_id)
        {
            return Err(StoreError::Conflict {
                task_id: record.task_id.clone(),
                listing_id: record.listing_id.clone(),
            });
        }
        guard.matches.push(record.clone());
        Ok(())
    }

    async fn annotate_match(&self, match_id: Uuid, annotation: Value) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        if !guard.matches.iter().any(|m| m.id == match_id) {
            return Err(StoreError::NotFound(format!("match {match_id}")));
        }
        guard.annotations.insert(match_id, annotation);
        Ok(())
    }
}
