//! PostgREST-backed stores: `tasks`, `matches`, and the `settings` row holding the
//! marketplace credential pool.

use crate::http::build_client;
use crate::models::{Credential, ListingFormat, Match, Task, TaskFilters, TaskStatus};
use crate::store::{CredentialStore, MatchStore, StoreError, TaskStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;
use uuid::Uuid;

pub const CREDENTIALS_SETTING_KEY: &str = "ebay_credentials";

#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    http: Client,
}

/// Row shape of `tasks`; `item_type` is a column and `filters` the untagged payload.
#[derive(Debug, Clone, Deserialize)]
struct TaskRow {
    id: Value,
    #[serde(default, alias = "user_id")]
    owner: Option<String>,
    item_type: String,
    #[serde(default)]
    status: TaskStatus,
    #[serde(default)]
    filters: Value,
    #[serde(default)]
    min_price: Option<f64>,
    #[serde(default)]
    max_price: Option<f64>,
    #[serde(default)]
    poll_interval: Option<u32>,
    #[serde(default)]
    exclude_keywords: Option<Vec<String>>,
    #[serde(default)]
    listing_formats: Option<Vec<ListingFormat>>,
    #[serde(default)]
    conditions: Option<Vec<String>>,
    #[serde(default)]
    category_id: Option<Value>,
    #[serde(default)]
    last_run: Option<DateTime<Utc>>,
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = String;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let id = scalar_string(&row.id).ok_or("task id is not a scalar")?;
        let mut filters = match row.filters {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => return Err(format!("task {id}: filters must be an object, got {other}")),
        };
        filters.insert("item_type".into(), Value::String(row.item_type.to_lowercase()));
        let filters: TaskFilters = serde_json::from_value(Value::Object(filters))
            .map_err(|err| format!("task {id}: {err}"))?;
        Ok(Task {
            id,
            owner: row.owner,
            status: row.status,
            filters,
            min_price: row.min_price,
            max_price: row.max_price,
            poll_interval: row.poll_interval.filter(|v| *v > 0).unwrap_or(15),
            exclude_keywords: row.exclude_keywords.unwrap_or_default(),
            listing_formats: row.listing_formats.unwrap_or_default(),
            conditions: row.conditions.unwrap_or_default(),
            category_id: row.category_id.as_ref().and_then(scalar_string),
            last_run: row.last_run,
        })
    }
}

#[derive(Debug, Deserialize)]
struct SettingRow {
    value: Value,
}

impl SupabaseClient {
    pub fn new(base_url: impl Into<String>, service_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            service_key: service_key.into(),
            http: build_client(),
        }
    }

    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        Some(Self::new(base_url, service_key))
    }

    fn table_url(&self, table: &str, query: &str) -> String {
        format!("{}/rest/v1/{table}?{query}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Request(format!("HTTP {status}: {body}")));
        }
        Ok(response)
    }

    async fn get_rows<T>(&self, url: String) -> Result<Vec<T>, StoreError>
    where
        T: for<'de> Deserialize<'de>,
    {
        self.send(self.http.get(url))
            .await?
            .json::<Vec<T>>()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }

    fn tasks_from_rows(rows: Vec<TaskRow>) -> Vec<Task> {
        rows.into_iter()
            .filter_map(|row| match Task::try_from(row) {
                Ok(task) => Some(task),
                Err(err) => {
                    warn!(target = "scout.store", error = %err, "task_row_skipped");
                    None
                }
            })
            .collect()
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", urlencoding::encode(value))
}

#[async_trait]
impl TaskStore for SupabaseClient {
    async fn active_tasks(&self) -> Result<Vec<Task>, StoreError> {
        let rows = self
            .get_rows::<TaskRow>(self.table_url("tasks", "status=eq.active&select=*"))
            .await?;
        Ok(Self::tasks_from_rows(rows))
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StoreError> {
        let rows = self
            .get_rows::<TaskRow>(self.table_url(
                "tasks",
                &format!("id={}&select=*&limit=1", eq(task_id)),
            ))
            .await?;
        Ok(Self::tasks_from_rows(rows).pop())
    }

    async fn update_last_run(&self, task_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let url = self.table_url("tasks", &format!("id={}", eq(task_id)));
        self.send(
            self.http
                .patch(url)
                .header("Prefer", "return=minimal")
                .json(&json!({"last_run": at})),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CredentialStore for SupabaseClient {
    async fn load_credentials(&self) -> Result<Vec<Credential>, StoreError> {
        let rows = self
            .get_rows::<SettingRow>(self.table_url(
                "settings",
                &format!("key={}&select=value&limit=1", eq(CREDENTIALS_SETTING_KEY)),
            ))
            .await?;
        match rows.into_iter().next() {
            Some(row) => serde_json::from_value(row.value)
                .map_err(|err| StoreError::Deserialize(err.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn save_credentials(&self, credentials: &[Credential]) -> Result<(), StoreError> {
        let url = self.table_url("settings", "on_conflict=key");
        self.send(
            self.http
                .post(url)
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(&json!({"key": CREDENTIALS_SETTING_KEY, "value": credentials})),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl MatchStore for SupabaseClient {
    async fn match_exists(&self, task_id: &str, listing_id: &str) -> Result<bool, StoreError> {
        let rows = self
            .get_rows::<Value>(self.table_url(
                "matches",
                &format!(
                    "task_id={}&listing_id={}&select=id&limit=1",
                    eq(task_id),
                    eq(listing_id)
                ),
            ))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn insert_match(&self, record: &Match) -> Result<(), StoreError> {
        let response = self
            .authorized(
                self.http
                    .post(self.table_url("matches", ""))
                    .header("Prefer", "return=minimal")
                    .json(record),
            )
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(StoreError::Conflict {
                task_id: record.task_id.clone(),
                listing_id: record.listing_id.clone(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::Request(format!("HTTP {status}: {body}")))
            }
        }
    }

    async fn annotate_match(&self, match_id: Uuid, annotation: Value) -> Result<(), StoreError> {
        let url = self.table_url("matches", &format!("id=eq.{match_id}"));
        self.send(
            self.http
                .patch(url)
                .header("Prefer", "return=minimal")
                .json(&json!({"enrichment": annotation})),
        )
        .await?;
        Ok(())
    }
}
