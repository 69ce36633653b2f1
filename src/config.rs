use crate::credentials::RotationStrategy;
use crate::ebay::CategoryTable;
use crate::models::ItemType;
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read scanner config {path}: {message}")]
    Read { path: String, message: String },
    #[error("invalid scanner config: {0}")]
    Parse(String),
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub strategy: RotationStrategy,
    pub scan_interval: Duration,
    pub task_deadline: Duration,
    pub lease_ttl: Duration,
    pub search_limit: u32,
    pub fetch_item_details: bool,
    /// Advance `last_run` even when a cycle fails, keeping lag bounded during outages.
    pub advance_watermark_on_failure: bool,
    pub categories: CategoryTable,
    pub enrichment_queue_capacity: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            strategy: RotationStrategy::RoundRobin,
            scan_interval: Duration::from_secs(60),
            task_deadline: Duration::from_secs(120),
            lease_ttl: Duration::from_secs(300),
            search_limit: crate::query::DEFAULT_LIMIT,
            fetch_item_details: false,
            advance_watermark_on_failure: true,
            categories: CategoryTable::default(),
            enrichment_queue_capacity: 64,
        }
    }
}

/// YAML overlay; every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    strategy: Option<RotationStrategy>,
    scan_interval_secs: Option<u64>,
    task_deadline_secs: Option<u64>,
    lease_ttl_secs: Option<u64>,
    search_limit: Option<u32>,
    fetch_item_details: Option<bool>,
    advance_watermark_on_failure: Option<bool>,
    categories: HashMap<ItemType, serde_yaml::Value>,
    enrichment_queue_capacity: Option<usize>,
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Null => Some(String::new()),
        _ => None,
    }
}

impl ScannerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|key| std::env::var(key).ok());
        if let Ok(path) = std::env::var("SCANNER_CONFIG") {
            let raw = std::fs::read_to_string(&path).map_err(|err| ConfigError::Read {
                path: path.clone(),
                message: err.to_string(),
            })?;
            config.apply_yaml(&raw)?;
        }
        Ok(config)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let secs = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .filter(|v| *v > 0)
                .map(Duration::from_secs)
        };
        if let Some(raw) = lookup("CREDENTIAL_STRATEGY") {
            match RotationStrategy::from_raw(&raw) {
                Some(strategy) => config.strategy = strategy,
                None => warn!(target = "scout.config", value = %raw, "unknown_rotation_strategy"),
            }
        }
        if let Some(v) = secs("SCAN_INTERVAL_SECS") {
            config.scan_interval = v;
        }
        if let Some(v) = secs("TASK_DEADLINE_SECS") {
            config.task_deadline = v;
        }
        if let Some(v) = secs("LEASE_TTL_SECS") {
            config.lease_ttl = v;
        }
        if let Some(v) = lookup("SEARCH_LIMIT").and_then(|v| v.trim().parse::<u32>().ok()) {
            config.search_limit = v.clamp(1, crate::query::MAX_LIMIT);
        }
        if let Some(v) = lookup("FETCH_ITEM_DETAILS").as_deref().and_then(parse_bool) {
            config.fetch_item_details = v;
        }
        if let Some(v) = lookup("ADVANCE_WATERMARK_ON_FAILURE")
            .as_deref()
            .and_then(parse_bool)
        {
            config.advance_watermark_on_failure = v;
        }
        if let Some(v) =
            lookup("ENRICHMENT_QUEUE_CAPACITY").and_then(|v| v.trim().parse::<usize>().ok())
        {
            config.enrichment_queue_capacity = v.max(1);
        }
        config
    }

    pub fn apply_yaml(&mut self, raw: &str) -> Result<(), ConfigError> {
        let file: ConfigFile =
            serde_yaml::from_str(raw).map_err(|err| ConfigError::Parse(err.to_string()))?;
        if let Some(strategy) = file.strategy {
            self.strategy = strategy;
        }
        let positive = |v: Option<u64>| v.filter(|v| *v > 0).map(Duration::from_secs);
        if let Some(v) = positive(file.scan_interval_secs) {
            self.scan_interval = v;
        }
        if let Some(v) = positive(file.task_deadline_secs) {
            self.task_deadline = v;
        }
        if let Some(v) = positive(file.lease_ttl_secs) {
            self.lease_ttl = v;
        }
        if let Some(v) = file.search_limit {
            self.search_limit = v.clamp(1, crate::query::MAX_LIMIT);
        }
        if let Some(v) = file.fetch_item_details {
            self.fetch_item_details = v;
        }
        if let Some(v) = file.advance_watermark_on_failure {
            self.advance_watermark_on_failure = v;
        }
        if let Some(v) = file.enrichment_queue_capacity {
            self.enrichment_queue_capacity = v.max(1);
        }
        if !file.categories.is_empty() {
            let mut overrides = HashMap::new();
            for (item_type, value) in &file.categories {
                let id = scalar_to_string(value).ok_or_else(|| {
                    let name = item_type.as_str();
                    ConfigError::Parse(format!("category for {name} must be a scalar"))
                })?;
                overrides.insert(*item_type, id);
            }
            self.categories = self.categories.clone().with_overrides(overrides);
        }
        Ok(())
    }
}
