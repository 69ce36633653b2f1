//! Task → Browse API search requests.

use crate::ebay::{CategoryTable, EbayCondition};
use crate::models::{ItemType, Task, TaskFilters};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_LOOKBACK_HOURS: i64 = 24;
pub const DEFAULT_LIMIT: u32 = 100;
/// Provider ceiling for `limit`.
pub const MAX_LIMIT: u32 = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuerySpec {
    pub keywords: String,
    pub category_id: Option<String>,
    /// `categoryId:<id>,Name:{v1|v2}` with values already URL-encoded.
    pub aspect_filter: Option<String>,
    pub filters: Vec<String>,
    pub limit: u32,
    /// Set on per-metal fan-out queries.
    pub metal: Option<String>,
    /// Category ids a returned item must carry; only set for explicit leaf categories.
    pub allowed_categories: Vec<String>,
}

impl QuerySpec {
    pub fn to_query_string(&self) -> String {
        let mut parts = vec![format!("q={}", urlencoding::encode(&self.keywords))];
        if let Some(category) = &self.category_id {
            parts.push(format!("category_ids={}", urlencoding::encode(category)));
        }
        if let Some(aspects) = &self.aspect_filter {
            parts.push(format!("aspect_filter={aspects}"));
        }
        if !self.filters.is_empty() {
            parts.push(format!(
                "filter={}",
                urlencoding::encode(&self.filters.join(","))
            ));
        }
        parts.push("sort=newlyListed".to_string());
        parts.push(format!("limit={}", self.limit.clamp(1, MAX_LIMIT)));
        parts.join("&")
    }
}

#[derive(Debug, Default)]
struct AspectFilter {
    clauses: Vec<String>,
}

impl AspectFilter {
    fn push(&mut self, name: &str, values: &[String]) {
        let encoded: Vec<String> = values
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|v| urlencoding::encode(v).into_owned())
            .collect();
        if !encoded.is_empty() {
            self.clauses.push(format!("{name}:{{{}}}", encoded.join("|")));
        }
    }

    fn render(&self, category_id: Option<&str>) -> Option<String> {
        let category_id = category_id?;
        if self.clauses.is_empty() {
            return None;
        }
        Some(format!("categoryId:{category_id},{}", self.clauses.join(",")))
    }
}

/// Lower bound for `itemStartDate`: the task's watermark or the default lookback.
pub fn watermark(task: &Task, now: DateTime<Utc>) -> DateTime<Utc> {
    task.last_run
        .unwrap_or_else(|| now - Duration::hours(DEFAULT_LOOKBACK_HOURS))
}

fn price_clause(min: Option<f64>, max: Option<f64>) -> Option<String> {
    let bound = |v: Option<f64>| {
        v.filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.to_string())
            .unwrap_or_default()
    };
    if min.is_none() && max.is_none() {
        return None;
    }
    Some(format!("price:[{}..{}],priceCurrency:USD", bound(min), bound(max)))
}

fn conditions(task: &Task) -> Vec<EbayCondition> {
    let mut out = Vec::new();
    for raw in &task.conditions {
        match EbayCondition::from_raw(raw) {
            Some(cond) if !out.contains(&cond) => out.push(cond),
            Some(_) => {}
            None => debug!(
                target = "scout.query",
                task_id = %task.id,
                condition = %raw,
                "unknown_condition_dropped"
            ),
        }
    }
    out
}

fn base_keywords(item_type: ItemType) -> &'static str {
    match item_type {
        ItemType::Jewelry => "jewelry",
        ItemType::Watch => "watch",
        ItemType::Gemstone => "loose gemstone",
    }
}

/// Builds every search request a task cycle issues. Jewelry tasks selecting more than
/// one metal fan out into one request per metal.
pub fn build_queries(
    task: &Task,
    categories: &CategoryTable,
    limit: u32,
    now: DateTime<Utc>,
) -> Vec<QuerySpec> {
    let item_type = task.item_type();
    let explicit_leaf = task
        .category_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty());
    let category_id = categories.resolve(item_type, explicit_leaf);
    let allowed_categories: Vec<String> =
        explicit_leaf.map(|id| vec![id.to_string()]).unwrap_or_default();

    let conditions = conditions(task);
    let condition_values: Vec<String> = conditions
        .iter()
        .map(|c| c.aspect_value().to_string())
        .collect();

    let mut filters = Vec::new();
    if let Some(price) = price_clause(task.min_price, task.max_price) {
        filters.push(price);
    }
    filters.push(format!(
        "itemStartDate:[{}..]",
        watermark(task, now).to_rfc3339_opts(SecondsFormat::Millis, true)
    ));
    let formats: Vec<&str> = task
        .listing_formats
        .iter()
        .filter_map(|f| f.buying_option())
        .collect();
    if !formats.is_empty() {
        filters.push(format!("buyingOptions:{{{}}}", formats.join("|")));
    }
    if category_id.is_none() && !conditions.is_empty() {
        let mut values: Vec<&str> = Vec::new();
        for value in conditions.iter().map(|c| c.global_value()) {
            if !values.contains(&value) {
                values.push(value);
            }
        }
        filters.push(format!("conditions:{{{}}}", values.join("|")));
    }

    // One entry per request: (keywords, metal tag, aspect filter).
    let mut variants: Vec<(String, Option<String>, AspectFilter)> = Vec::new();
    match &task.filters {
        TaskFilters::Jewelry(f) => {
            let metals: Vec<String> = f
                .metals
                .iter()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            let shared = |aspects: &mut AspectFilter| {
                aspects.push("Main Stone", &f.main_stone);
                aspects.push("Brand", &f.brand);
                aspects.push("Metal Purity", &f.purity);
            };
            if metals.is_empty() {
                let mut aspects = AspectFilter::default();
                shared(&mut aspects);
                variants.push((base_keywords(item_type).to_string(), None, aspects));
            } else {
                for metal in metals {
                    let mut aspects = AspectFilter::default();
                    aspects.push("Metal", std::slice::from_ref(&metal));
                    shared(&mut aspects);
                    let keywords = format!("{} jewelry", metal.to_lowercase());
                    variants.push((keywords, Some(metal), aspects));
                }
            }
        }
        TaskFilters::Watch(f) => {
            let mut aspects = AspectFilter::default();
            aspects.push("Brand", &f.brand);
            aspects.push("Movement", &f.movement);
            aspects.push("Case Material", &f.case_material);
            variants.push((base_keywords(item_type).to_string(), None, aspects));
        }
        TaskFilters::Gemstone(f) => {
            let mut aspects = AspectFilter::default();
            aspects.push("Gemstone", &f.stone_types);
            aspects.push("Cut", &f.cut);
            variants.push((base_keywords(item_type).to_string(), None, aspects));
        }
    }

    variants
        .into_iter()
        .map(|(keywords, metal, mut aspects)| {
            aspects.push("Condition", &condition_values);
            QuerySpec {
                keywords,
                aspect_filter: aspects.render(category_id.as_deref()),
                category_id: category_id.clone(),
                filters: filters.clone(),
                limit,
                metal,
                allowed_categories: allowed_categories.clone(),
            }
        })
        .collect()
}
