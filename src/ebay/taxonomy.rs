use crate::models::ItemType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Coarse item type → eBay category, used when a task carries no leaf category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryTable {
    entries: HashMap<ItemType, String>,
}

impl Default for CategoryTable {
    fn default() -> Self {
        let entries = [
            (ItemType::Jewelry, "4196"),
            (ItemType::Watch, "31387"),
            (ItemType::Gemstone, "491"),
        ]
        .into_iter()
        .map(|(ty, id)| (ty, id.to_string()))
        .collect();
        Self { entries }
    }
}

impl CategoryTable {
    pub fn with_overrides(mut self, overrides: HashMap<ItemType, String>) -> Self {
        for (ty, id) in overrides {
            if id.trim().is_empty() {
                self.entries.remove(&ty);
            } else {
                self.entries.insert(ty, id.trim().to_string());
            }
        }
        self
    }

    pub fn get(&self, item_type: ItemType) -> Option<&str> {
        self.entries.get(&item_type).map(String::as_str)
    }

    /// Explicit leaf id first, then the coarse table.
    pub fn resolve(&self, item_type: ItemType, leaf: Option<&str>) -> Option<String> {
        leaf.map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .or_else(|| self.get(item_type).map(str::to_string))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EbayCondition {
    New,
    NewOther,
    PreOwned,
    ForParts,
}

impl EbayCondition {
    pub fn from_raw(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace(['-', '_'], " ").as_str() {
            "new" | "new with tags" | "brand new" => Some(Self::New),
            "new other" | "new without tags" | "open box" => Some(Self::NewOther),
            "used" | "pre owned" | "preowned" => Some(Self::PreOwned),
            "for parts" | "for parts or not working" | "parts" => Some(Self::ForParts),
            _ => None,
        }
    }

    /// Value used inside an aspect filter (`Condition:{...}`).
    pub fn aspect_value(&self) -> &'static str {
        match self {
            Self::New => "New",
            Self::NewOther => "New other (see details)",
            Self::PreOwned => "Pre-owned",
            Self::ForParts => "For parts or not working",
        }
    }

    /// Value used in the global `conditions:{...}` filter.
    pub fn global_value(&self) -> &'static str {
        match self {
            Self::New | Self::NewOther => "NEW",
            Self::PreOwned => "USED",
            Self::ForParts => "UNSPECIFIED",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_category_wins() {
        let table = CategoryTable::default();
        assert_eq!(
            table.resolve(ItemType::Jewelry, Some("164330")).as_deref(),
            Some("164330")
        );
        assert_eq!(table.resolve(ItemType::Jewelry, Some("  ")).as_deref(), Some("4196"));
        assert_eq!(table.resolve(ItemType::Watch, None).as_deref(), Some("31387"));
    }

    #[test]
    fn empty_override_removes_entry() {
        let table = CategoryTable::default()
            .with_overrides(HashMap::from([(ItemType::Gemstone, String::new())]));
        assert_eq!(table.resolve(ItemType::Gemstone, None), None);
    }

    #[test]
    fn condition_aliases() {
        assert_eq!(EbayCondition::from_raw("Pre-owned"), Some(EbayCondition::PreOwned));
        assert_eq!(EbayCondition::from_raw("NEW"), Some(EbayCondition::New));
        assert_eq!(EbayCondition::from_raw("mint"), None);
    }
}
