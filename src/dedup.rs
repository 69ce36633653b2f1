use crate::models::ListingItem;
use std::collections::HashSet;

/// Merges fan-out batches by listing id. The first occurrence wins and arrival order is
/// kept; the second value is the number of dropped duplicates.
pub fn dedup_listings(batches: Vec<Vec<ListingItem>>) -> (Vec<ListingItem>, usize) {
    let mut seen = HashSet::new();
    let mut unique = Vec::new();
    let mut duplicates = 0;
    for item in batches.into_iter().flatten() {
        if seen.insert(item.listing_id.clone()) {
            unique.push(item);
        } else {
            duplicates += 1;
        }
    }
    (unique, duplicates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemSpecs, ListingFormat};
    use serde_json::Value;

    fn item(id: &str, title: &str) -> ListingItem {
        ListingItem {
            listing_id: id.into(),
            title: title.into(),
            price: 10.0,
            currency: "USD".into(),
            url: None,
            format: ListingFormat::FixedPrice,
            seller_username: None,
            seller_feedback_pct: None,
            seller_feedback_score: None,
            category_ids: vec![],
            specs: ItemSpecs::new(),
            description: None,
            shipping: Value::Null,
        }
    }

    #[test]
    fn first_occurrence_wins() {
        let batches = vec![
            vec![item("1", "gold a"), item("2", "gold b")],
            vec![item("2", "silver b"), item("3", "silver c")],
            vec![item("1", "platinum a")],
        ];
        let (unique, duplicates) = dedup_listings(batches);
        let titles: Vec<&str> = unique.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["gold a", "gold b", "silver c"]);
        assert_eq!(duplicates, 2);
    }

    #[test]
    fn empty_batches() {
        let (unique, duplicates) = dedup_listings(vec![vec![], vec![]]);
        assert!(unique.is_empty());
        assert_eq!(duplicates, 0);
    }
}
