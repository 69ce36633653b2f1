//! Ordered rejection rules for candidate listings. Every rule is a pure function
//! returning a [`Verdict`]; chains stop at the first failure.

use crate::models::{ItemSpecs, JewelryFilters, ListingItem, Task, TaskFilters};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Verdict {
    pub passed: bool,
    pub reason: Option<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self {
            passed: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
        }
    }

    pub fn reason(&self) -> &str {
        self.reason.as_deref().unwrap_or("")
    }
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("eligibility regex")
}

static BAD_METAL: Lazy<Regex> = Lazy::new(|| {
    re(concat!(
        r"(?i)\b(electroplated|plated|plating|gold[\s-]?filled|filled|base metal|overlay|clad|",
        r"hge|hgp|rgp|gep|gf)\b"
    ))
});

static BASE_METAL: Lazy<Regex> = Lazy::new(|| {
    re(concat!(
        r"(?i)\b(stainless steel|surgical steel|steel|titanium|tungsten|brass|copper|bronze|",
        r"pewter|nickel|zinc|aluminum|aluminium|alloy|cobalt chrome)\b"
    ))
});

/// "nickel free", "lead-free": the metal is named only to say it is absent.
static METAL_FREE_PHRASE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b(nickel|lead|cadmium|copper|brass|steel|alloy)[\s-]?free\b")
});

static MULTI_TONE: Lazy<Regex> =
    Lazy::new(|| re(r"(?i)\b(two|tri|three|2|3|dual|multi)[\s-]?tones?d?\b"));

static FAKE_TONE: Lazy<Regex> = Lazy::new(|| {
    re(r"(?i)\b((rose\s)?gold|silver)[\s-]?tone(d)?\b|\b(goldtone|silvertone)\b")
});

static COSTUME: Lazy<Regex> = Lazy::new(|| {
    re(concat!(
        r"(?i)\b(rhinestones?|vermeil|gold[\s-]filled|costume|fashion jewelry|plastic|acrylic|",
        r"resin|faux|imitation|glass beads?|lucite)\b"
    ))
});

static TOOL: Lazy<Regex> = Lazy::new(|| {
    re(concat!(
        r"(?i)\b(testers?|test(ing)? kit|acid test|display (stands?|busts?|cases?|trays?)|",
        r"jewelry (displays?|trays?)|necklace busts?|pliers|mandrels?|loupes?|ring sizers?|",
        r"ring size gauges?|polishing cloth|tweezers|(digital|pocket|gram|carat|jewelry) scales?)\b"
    ))
});

static NO_STONE_PHRASE: Lazy<Regex> = Lazy::new(|| {
    re(concat!(
        r"(?i)\b(no|without|w/o)\s+(main\s+)?(stones?|gems?|gemstones?|diamonds?)\b|",
        r"\bstone[\s-]?less\b|\bdiamond[\s-]cut\b"
    ))
});

static STONE_WORD: Lazy<Regex> = Lazy::new(|| {
    re(concat!(
        r"(?i)\b(diamonds?|rub(y|ies)|sapphires?|emeralds?|opals?|pearls?|amethysts?|topaz|",
        r"garnets?|aquamarines?|peridots?|tanzanite|turquoise|onyx|jade|citrine|tourmalines?|",
        r"morganite|moissanite|cubic zirconia|cz|gemstones?|gems?|birthstones?|stones?)\b"
    ))
});

const STONE_SPEC_KEYS: &[&str] =
    &["main stone", "main stone type", "gemstone", "stone type", "stone"];
const METAL_SPEC_KEYS: &[&str] = &["metal", "base metal", "material", "metal purity", "purity"];
const EMPTY_STONE_VALUES: &[&str] = &[
    "",
    "none",
    "no stone",
    "no stones",
    "n/a",
    "na",
    "not applicable",
    "no main stone",
    "unknown",
];

fn spec_values<'a>(
    specs: &'a ItemSpecs,
    keys: &'a [&'a str],
) -> impl Iterator<Item = &'a str> + 'a {
    specs
        .iter()
        .filter(move |(name, _)| keys.iter().any(|k| name.trim().eq_ignore_ascii_case(k)))
        .map(|(_, value)| value.as_str())
}

fn metal_text(title: &str, specs: &ItemSpecs) -> String {
    let mut text = title.to_string();
    for value in spec_values(specs, METAL_SPEC_KEYS) {
        text.push(' ');
        text.push_str(value);
    }
    text
}

/// Coarse metal classes named in free text.
fn metal_classes(text: &str) -> Vec<&'static str> {
    let lower = text.to_lowercase();
    let mut out = Vec::new();
    if lower.contains("silver") || lower.contains("sterling") || lower.contains("925") {
        out.push("silver");
    }
    if lower.contains("platinum") {
        out.push("platinum");
    }
    if lower.contains("palladium") {
        out.push("palladium");
    }
    if lower.contains("gold") {
        out.push("gold");
    }
    out
}

/// Rule 1.
pub fn check_bad_metal(title: &str, specs: &ItemSpecs) -> Verdict {
    match BAD_METAL.find(&metal_text(title, specs)) {
        Some(hit) => Verdict::fail(format!("bad metal token: {}", hit.as_str().to_lowercase())),
        None => Verdict::pass(),
    }
}

/// Rule 2. Only applies when the task selects metals and the specs name one.
pub fn check_unselected_metal(specs: &ItemSpecs, selected: &[String]) -> Verdict {
    if selected.is_empty() {
        return Verdict::pass();
    }
    let wanted: Vec<&str> = selected.iter().flat_map(|m| metal_classes(m)).collect();
    let named: Vec<&str> = spec_values(specs, METAL_SPEC_KEYS)
        .flat_map(metal_classes)
        .collect();
    match named.into_iter().find(|class| !wanted.contains(class)) {
        Some(class) => Verdict::fail(format!("unselected metal in item specifics: {class}")),
        None => Verdict::pass(),
    }
}

/// Rule 3.
pub fn check_base_metal(title: &str, specs: &ItemSpecs) -> Verdict {
    let text = metal_text(title, specs);
    let stripped = METAL_FREE_PHRASE.replace_all(&text, " ");
    match BASE_METAL.find(&stripped) {
        Some(hit) => Verdict::fail(format!("base metal: {}", hit.as_str().to_lowercase())),
        None => Verdict::pass(),
    }
}

/// "gold tone" and friends, ignoring genuine two-tone / tri-tone descriptions.
pub fn is_fake_tone(text: &str) -> bool {
    let stripped = MULTI_TONE.replace_all(text, " ");
    FAKE_TONE.is_match(&stripped)
}

/// Rule 4.
pub fn check_fake_tone(title: &str) -> Verdict {
    if is_fake_tone(title) {
        Verdict::fail("fake tone (gold/silver tone)")
    } else {
        Verdict::pass()
    }
}

/// Rule 5.
pub fn check_costume(title: &str) -> Verdict {
    match COSTUME.find(title) {
        Some(hit) => Verdict::fail(format!("costume jewelry: {}", hit.as_str().to_lowercase())),
        None => Verdict::pass(),
    }
}

/// Rule 6.
pub fn check_tool(title: &str) -> Verdict {
    match TOOL.find(title) {
        Some(hit) => Verdict::fail(format!("tool or equipment: {}", hit.as_str().to_lowercase())),
        None => Verdict::pass(),
    }
}

/// Rule 7.
pub fn check_exclude_keywords(title: &str, keywords: &[String]) -> Verdict {
    let lower = title.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .find(|k| !k.is_empty() && lower.contains(k.as_str()))
        .map(|k| Verdict::fail(format!("excluded keyword: {k}")))
        .unwrap_or_else(Verdict::pass)
}

/// Rule 8.
pub fn check_stone(title: &str, specs: &ItemSpecs, no_stone: bool) -> Verdict {
    if !no_stone {
        return Verdict::pass();
    }
    let spec_stone = spec_values(specs, STONE_SPEC_KEYS)
        .map(|v| v.trim().to_lowercase())
        .find(|v| !EMPTY_STONE_VALUES.contains(&v.as_str()));
    if let Some(stone) = spec_stone {
        return Verdict::fail(format!("has stone in item specifics: {stone}"));
    }
    let stripped = NO_STONE_PHRASE.replace_all(title, " ");
    match STONE_WORD.find(&stripped) {
        Some(hit) => Verdict::fail(format!(
            "has stone in title: {}",
            hit.as_str().to_lowercase()
        )),
        None => Verdict::pass(),
    }
}

fn first_failure(rules: &[&dyn Fn() -> Verdict]) -> Verdict {
    rules
        .iter()
        .map(|rule| rule())
        .find(|v| !v.passed)
        .unwrap_or_else(Verdict::pass)
}

/// Full jewelry chain, rules 1 through 8.
pub fn passes_jewelry_item_specs(
    title: &str,
    specs: &ItemSpecs,
    filters: &JewelryFilters,
    exclude_keywords: &[String],
) -> Verdict {
    let rules: [&dyn Fn() -> Verdict; 8] = [
        &|| check_bad_metal(title, specs),
        &|| check_unselected_metal(specs, &filters.metals),
        &|| check_base_metal(title, specs),
        &|| check_fake_tone(title),
        &|| check_costume(title),
        &|| check_tool(title),
        &|| check_exclude_keywords(title, exclude_keywords),
        &|| check_stone(title, specs, filters.no_stone),
    ];
    first_failure(&rules)
}

/// Dispatches by item type: jewelry runs the full chain, watches skip the metal and
/// stone rules, loose gemstones only reject tools and excluded keywords.
pub fn check_item(task: &Task, item: &ListingItem) -> Verdict {
    let title = item.title.as_str();
    let exclude = task.exclude_keywords.as_slice();
    match &task.filters {
        TaskFilters::Jewelry(filters) => {
            passes_jewelry_item_specs(title, &item.specs, filters, exclude)
        }
        TaskFilters::Watch(_) => first_failure(&[
            &|| check_costume(title),
            &|| check_tool(title),
            &|| check_exclude_keywords(title, exclude),
        ]),
        TaskFilters::Gemstone(_) => first_failure(&[
            &|| check_tool(title),
            &|| check_exclude_keywords(title, exclude),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(pairs: &[(&str, &str)]) -> ItemSpecs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn gold_only() -> JewelryFilters {
        JewelryFilters {
            metals: vec!["Gold".into()],
            ..Default::default()
        }
    }

    #[test]
    fn vermeil_is_costume() {
        let v = passes_jewelry_item_specs(
            "Gold Vermeil Earrings",
            &ItemSpecs::new(),
            &JewelryFilters::default(),
            &[],
        );
        assert!(!v.passed);
        assert!(v.reason().contains("vermeil"), "{}", v.reason());
    }

    #[test]
    fn unselected_silver_in_specs_fails() {
        let item_specs = specs(&[("metal", "Sterling Silver")]);
        let v = passes_jewelry_item_specs("Sterling Silver Ring", &item_specs, &gold_only(), &[]);
        assert!(!v.passed);
        assert!(v.reason().contains("silver"));

        let both = JewelryFilters {
            metals: vec!["Gold".into(), "Silver".into()],
            ..Default::default()
        };
        let v = passes_jewelry_item_specs("Sterling Silver Ring", &item_specs, &both, &[]);
        assert!(v.passed, "{:?}", v.reason);
    }

    #[test]
    fn purity_spec_names_silver() {
        let v = check_unselected_metal(&specs(&[("metal purity", "925")]), &["Yellow Gold".into()]);
        assert!(!v.passed);
        let yellow = specs(&[("metal", "Yellow Gold")]);
        assert!(check_unselected_metal(&yellow, &["Gold".into()]).passed);
        assert!(check_unselected_metal(&specs(&[("metal", "Sterling Silver")]), &[]).passed);
    }

    #[test]
    fn fake_tone_carve_out() {
        assert!(!is_fake_tone("two-tone gold"));
        assert!(!is_fake_tone("14k Tri Tone Gold Bracelet"));
        assert!(is_fake_tone("gold tone"));
        assert!(is_fake_tone("Vintage Silvertone Brooch"));
        assert!(is_fake_tone("Two-Tone Ring with gold-tone clasp"));
    }

    #[test]
    fn plated_reason() {
        let v = passes_jewelry_item_specs("Gold Plated Ring", &ItemSpecs::new(), &gold_only(), &[]);
        assert!(!v.passed);
        assert!(v.reason().contains("plated"));
    }

    #[test]
    fn base_metals_rejected() {
        assert!(!check_base_metal("Mens Tungsten Band", &ItemSpecs::new()).passed);
        assert!(!check_base_metal("Ring", &specs(&[("metal", "Stainless Steel")])).passed);
        assert!(check_base_metal("14k Gold Band", &ItemSpecs::new()).passed);
    }

    #[test]
    fn metal_free_phrasing_is_not_a_base_metal() {
        let none = ItemSpecs::new();
        assert!(check_base_metal("14K Yellow Gold Hoop Earrings Nickel Free", &none).passed);
        assert!(check_base_metal("18k Gold Studs, nickel-free posts", &none).passed);
        assert!(!check_base_metal("Nickel Free Stainless Steel Hoops", &none).passed);
    }

    #[test]
    fn tools_rejected() {
        let v = check_tool("Electronic Gold Tester Acid Free");
        assert!(!v.passed);
        assert!(v.reason().contains("tester"));
        assert!(check_tool("14k Gold Rope Chain").passed);
        assert!(!check_tool("Digital Pocket Scale 0.01g for Gold").passed);
        assert!(!check_tool("Black Velvet Necklace Display Stand").passed);
    }

    #[test]
    fn jewelry_vocabulary_is_not_equipment() {
        let titles = [
            "14K Gold Signet Ring in Original Ring Box",
            "18K Gold Fish Scale Link Bracelet 12g",
            "14K Gold Charm Bracelet from Estate Jewelry Box",
        ];
        for title in titles {
            let v = passes_jewelry_item_specs(title, &ItemSpecs::new(), &gold_only(), &[]);
            assert!(v.passed, "{title}: {:?}", v.reason);
        }
    }

    #[test]
    fn exclude_keywords_are_case_insensitive() {
        let v = check_exclude_keywords("14K Gold SCRAP lot", &["scrap".into()]);
        assert!(!v.passed);
        assert!(check_exclude_keywords("14K Gold Ring", &["  ".into()]).passed);
    }

    #[test]
    fn stone_check_respects_flag_and_phrasing() {
        assert!(!check_stone("14K Gold Diamond Ring", &ItemSpecs::new(), true).passed);
        assert!(check_stone("14K Gold Diamond Ring", &ItemSpecs::new(), false).passed);
        assert!(check_stone("14K Gold Ring, no stone", &ItemSpecs::new(), true).passed);
        assert!(check_stone("14K Gold Diamond Cut Rope Chain", &ItemSpecs::new(), true).passed);
        assert!(check_stone("18k band", &specs(&[("main stone", "No Stone")]), true).passed);
        let v = check_stone("18k band", &specs(&[("main stone", "Sapphire")]), true);
        assert!(!v.passed);
        assert!(v.reason().contains("sapphire"));
    }

    #[test]
    fn chain_stops_at_first_failure() {
        let v = passes_jewelry_item_specs(
            "Gold Plated Rhinestone Tester",
            &ItemSpecs::new(),
            &gold_only(),
            &[],
        );
        assert!(v.reason().starts_with("bad metal"));
    }

    #[test]
    fn clean_gold_ring_passes() {
        let v = passes_jewelry_item_specs(
            "14K Gold Ring, no stone",
            &specs(&[("metal", "Yellow Gold"), ("metal purity", "14k")]),
            &gold_only(),
            &[],
        );
        assert!(v.passed, "{:?}", v.reason);
    }

    #[test]
    fn watches_skip_metal_rules() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "id": "w",
            "filters": {"item_type": "watch"},
            "exclude_keywords": ["replica"]
        }))
        .expect("task");
        let mut item: ListingItem = serde_json::from_value(serde_json::json!({
            "listing_id": "1", "title": "Omega Seamaster Stainless Steel", "price": 900.0,
            "currency": "USD", "url": null, "format": "FIXED_PRICE", "seller_username": null,
            "seller_feedback_pct": null, "seller_feedback_score": null, "category_ids": [],
            "specs": {}, "description": null, "shipping": null
        }))
        .expect("item");
        assert!(check_item(&task, &item).passed);
        item.title = "Omega replica watch".into();
        assert!(!check_item(&task, &item).passed);
    }
}
