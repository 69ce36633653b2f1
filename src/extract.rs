//! Pure attribute extraction from listing title, item specifics and description.
//!
//! Nothing in here performs I/O or returns an error: ambiguous input yields `None`
//! (or the documented fallback) so a malformed listing can never stop a batch.

use crate::models::{ExtractedAttributes, ItemSpecs, ListingItem, MetalType, ShippingCost};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

pub const VALID_KARATS: &[u32] = &[8, 9, 10, 14, 18, 22, 24];

pub const GRAMS_PER_OUNCE: f64 = 28.3495;
pub const GRAMS_PER_DWT: f64 = 1.555;
pub const MAX_PLAUSIBLE_WEIGHT_G: f64 = 1000.0;

const KARAT_SPEC_KEYS: &[&str] = &["metal purity", "purity", "karat", "gold purity", "metal"];
const WEIGHT_SPEC_KEYS: &[&str] = &[
    "total weight",
    "item weight",
    "metal weight",
    "gold weight",
    "weight",
    "total gram weight",
];
const METAL_SPEC_KEYS: &[&str] = &["metal", "base metal", "material"];
const PURITY_SPEC_KEYS: &[&str] = &["metal purity", "purity", "fineness"];

/// Gold hallmarks in parts per thousand.
const MILLESIMAL_TO_KARAT: &[(u32, u32)] = &[
    (333, 8),
    (375, 9),
    (417, 10),
    (585, 14),
    (750, 18),
    (916, 22),
    (999, 24),
];

static KARAT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(\d{1,2})\s?(?:k|kt|karat|karats)\b").expect("karat regex"));

static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,3})\b").expect("number regex"));

static WEIGHT_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(\d+(?:\.\d+)?|\.\d+)\s*(grams|gram|gms|gm|gr|g|ounces|ounce|oz|dwt|pennyweight)\b",
    )
    .expect("weight regex")
});

static UNITLESS_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+(?:\.\d+)?|\.\d+)\s*$").expect("unitless regex"));

// ".1.08g" is a recurring seller typo for "1.08g".
static DOUBLE_LEADING_PERIOD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(^|[^\d.])\.(\d+\.\d+)").expect("typo regex"));

static FINENESS_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{3})\b").expect("fineness regex"));

/// Looks up the first spec value whose key matches one of `keys`, in key order.
fn spec_value<'a>(specs: &'a ItemSpecs, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| {
        specs
            .iter()
            .find(|(name, _)| name.trim().eq_ignore_ascii_case(key))
            .map(|(_, value)| value.as_str())
            .filter(|value| !value.trim().is_empty())
    })
}

fn karat_from_text(text: &str) -> Option<u32> {
    KARAT_TOKEN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .find(|karat| VALID_KARATS.contains(karat))
}

fn karat_from_spec(value: &str) -> Option<u32> {
    if let Some(karat) = karat_from_text(value) {
        return Some(karat);
    }
    BARE_NUMBER
        .captures_iter(value)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .find_map(|number| {
            if VALID_KARATS.contains(&number) {
                Some(number)
            } else {
                MILLESIMAL_TO_KARAT
                    .iter()
                    .find(|(mark, _)| *mark == number)
                    .map(|(_, karat)| *karat)
            }
        })
}

/// Karat from specs, then title, then description. Numbers outside the valid karat
/// domain (ring sizes, model numbers) are ignored.
pub fn extract_karat(title: &str, specs: &ItemSpecs, description: Option<&str>) -> Option<u32> {
    let from_specs = KARAT_SPEC_KEYS.iter().find_map(|key| {
        spec_value(specs, &[key]).and_then(karat_from_spec)
    });
    from_specs
        .or_else(|| karat_from_text(title))
        .or_else(|| description.and_then(karat_from_text))
}

fn repair_weight_text(text: &str) -> String {
    DOUBLE_LEADING_PERIOD.replace_all(text, "$1$2").into_owned()
}

fn unit_to_grams(value: f64, unit: &str) -> f64 {
    match unit.to_lowercase().as_str() {
        "ounces" | "ounce" | "oz" => value * GRAMS_PER_OUNCE,
        "dwt" | "pennyweight" => value * GRAMS_PER_DWT,
        _ => value,
    }
}

fn plausible(grams: f64) -> Option<f64> {
    (grams > 0.0 && grams < MAX_PLAUSIBLE_WEIGHT_G).then_some(grams)
}

fn weight_from_text(text: &str) -> Option<f64> {
    let repaired = repair_weight_text(text);
    WEIGHT_TOKEN.captures_iter(&repaired).find_map(|caps| {
        let value = caps.get(1)?.as_str().parse::<f64>().ok()?;
        let unit = caps.get(2)?.as_str();
        plausible(unit_to_grams(value, unit))
    })
}

fn weight_from_spec(value: &str) -> Option<f64> {
    if let Some(grams) = weight_from_text(value) {
        return Some(grams);
    }
    let repaired = repair_weight_text(value);
    let caps = UNITLESS_NUMBER.captures(&repaired)?;
    let grams = caps.get(1)?.as_str().parse::<f64>().ok()?;
    plausible(grams)
}

/// Weight in grams from specs, then title, then description. Only numbers followed by
/// a weight unit count, so karat markings never leak into the weight.
pub fn extract_weight(title: &str, specs: &ItemSpecs, description: Option<&str>) -> Option<f64> {
    let from_specs = WEIGHT_SPEC_KEYS.iter().find_map(|key| {
        spec_value(specs, &[key]).and_then(weight_from_spec)
    });
    from_specs
        .or_else(|| weight_from_text(title))
        .or_else(|| description.and_then(weight_from_text))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetalInfo {
    pub metal: MetalType,
    /// Parts per thousand; `None` for gold, whose fineness is carried by the karat.
    pub purity: Option<u32>,
}

fn allowed_purities(metal: MetalType) -> &'static [u32] {
    match metal {
        MetalType::Gold => &[],
        MetalType::Silver => &[999, 925, 900, 800],
        MetalType::Platinum => &[950, 900, 850],
        MetalType::Palladium => &[950, 500],
    }
}

fn default_purity(metal: MetalType) -> Option<u32> {
    match metal {
        MetalType::Gold => None,
        MetalType::Silver => Some(925),
        MetalType::Platinum => Some(950),
        MetalType::Palladium => Some(950),
    }
}

fn metal_from_text(text: &str) -> Option<MetalType> {
    if text.contains("platinum") || text.contains("pt950") || text.contains("pt900") {
        Some(MetalType::Platinum)
    } else if text.contains("palladium") {
        Some(MetalType::Palladium)
    } else if text.contains("silver") || text.contains("sterling") || text.contains("925") {
        Some(MetalType::Silver)
    } else if text.contains("gold") {
        Some(MetalType::Gold)
    } else {
        None
    }
}

fn purity_from_number(text: &str, metal: MetalType) -> Option<u32> {
    let allowed = allowed_purities(metal);
    FINENESS_TOKEN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1)?.as_str().parse::<u32>().ok())
        .find(|value| allowed.contains(value))
}

fn purity_from_keywords(text: &str, metal: MetalType) -> Option<u32> {
    match metal {
        MetalType::Silver if text.contains("fine silver") => Some(999),
        MetalType::Silver if text.contains("sterling") => Some(925),
        MetalType::Silver if text.contains("coin silver") => Some(900),
        _ => None,
    }
}

/// Classifies the metal and, for non-gold metals, its fineness. The structured spec
/// metal field decides the metal when present; an explicit purity spec decides the
/// fineness ahead of any marker found in the combined text.
pub fn detect_metal_type(title: &str, specs: &ItemSpecs) -> MetalInfo {
    let spec_metal = spec_value(specs, METAL_SPEC_KEYS).map(str::to_lowercase);
    let spec_purity = spec_value(specs, PURITY_SPEC_KEYS).map(str::to_lowercase);
    let title_lower = title.to_lowercase();

    let metal = spec_metal
        .as_deref()
        .and_then(metal_from_text)
        .or_else(|| spec_purity.as_deref().and_then(metal_from_text))
        .or_else(|| {
            // "14K gold ... silver clasp" is a gold piece.
            (title_lower.contains("gold") && karat_from_text(&title_lower).is_some())
                .then_some(MetalType::Gold)
        })
        .or_else(|| metal_from_text(&title_lower))
        .unwrap_or_default();

    if metal == MetalType::Gold {
        return MetalInfo { metal, purity: None };
    }

    let combined = format!(
        "{} {} {}",
        title_lower,
        spec_metal.as_deref().unwrap_or(""),
        spec_purity.as_deref().unwrap_or("")
    );
    let purity = spec_purity
        .as_deref()
        .and_then(|value| {
            purity_from_number(value, metal).or_else(|| purity_from_keywords(value, metal))
        })
        .or_else(|| purity_from_number(&combined, metal))
        .or_else(|| purity_from_keywords(&combined, metal))
        .or_else(|| default_purity(metal));

    MetalInfo { metal, purity }
}

fn money_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_start_matches('$').parse::<f64>().ok(),
        Value::Object(map) => map.get("value").and_then(money_value),
        _ => None,
    }
}

fn cost_type(value: &Value) -> Option<ShippingCost> {
    let raw = value.as_str()?.trim().to_uppercase();
    match raw.as_str() {
        "FREE" => Some(ShippingCost {
            cost: 0.0,
            kind: "free".into(),
        }),
        "CALCULATED" => Some(ShippingCost {
            cost: 0.0,
            kind: "calculated".into(),
        }),
        _ => None,
    }
}

fn fixed(cost: f64) -> ShippingCost {
    if cost <= 0.0 {
        ShippingCost {
            cost: 0.0,
            kind: "free".into(),
        }
    } else {
        ShippingCost {
            cost,
            kind: "fixed".into(),
        }
    }
}

/// Normalises the provider's shipping shapes into `{cost, kind}`:
/// a bare number or string, `{value}`, `shippingServiceCost`/`shippingCost` objects,
/// `shippingOptions` arrays (first option wins) and the FREE/CALCULATED cost-type enum.
/// Anything else is `{0, "unknown"}`.
pub fn extract_shipping_cost(details: &Value) -> ShippingCost {
    match details {
        Value::Number(_) => money_value(details).map(fixed).unwrap_or_else(ShippingCost::unknown),
        Value::String(_) => cost_type(details)
            .or_else(|| money_value(details).map(fixed))
            .unwrap_or_else(ShippingCost::unknown),
        Value::Array(options) => options
            .first()
            .map(extract_shipping_cost)
            .unwrap_or_else(ShippingCost::unknown),
        Value::Object(map) => {
            if let Some(options) = map.get("shippingOptions") {
                return extract_shipping_cost(options);
            }
            let cost_kind = map.get("shippingCostType").and_then(cost_type);
            if let Some(kind) = cost_kind {
                return kind;
            }
            for key in ["shippingServiceCost", "shippingCost", "cost"] {
                if let Some(cost) = map.get(key).and_then(money_value) {
                    return fixed(cost);
                }
            }
            if let Some(cost) = map.get("value").and_then(money_value) {
                return fixed(cost);
            }
            ShippingCost::unknown()
        }
        _ => ShippingCost::unknown(),
    }
}

pub fn extract_attributes(item: &ListingItem) -> ExtractedAttributes {
    let description = item.description.as_deref();
    let metal = detect_metal_type(&item.title, &item.specs);
    let shipping = extract_shipping_cost(&item.shipping);
    let karat = if metal.metal == MetalType::Gold {
        extract_karat(&item.title, &item.specs, description)
    } else {
        None
    };
    ExtractedAttributes {
        karat,
        weight_g: extract_weight(&item.title, &item.specs, description),
        metal: Some(metal.metal),
        purity: metal.purity,
        shipping_cost: (shipping.kind != "unknown").then_some(shipping.cost),
        shipping_type: Some(shipping.kind),
    }
}
