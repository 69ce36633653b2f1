use crate::models::{ExtractedAttributes, MetalType};
use crate::prices::SpotPrices;
use serde::Serialize;

/// Fraction of pure metal: values up to 24 are karats, larger values are parts per
/// thousand.
pub fn purity_fraction(purity_or_karat: f64) -> Option<f64> {
    if !purity_or_karat.is_finite() || purity_or_karat <= 0.0 {
        None
    } else if purity_or_karat <= 24.0 {
        Some(purity_or_karat / 24.0)
    } else if purity_or_karat <= 1000.0 {
        Some(purity_or_karat / 1000.0)
    } else {
        None
    }
}

/// `weight_g × purity × price_per_gram`, rounded to cents. Any missing or nonsensical
/// input yields `None`.
pub fn calculate_melt_value(
    purity_or_karat: Option<f64>,
    weight_g: Option<f64>,
    price_per_gram: Option<f64>,
) -> Option<f64> {
    let fraction = purity_fraction(purity_or_karat?)?;
    let weight = weight_g.filter(|w| w.is_finite() && *w > 0.0)?;
    let price = price_per_gram.filter(|p| p.is_finite() && *p > 0.0)?;
    let pure_grams = weight * fraction;
    Some(round_cents(pure_grams * price))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SpotQuote {
    pub usd_per_gram: f64,
}

pub fn calculate_gold_melt_value(
    karat: Option<u32>,
    weight_g: Option<f64>,
    spot: Option<&SpotQuote>,
) -> Option<f64> {
    calculate_melt_value(
        karat.map(f64::from),
        weight_g,
        spot.map(|quote| quote.usd_per_gram),
    )
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Valuation {
    pub spot_price_per_gram: Option<f64>,
    pub melt_value: Option<f64>,
    pub total_cost: f64,
    pub margin: Option<f64>,
}

/// Combines extracted attributes with the current spot table. Gold is valued by karat,
/// other metals by millesimal purity.
pub fn value_listing(
    attrs: &ExtractedAttributes,
    price: f64,
    spot: Option<&SpotPrices>,
) -> Valuation {
    let metal = attrs.metal.unwrap_or_default();
    let spot_price = spot.and_then(|table| table.usd_per_gram(metal));
    let purity = match metal {
        MetalType::Gold => attrs.karat.map(f64::from),
        _ => attrs.purity.map(f64::from),
    };
    let melt_value = calculate_melt_value(purity, attrs.weight_g, spot_price);
    let total_cost = round_cents(price + attrs.shipping_cost.unwrap_or(0.0));
    Valuation {
        spot_price_per_gram: spot_price,
        melt_value,
        total_cost,
        margin: melt_value.map(|melt| round_cents(melt - total_cost)),
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gold_melt_value() {
        let quote = SpotQuote { usd_per_gram: 80.0 };
        assert_eq!(calculate_gold_melt_value(Some(18), Some(10.0), Some(&quote)), Some(600.0));
    }

    #[test]
    fn missing_inputs_yield_none() {
        let quote = SpotQuote { usd_per_gram: 80.0 };
        assert_eq!(calculate_gold_melt_value(None, Some(10.0), Some(&quote)), None);
        assert_eq!(calculate_gold_melt_value(Some(18), None, Some(&quote)), None);
        assert_eq!(calculate_gold_melt_value(Some(18), Some(10.0), None), None);
        assert_eq!(calculate_melt_value(Some(f64::NAN), Some(1.0), Some(1.0)), None);
    }

    #[test]
    fn millesimal_purity() {
        let value = calculate_melt_value(Some(925.0), Some(10.0), Some(1.0));
        assert_eq!(value, Some(9.25));
    }

    #[test]
    fn listing_valuation_includes_shipping_in_cost() {
        let attrs = ExtractedAttributes {
            karat: Some(14),
            weight_g: Some(6.0),
            metal: Some(MetalType::Gold),
            shipping_cost: Some(5.0),
            shipping_type: Some("fixed".into()),
            ..Default::default()
        };
        let spot = SpotPrices {
            gold: Some(96.0),
            ..Default::default()
        };
        let valuation = value_listing(&attrs, 200.0, Some(&spot));
        assert_eq!(valuation.melt_value, Some(336.0));
        assert_eq!(valuation.total_cost, 205.0);
        assert_eq!(valuation.margin, Some(131.0));
    }

    #[test]
    fn listing_valuation_without_spot_has_no_melt() {
        let attrs = ExtractedAttributes {
            karat: Some(14),
            weight_g: Some(6.0),
            ..Default::default()
        };
        let valuation = value_listing(&attrs, 100.0, None);
        assert_eq!(valuation.melt_value, None);
        assert_eq!(valuation.margin, None);
        assert_eq!(valuation.total_cost, 100.0);
    }
}
