//! Normalization of warehouse rows into typed records.
//!
//! The warehouse returns either named columns or positional `col_N`
//! placeholders depending on whether result metadata was available. Every
//! field is looked up under both keys so callers never see the difference.

use serde_json::{Map, Value};
use tracing::debug;

use crate::allocation::AllocationTier;
use crate::intent::{Family, Intent};
use crate::models::{Band, RecordContext, RecordId, ResultRecord};

/// A warehouse row keyed by column name or positional placeholder.
pub type Row = Map<String, Value>;

/// Country-risk SELECT list, in order.
pub const COUNTRY_COLUMNS: &[&str] = &[
    "iso3",
    "country_name",
    "status",
    "risk_score",
    "funding_gap_ratio",
    "flood_population_exposed",
    "allocation_tier",
    "allocation_share",
];

/// Regional composite SELECT list, in order.
pub const REGIONAL_COLUMNS: &[&str] = &[
    "state_name",
    "county_name",
    "county_pcode",
    "status",
    "score",
    "proxy_gam_pct",
    "health_facility_count",
    "wfp_market_count",
    "idp_individuals",
    "returnees",
    "population_total",
    "female_share_pct",
    "allocation_tier",
    "allocation_share",
    "narrative",
];

// Policy constants. Kept exactly for compatibility with the dashboards that
// consume the same tables.
pub const RISK_RED_ABOVE: f64 = 0.15;
pub const RISK_YELLOW_ABOVE: f64 = 0.10;
pub const REGIONAL_RED_FROM: f64 = 0.80;
pub const REGIONAL_YELLOW_FROM: f64 = 0.50;

/// Placeholder key for the column at `index`.
pub fn positional(index: usize) -> String {
    format!("col_{}", index)
}

/// Value under the semantic name, else under the positional name.
pub fn pick<'a>(row: &'a Row, semantic: &str, positional: &str) -> Option<&'a Value> {
    row.get(semantic)
        .filter(|v| !v.is_null())
        .or_else(|| row.get(positional).filter(|v| !v.is_null()))
}

/// Numeric coercion; absent or non-finite values stay absent.
pub fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}

/// Only genuine strings count; blank strings are absent.
pub fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        _ => None,
    }
}

/// Band implied by a score for the given family.
pub fn band_for_score(family: Family, score: f64) -> Band {
    match family {
        Family::CountryRisk => {
            if score > RISK_RED_ABOVE {
                Band::Red
            } else if score > RISK_YELLOW_ABOVE {
                Band::Yellow
            } else {
                Band::Green
            }
        }
        Family::Regional => {
            if score >= REGIONAL_RED_FROM {
                Band::Red
            } else if score >= REGIONAL_YELLOW_FROM {
                Band::Yellow
            } else {
                Band::Green
            }
        }
    }
}

/// Explicit band if it parses, else inferred from the score.
pub fn resolve_band(explicit: Option<&Value>, score: Option<f64>, family: Family) -> Option<Band> {
    text(explicit)
        .and_then(|raw| Band::parse(&raw))
        .or_else(|| score.map(|s| band_for_score(family, s)))
}

/// Column accessor bound to one layout.
struct Columns<'a> {
    row: &'a Row,
    layout: &'static [&'static str],
}

impl<'a> Columns<'a> {
    fn get(&self, name: &str) -> Option<&'a Value> {
        let index = self.layout.iter().position(|c| *c == name)?;
        pick(self.row, name, &positional(index))
    }

    fn number(&self, name: &str) -> Option<f64> {
        number(self.get(name))
    }

    fn text(&self, name: &str) -> Option<String> {
        text(self.get(name))
    }

    fn tier(&self) -> Option<AllocationTier> {
        self.text("allocation_tier").and_then(|t| AllocationTier::parse(&t))
    }

    fn share_pct(&self) -> Option<f64> {
        self.number("allocation_share").map(|share| share * 100.0)
    }
}

/// Normalize one row for an intent; `None` when identifier, score or status
/// cannot be resolved.
pub fn normalize_row(intent: Intent, row: &Row) -> Option<ResultRecord> {
    match intent.family()? {
        Family::CountryRisk => normalize_country(row),
        Family::Regional => normalize_regional(row),
    }
}

fn normalize_country(row: &Row) -> Option<ResultRecord> {
    let cols = Columns {
        row,
        layout: COUNTRY_COLUMNS,
    };
    let iso3 = cols.text("iso3")?.to_ascii_uppercase();
    let score = cols.number("risk_score")?;
    let status = resolve_band(cols.get("status"), Some(score), Family::CountryRisk)?;

    Some(ResultRecord {
        id: RecordId::Country { iso3 },
        label: cols.text("country_name"),
        score,
        status,
        context: RecordContext {
            funding_gap_ratio: cols.number("funding_gap_ratio"),
            flood_population_exposed: cols.number("flood_population_exposed"),
            allocation_tier: cols.tier(),
            allocation_share_pct: cols.share_pct(),
            ..Default::default()
        },
    })
}

fn normalize_regional(row: &Row) -> Option<ResultRecord> {
    let cols = Columns {
        row,
        layout: REGIONAL_COLUMNS,
    };
    let region = cols.text("state_name")?;
    let subregion = cols.text("county_name")?;
    let score = cols.number("score")?;
    let status = resolve_band(cols.get("status"), Some(score), Family::Regional)?;

    Some(ResultRecord {
        id: RecordId::Subregion {
            region,
            subregion,
            subregion_code: cols.text("county_pcode"),
        },
        label: None,
        score,
        status,
        context: RecordContext {
            hunger_gam_pct: cols.number("proxy_gam_pct"),
            health_facility_count: cols.number("health_facility_count"),
            market_count: cols.number("wfp_market_count"),
            idp_individuals: cols.number("idp_individuals"),
            returnees: cols.number("returnees"),
            population: cols.number("population_total"),
            female_share_pct: cols.number("female_share_pct"),
            allocation_tier: cols.tier(),
            allocation_share_pct: cols.share_pct(),
            narrative: cols.text("narrative"),
            ..Default::default()
        },
    })
}

/// Normalize a batch, dropping rows that do not resolve.
pub fn normalize_rows(intent: Intent, rows: &[Row]) -> Vec<ResultRecord> {
    let records: Vec<ResultRecord> = rows.iter().filter_map(|row| normalize_row(intent, row)).collect();
    let dropped = rows.len() - records.len();
    if dropped > 0 {
        debug!("Dropped {} of {} rows during normalization", dropped, rows.len());
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_pick_prefers_semantic_name() {
        let r = row(json!({"iso3": "KEN", "col_0": "ETH"}));
        assert_eq!(pick(&r, "iso3", "col_0"), Some(&json!("KEN")));

        let r = row(json!({"iso3": null, "col_0": "ETH"}));
        assert_eq!(pick(&r, "iso3", "col_0"), Some(&json!("ETH")));

        let r = row(json!({}));
        assert_eq!(pick(&r, "iso3", "col_0"), None);
    }

    #[test]
    fn test_number_coercion() {
        assert_eq!(number(Some(&json!(0.25))), Some(0.25));
        assert_eq!(number(Some(&json!(" 12.5 "))), Some(12.5));
        assert_eq!(number(Some(&json!("NaN"))), None);
        assert_eq!(number(Some(&json!("inf"))), None);
        assert_eq!(number(Some(&json!("n/a"))), None);
        assert_eq!(number(Some(&json!(true))), None);
        assert_eq!(number(None), None);
    }

    #[test]
    fn test_text_requires_string() {
        assert_eq!(text(Some(&json!("Kenya"))), Some("Kenya".to_string()));
        assert_eq!(text(Some(&json!(42))), None);
        assert_eq!(text(Some(&json!("   "))), None);
    }

    #[test]
    fn test_country_bands_partition_scores() {
        let f = Family::CountryRisk;
        assert_eq!(band_for_score(f, 0.16), Band::Red);
        assert_eq!(band_for_score(f, 0.15), Band::Yellow);
        assert_eq!(band_for_score(f, 0.1000001), Band::Yellow);
        assert_eq!(band_for_score(f, 0.10), Band::Green);
        assert_eq!(band_for_score(f, -3.0), Band::Green);

        // Monotonic: scanning upward never steps down a band.
        let rank = |b: Band| match b {
            Band::Green => 0,
            Band::Yellow => 1,
            Band::Red => 2,
        };
        let mut last = 0;
        for i in 0..=400 {
            let current = rank(band_for_score(f, i as f64 / 1000.0));
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn test_regional_bands() {
        let f = Family::Regional;
        assert_eq!(band_for_score(f, 0.80), Band::Red);
        assert_eq!(band_for_score(f, 0.79), Band::Yellow);
        assert_eq!(band_for_score(f, 0.50), Band::Yellow);
        assert_eq!(band_for_score(f, 0.49), Band::Green);
    }

    #[test]
    fn test_explicit_status_wins_over_score() {
        let band = resolve_band(Some(&json!("GREEN")), Some(0.9), Family::CountryRisk);
        assert_eq!(band, Some(Band::Green));
        let band = resolve_band(Some(&json!("unknown")), Some(0.9), Family::CountryRisk);
        assert_eq!(band, Some(Band::Red));
        assert_eq!(resolve_band(None, None, Family::CountryRisk), None);
    }

    #[test]
    fn test_named_and_positional_rows_agree() {
        let named = row(json!({
            "iso3": "ssd",
            "country_name": "South Sudan",
            "status": "red",
            "risk_score": "0.21",
            "funding_gap_ratio": 0.6,
            "flood_population_exposed": "850000"
        }));
        let positional = row(json!({
            "col_0": "ssd",
            "col_1": "South Sudan",
            "col_2": "red",
            "col_3": "0.21",
            "col_4": 0.6,
            "col_5": "850000"
        }));

        let a = normalize_row(Intent::FloodHotspots, &named).unwrap();
        let b = normalize_row(Intent::FloodHotspots, &positional).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id, RecordId::Country { iso3: "SSD".into() });
        assert_eq!(a.context.flood_population_exposed, Some(850000.0));
    }

    #[test]
    fn test_status_inferred_when_missing() {
        let r = row(json!({"iso3": "KEN", "risk_score": 0.12}));
        let record = normalize_row(Intent::TopRiskCountries, &r).unwrap();
        assert_eq!(record.status, Band::Yellow);
    }

    #[test]
    fn test_rows_missing_identifier_or_score_are_dropped() {
        let rows = vec![
            row(json!({"country_name": "Nowhere", "risk_score": 0.3})),
            row(json!({"iso3": "ETH", "risk_score": "not a number"})),
            row(json!({"iso3": 7, "risk_score": 0.3})),
            row(json!({})),
            row(json!({"iso3": "ETH", "risk_score": 0.05})),
        ];
        let records = normalize_rows(Intent::TopRiskCountries, &rows);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, Band::Green);
    }

    #[test]
    fn test_regional_row() {
        let r = row(json!({
            "col_0": "Jonglei",
            "col_1": "Pibor",
            "col_2": "SS0407",
            "col_3": null,
            "col_4": "0.83",
            "col_5": "24.1",
            "col_12": "priority",
            "col_13": "0.125"
        }));
        let record = normalize_row(Intent::RegionalFacilityAllocation, &r).unwrap();
        assert_eq!(record.status, Band::Red);
        assert_eq!(record.id.display(), "Pibor, Jonglei");
        assert_eq!(record.context.hunger_gam_pct, Some(24.1));
        assert_eq!(record.context.allocation_tier, Some(AllocationTier::Priority));
        assert_eq!(record.context.allocation_share_pct, Some(12.5));
    }

    #[test]
    fn test_regional_row_needs_both_names() {
        let r = row(json!({"state_name": "Jonglei", "score": 0.4}));
        assert!(normalize_row(Intent::RegionalHungerHotspots, &r).is_none());
    }

    #[test]
    fn test_non_data_intent_yields_nothing() {
        let r = row(json!({"iso3": "KEN", "risk_score": 0.3}));
        assert!(normalize_row(Intent::Smalltalk, &r).is_none());
    }
}
