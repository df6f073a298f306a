//! SQL synthesis, one closed template family per intent.
//!
//! The only literal ever interpolated from user text is the sanitized place
//! phrase for country focus. The target API has no bind parameters, so the
//! sanitizer's character class (letters, spaces, hyphens) is what keeps
//! these statements safe. Table names are validated at config load.

use tracing::warn;

use crate::allocation::{ELEVATED_TIER_FROM, PRIORITY_TIER_FROM};
use crate::config::Tables;
use crate::intent::{extract_entity, sanitize_entity, Intent};
use crate::normalize::{REGIONAL_RED_FROM, REGIONAL_YELLOW_FROM, RISK_YELLOW_ABOVE};

/// GAM prevalence (percent) at which the hunger component saturates.
pub const GAM_SATURATION_PCT: f64 = 30.0;

/// Weights of the regional composite components; each set sums to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub hunger: f64,
    pub displacement: f64,
    pub capacity_gap: f64,
    pub coverage_gap: f64,
    pub population: f64,
}

impl Weights {
    pub fn total(&self) -> f64 {
        self.hunger + self.displacement + self.capacity_gap + self.coverage_gap + self.population
    }
}

pub const HUNGER_WEIGHTS: Weights = Weights {
    hunger: 0.55,
    displacement: 0.20,
    capacity_gap: 0.15,
    coverage_gap: 0.0,
    population: 0.10,
};

pub const STRESS_WEIGHTS: Weights = Weights {
    hunger: 0.20,
    displacement: 0.35,
    capacity_gap: 0.30,
    coverage_gap: 0.15,
    population: 0.0,
};

pub const FACILITY_ALLOCATION_WEIGHTS: Weights = Weights {
    hunger: 0.20,
    displacement: 0.0,
    capacity_gap: 0.35,
    coverage_gap: 0.25,
    population: 0.20,
};

const COUNTRY_SELECT: &str =
    "iso3, country_name, status, risk_score, funding_gap_ratio, flood_population_exposed";

/// Build the statement for an intent; `None` for intents that never query.
pub fn synthesize(intent: Intent, tables: &Tables, limit: usize, question: &str) -> Option<String> {
    let risk = tables.risk.as_str();
    let sql = match intent {
        Intent::Smalltalk | Intent::TogglePanel | Intent::ToggleLayers | Intent::SwitchMode => {
            return None
        }
        Intent::TopRiskCountries => country_ranking(
            risk,
            "risk_score IS NOT NULL",
            "risk_score DESC",
            limit,
        ),
        Intent::FloodHotspots => country_ranking(
            risk,
            "flood_population_exposed IS NOT NULL",
            "flood_population_exposed DESC, risk_score DESC",
            limit,
        ),
        Intent::StableCountries => country_ranking(
            risk,
            "LOWER(status) = 'green'",
            "risk_score ASC",
            limit,
        ),
        Intent::CrisisHotspots => country_ranking(
            risk,
            &format!(
                "LOWER(status) IN ('red', 'yellow') OR risk_score > {:.2}",
                RISK_YELLOW_ABOVE
            ),
            "risk_score DESC",
            limit,
        ),
        Intent::ForecastOutlook => country_ranking(
            risk,
            "risk_score IS NOT NULL",
            "COALESCE(funding_gap_ratio, 0) DESC, risk_score DESC",
            limit,
        ),
        Intent::CountryFocus => match extract_entity(question).map(|e| sanitize_entity(&e)) {
            Some(phrase) if !phrase.is_empty() => {
                let literal = phrase.to_ascii_uppercase();
                country_ranking(
                    risk,
                    &format!(
                        "UPPER(country_name) LIKE '%{0}%' OR UPPER(iso3) = '{0}'",
                        literal
                    ),
                    "risk_score DESC",
                    limit,
                )
            }
            _ => {
                warn!("Country focus without a place name, using top-risk ranking");
                country_ranking(risk, "risk_score IS NOT NULL", "risk_score DESC", limit)
            }
        },
        Intent::GlobalFundingAllocation => global_allocation(risk, limit),
        Intent::OpenRegionalMap | Intent::RegionalHungerHotspots => {
            regional_composite(tables, &HUNGER_WEIGHTS, RegionalShape::Hunger, limit)
        }
        Intent::RegionalSystemStress => {
            regional_composite(tables, &STRESS_WEIGHTS, RegionalShape::Stress, limit)
        }
        Intent::RegionalFacilityAllocation => regional_composite(
            tables,
            &FACILITY_ALLOCATION_WEIGHTS,
            RegionalShape::Allocation,
            limit,
        ),
    };
    Some(sql)
}

fn country_ranking(table: &str, filter: &str, order: &str, limit: usize) -> String {
    format!(
        "SELECT {select},\n       \
         CAST(NULL AS STRING) AS allocation_tier,\n       \
         CAST(NULL AS DOUBLE) AS allocation_share\n\
         FROM {table}\n\
         WHERE {filter}\n\
         ORDER BY {order}\n\
         LIMIT {limit}",
        select = COUNTRY_SELECT,
    )
}

fn tier_case(score: &str) -> String {
    format!(
        "CASE WHEN {score} >= {p:.2} THEN 'priority' WHEN {score} >= {e:.2} THEN 'elevated' ELSE 'baseline' END",
        p = PRIORITY_TIER_FROM,
        e = ELEVATED_TIER_FROM,
    )
}

fn global_allocation(table: &str, limit: usize) -> String {
    format!(
        "WITH ranked AS (\n  \
         SELECT {select}, risk_score AS allocation_score\n  \
         FROM {table}\n  \
         WHERE risk_score IS NOT NULL\n  \
         ORDER BY risk_score DESC\n  \
         LIMIT {limit}\n\
         )\n\
         SELECT {select},\n       \
         {tier} AS allocation_tier,\n       \
         allocation_score / NULLIF(SUM(allocation_score) OVER (), 0) AS allocation_share\n\
         FROM ranked\n\
         ORDER BY allocation_score DESC",
        select = COUNTRY_SELECT,
        tier = tier_case("allocation_score"),
    )
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RegionalShape {
    Hunger,
    Stress,
    Allocation,
}

fn clamp01(expr: &str) -> String {
    format!("LEAST(GREATEST({}, 0), 1)", expr)
}

fn regional_composite(tables: &Tables, weights: &Weights, shape: RegionalShape, limit: usize) -> String {
    let percentile_band = format!(
        "CASE WHEN score_percentile >= {r:.2} THEN 'red' WHEN score_percentile >= {y:.2} THEN 'yellow' ELSE 'green' END",
        r = REGIONAL_RED_FROM,
        y = REGIONAL_YELLOW_FROM,
    );
    let status = match shape {
        RegionalShape::Hunger => format!("COALESCE(LOWER(hunger_status), {})", percentile_band),
        _ => percentile_band,
    };
    let (tier, share) = match shape {
        RegionalShape::Allocation => (
            tier_case("score"),
            "score / NULLIF(SUM(score) OVER (), 0)".to_string(),
        ),
        _ => (
            "CAST(NULL AS STRING)".to_string(),
            "CAST(NULL AS DOUBLE)".to_string(),
        ),
    };

    let hunger = clamp01(&format!("COALESCE(proxy_gam_pct, 0) / {:.1}", GAM_SATURATION_PCT));
    let displacement = clamp01("COALESCE(idp_individuals / NULLIF(MAX(idp_individuals) OVER (), 0), 0)");
    let capacity_gap = clamp01(
        "1 - COALESCE(health_facility_count / NULLIF(MAX(health_facility_count) OVER (), 0), 0)",
    );
    let coverage_gap =
        clamp01("1 - COALESCE(wfp_market_count / NULLIF(MAX(wfp_market_count) OVER (), 0), 0)");
    let population = clamp01("COALESCE(population_total / NULLIF(MAX(population_total) OVER (), 0), 0)");

    format!(
        "WITH base AS (\n  \
         SELECT h.state_name, h.county_name, h.county_pcode, h.hunger_status, h.proxy_gam_pct,\n         \
         r.health_facility_count, r.wfp_market_count, h.idp_individuals, h.returnees,\n         \
         h.population_total, h.female_share_pct, h.ethnic_groups_summary\n  \
         FROM {hotspots} h\n  \
         LEFT JOIN {resources} r ON h.county_pcode = r.county_pcode\n\
         ),\n\
         components AS (\n  \
         SELECT *,\n    \
         {hunger} AS hunger_component,\n    \
         {displacement} AS displacement_component,\n    \
         {capacity_gap} AS capacity_gap_component,\n    \
         {coverage_gap} AS coverage_gap_component,\n    \
         {population} AS population_component\n  \
         FROM base\n\
         ),\n\
         scored AS (\n  \
         SELECT *,\n    \
         ROUND({wh:.2} * hunger_component + {wd:.2} * displacement_component + {wc:.2} * capacity_gap_component \
         + {wv:.2} * coverage_gap_component + {wp:.2} * population_component, 4) AS score\n  \
         FROM components\n\
         ),\n\
         ranked AS (\n  \
         SELECT *, PERCENT_RANK() OVER (ORDER BY score) AS score_percentile\n  \
         FROM scored\n  \
         ORDER BY score DESC\n  \
         LIMIT {limit}\n\
         )\n\
         SELECT state_name, county_name, county_pcode,\n       \
         {status} AS status,\n       \
         score, proxy_gam_pct, health_facility_count, wfp_market_count, idp_individuals, returnees,\n       \
         population_total, female_share_pct,\n       \
         {tier} AS allocation_tier,\n       \
         {share} AS allocation_share,\n       \
         ethnic_groups_summary AS narrative\n\
         FROM ranked\n\
         ORDER BY score DESC",
        hotspots = tables.regional_hotspots,
        resources = tables.regional_resources,
        wh = weights.hunger,
        wd = weights.displacement,
        wc = weights.capacity_gap,
        wv = weights.coverage_gap,
        wp = weights.population,
    )
}
