//! Shared data models.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::allocation::AllocationTier;
use crate::intent::Intent;

/// Three-level severity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Green,
    Yellow,
    Red,
}

impl Band {
    /// Parse a band label, ignoring case and surrounding whitespace.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "green" => Some(Band::Green),
            "yellow" => Some(Band::Yellow),
            "red" => Some(Band::Red),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Green => "green",
            Band::Yellow => "yellow",
            Band::Red => "red",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map lens the UI should display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VisualizationMode {
    #[default]
    Risk,
    Flood,
    Funding,
    Forecast,
    Hunger,
    Stress,
    Facilities,
}

impl VisualizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisualizationMode::Risk => "risk",
            VisualizationMode::Flood => "flood",
            VisualizationMode::Funding => "funding",
            VisualizationMode::Forecast => "forecast",
            VisualizationMode::Hunger => "hunger",
            VisualizationMode::Stress => "stress",
            VisualizationMode::Facilities => "facilities",
        }
    }

    /// Parse a mode keyword as it appears in a question ("facility" and
    /// "facilities" both select the facilities lens).
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "risk" => Some(VisualizationMode::Risk),
            "flood" => Some(VisualizationMode::Flood),
            "funding" => Some(VisualizationMode::Funding),
            "forecast" => Some(VisualizationMode::Forecast),
            "hunger" => Some(VisualizationMode::Hunger),
            "stress" => Some(VisualizationMode::Stress),
            "facility" | "facilities" => Some(VisualizationMode::Facilities),
            _ => None,
        }
    }
}

/// Query request payload.
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub question: String,
    pub mode: Option<VisualizationMode>,
}

/// Where the answer text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Generative,
    Fallback,
}

/// Identifier of a result record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RecordId {
    Country {
        iso3: String,
    },
    #[serde(rename_all = "camelCase")]
    Subregion {
        region: String,
        subregion: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        subregion_code: Option<String>,
    },
}

impl RecordId {
    /// Short human-readable form used in summaries and highlights.
    pub fn display(&self) -> String {
        match self {
            RecordId::Country { iso3 } => iso3.clone(),
            RecordId::Subregion {
                region, subregion, ..
            } => format!("{}, {}", subregion, region),
        }
    }

    pub fn iso3(&self) -> Option<&str> {
        match self {
            RecordId::Country { iso3 } => Some(iso3),
            RecordId::Subregion { .. } => None,
        }
    }
}

/// Optional contextual fields carried by a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_gap_ratio: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flood_population_exposed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hunger_gam_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_facility_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_count: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idp_individuals: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returnees: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub population: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub female_share_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation_tier: Option<AllocationTier>,
    /// Share of the scored window, in percent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocation_share_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allocated_amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
}

/// One normalized warehouse row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    #[serde(flatten)]
    pub id: RecordId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub score: f64,
    pub status: Band,
    #[serde(flatten)]
    pub context: RecordContext,
}

impl ResultRecord {
    /// Label when known, identifier otherwise.
    pub fn name(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.id.display())
    }
}

/// A requested layer visibility change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerToggle {
    pub layer: String,
    pub enabled: bool,
}

/// Visualization directives for the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filters {
    pub mode: VisualizationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focus_iso3: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statuses: Option<Vec<Band>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layers: Option<Vec<LayerToggle>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel_open: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub highlight: Vec<String>,
}

/// Query response payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponsePayload {
    pub intent: Intent,
    pub question: String,
    pub filters: Filters,
    pub countries: Vec<ResultRecord>,
    pub response_source: ResponseSource,
    pub answer: String,
    pub explanation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_parse_is_lenient_about_case() {
        assert_eq!(Band::parse(" RED "), Some(Band::Red));
        assert_eq!(Band::parse("Yellow"), Some(Band::Yellow));
        assert_eq!(Band::parse("amber"), None);
    }

    #[test]
    fn test_request_mode_is_optional() {
        let req: QueryRequest = serde_json::from_str(r#"{"question":"hi"}"#).unwrap();
        assert_eq!(req.question, "hi");
        assert!(req.mode.is_none());

        let req: QueryRequest =
            serde_json::from_str(r#"{"question":"x","mode":"facilities"}"#).unwrap();
        assert_eq!(req.mode, Some(VisualizationMode::Facilities));
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = ResultRecord {
            id: RecordId::Subregion {
                region: "Jonglei".into(),
                subregion: "Pibor".into(),
                subregion_code: Some("SS0407".into()),
            },
            label: None,
            score: 0.62,
            status: Band::Yellow,
            context: RecordContext {
                hunger_gam_pct: Some(18.5),
                ..Default::default()
            },
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["region"], "Jonglei");
        assert_eq!(json["subregionCode"], "SS0407");
        assert_eq!(json["status"], "yellow");
        assert_eq!(json["hungerGamPct"], 18.5);
        assert!(json.get("label").is_none());
    }
}
