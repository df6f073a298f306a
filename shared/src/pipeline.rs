//! Request orchestration: classify, query, normalize, explain.
//!
//! `Pipeline::answer` never fails. Every outbound call returns a `Result`
//! and each failure is turned into response text with fallback provenance.

use tracing::{debug, info, warn};

use crate::allocation::{apply_allocation, extract_budget};
use crate::answer::{
    fallback_explanation, non_data_reply, or_fallback, synthesize_answer, Answer, AnswerContext,
};
use crate::config::{Config, Tables};
use crate::generative::TextGenerator;
use crate::intent::{parse_layer_toggle, parse_mode_switch, parse_panel_state, Intent};
use crate::intent_assist;
use crate::models::{Band, Filters, ResponsePayload, ResultRecord, VisualizationMode};
use crate::normalize::normalize_rows;
use crate::sql;
use crate::summary::summarize;
use crate::warehouse::QueryExecutor;

/// Most records returned to the caller.
pub const MAX_RESPONSE_RECORDS: usize = 10;

/// Answers questions against an optional warehouse and generator.
pub struct Pipeline<W, G> {
    warehouse: Option<W>,
    generator: Option<G>,
    tables: Tables,
    row_limit: usize,
    intent_assist_enabled: bool,
}

impl<W: QueryExecutor, G: TextGenerator> Pipeline<W, G> {
    pub fn new(warehouse: Option<W>, generator: Option<G>, config: &Config) -> Self {
        Self {
            warehouse,
            generator,
            tables: config.tables.clone(),
            row_limit: config.row_limit,
            intent_assist_enabled: config.intent_assist_enabled,
        }
    }

    pub fn warehouse(&self) -> Option<&W> {
        self.warehouse.as_ref()
    }

    /// Answer one question. `mode` is the caller's current map mode.
    pub async fn answer(&self, question: &str, mode: Option<VisualizationMode>) -> ResponsePayload {
        let question = question.trim();
        let assist = self.generator.as_ref().filter(|_| self.intent_assist_enabled);
        let classification = intent_assist::classify(question, mode, assist).await;
        let intent = classification.intent;
        debug!(
            "Classified as {} by rule {}",
            intent, classification.rule
        );

        let payload = if intent.is_data() {
            self.answer_data(question, mode, intent).await
        } else {
            self.answer_non_data(question, mode, intent).await
        };

        info!(
            intent = %payload.intent,
            source = ?payload.response_source,
            records = payload.countries.len(),
            "Answered query"
        );
        payload
    }

    async fn answer_non_data(
        &self,
        question: &str,
        mode: Option<VisualizationMode>,
        intent: Intent,
    ) -> ResponsePayload {
        let filters = filters_for(intent, question, mode, &[]);
        let detail = match intent {
            Intent::TogglePanel => filters
                .panel_open
                .map(|open| if open { "open" } else { "close" }.to_string()),
            Intent::ToggleLayers => filters
                .layers
                .as_ref()
                .and_then(|layers| layers.first())
                .map(|toggle| toggle.layer.clone()),
            Intent::SwitchMode => Some(filters.mode.as_str().to_string()),
            _ => None,
        };
        let explanation = non_data_reply(intent, detail.as_deref());

        let answer = match (intent, self.generator.as_ref()) {
            (Intent::Smalltalk, Some(generator)) => {
                or_fallback(generator.generate(&smalltalk_prompt(question)).await, &explanation)
            }
            _ => Answer::fallback(explanation.clone()),
        };

        payload(intent, question, filters, Vec::new(), answer, explanation)
    }

    async fn answer_data(
        &self,
        question: &str,
        mode: Option<VisualizationMode>,
        intent: Intent,
    ) -> ResponsePayload {
        let budget = intent.is_allocation().then(|| extract_budget(question)).flatten();
        let unavailable = |message: String| {
            let explanation = fallback_explanation(intent, &[], &summarize(&[]), budget);
            payload(
                intent,
                question,
                filters_for(intent, question, mode, &[]),
                Vec::new(),
                Answer::fallback(message),
                explanation,
            )
        };

        let Some(warehouse) = self.warehouse.as_ref() else {
            warn!("Warehouse is not configured, answering without data");
            return unavailable(format!(
                "The data warehouse is not configured, so I can't {} right now.",
                intent.description()
            ));
        };

        let Some(statement) = sql::synthesize(intent, &self.tables, self.row_limit, question) else {
            return unavailable("I couldn't build a query for this question.".to_string());
        };
        debug!(sql = %statement, "Running statement");

        let rows = match warehouse.execute(&statement).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!("Warehouse query failed: {}", e);
                return unavailable(format!("I couldn't retrieve data for this question: {}", e));
            }
        };

        let mut records = normalize_rows(intent, &rows);
        if intent.is_allocation() {
            apply_allocation(&mut records, budget);
        }

        let summary = summarize(&records);
        let explanation = fallback_explanation(intent, &records, &summary, budget);
        let ctx = AnswerContext {
            question,
            intent,
            mode: mode.unwrap_or_default(),
            summary: &summary,
            records: &records,
            budget,
        };
        let answer = synthesize_answer(self.generator.as_ref(), &ctx, &explanation).await;

        records.truncate(MAX_RESPONSE_RECORDS);
        let filters = filters_for(intent, question, mode, &records);
        payload(intent, question, filters, records, answer, explanation)
    }
}

fn smalltalk_prompt(question: &str) -> String {
    format!(
        "You are the assistant on a humanitarian risk map. Reply to the user in exactly one \
         friendly sentence and suggest one thing they could ask about, such as flood hotspots \
         or top-risk countries.\n\nUser: {}",
        question
    )
}

fn payload(
    intent: Intent,
    question: &str,
    filters: Filters,
    countries: Vec<ResultRecord>,
    answer: Answer,
    explanation: String,
) -> ResponsePayload {
    ResponsePayload {
        intent,
        question: question.to_string(),
        filters,
        countries,
        response_source: answer.source,
        answer: answer.text,
        explanation,
    }
}

/// Map mode an intent should display.
fn mode_for(intent: Intent, question: &str, requested: Option<VisualizationMode>) -> VisualizationMode {
    match intent {
        Intent::FloodHotspots => VisualizationMode::Flood,
        Intent::ForecastOutlook => VisualizationMode::Forecast,
        Intent::GlobalFundingAllocation => VisualizationMode::Funding,
        Intent::TopRiskCountries
        | Intent::CrisisHotspots
        | Intent::StableCountries
        | Intent::CountryFocus => VisualizationMode::Risk,
        Intent::OpenRegionalMap | Intent::RegionalHungerHotspots => VisualizationMode::Hunger,
        Intent::RegionalSystemStress => VisualizationMode::Stress,
        Intent::RegionalFacilityAllocation => VisualizationMode::Facilities,
        Intent::SwitchMode => parse_mode_switch(question)
            .or(requested)
            .unwrap_or_default(),
        Intent::Smalltalk | Intent::TogglePanel | Intent::ToggleLayers => {
            requested.unwrap_or_default()
        }
    }
}

/// Visualization directives for an answered question.
pub fn filters_for(
    intent: Intent,
    question: &str,
    requested: Option<VisualizationMode>,
    records: &[ResultRecord],
) -> Filters {
    Filters {
        mode: mode_for(intent, question, requested),
        focus_iso3: match intent {
            Intent::CountryFocus => records
                .first()
                .and_then(|r| r.id.iso3())
                .map(str::to_string),
            _ => None,
        },
        statuses: match intent {
            Intent::StableCountries => Some(vec![Band::Green]),
            Intent::CrisisHotspots => Some(vec![Band::Red, Band::Yellow]),
            _ => None,
        },
        layers: match intent {
            Intent::ToggleLayers => parse_layer_toggle(question).map(|toggle| vec![toggle]),
            _ => None,
        },
        panel_open: match intent {
            Intent::TogglePanel => parse_panel_state(question),
            _ => None,
        },
        highlight: records.iter().map(|r| r.id.display()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LayerToggle, ResponseSource};
    use crate::normalize::Row;
    use crate::{Error, Result};
    use serde_json::json;
    use std::sync::Mutex;

    struct FakeWarehouse {
        rows: std::result::Result<Vec<Row>, String>,
        statements: Mutex<Vec<String>>,
    }

    impl FakeWarehouse {
        fn returning(rows: Vec<serde_json::Value>) -> Self {
            let rows = rows
                .into_iter()
                .map(|v| match v {
                    serde_json::Value::Object(map) => map,
                    other => panic!("row must be an object, got {}", other),
                })
                .collect();
            Self {
                rows: Ok(rows),
                statements: Mutex::new(Vec::new()),
            }
        }

        fn failing(message: &str) -> Self {
            Self {
                rows: Err(message.to_string()),
                statements: Mutex::new(Vec::new()),
            }
        }

        fn statements(&self) -> Vec<String> {
            self.statements.lock().unwrap().clone()
        }
    }

    impl QueryExecutor for FakeWarehouse {
        async fn execute(&self, sql: &str) -> Result<Vec<Row>> {
            self.statements.lock().unwrap().push(sql.to_string());
            self.rows.clone().map_err(Error::Warehouse)
        }
    }

    struct FakeGenerator(Option<&'static str>);

    impl TextGenerator for FakeGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            self.0
                .map(str::to_string)
                .ok_or_else(|| Error::Generative("connection refused".to_string()))
        }
    }

    fn config() -> Config {
        Config::from_lookup(|_| None).unwrap()
    }

    fn pipeline(
        warehouse: Option<FakeWarehouse>,
        generator: Option<FakeGenerator>,
    ) -> Pipeline<FakeWarehouse, FakeGenerator> {
        Pipeline::new(warehouse, generator, &config())
    }

    fn flood_rows() -> Vec<serde_json::Value> {
        vec![
            json!({"iso3": "BGD", "country_name": "Bangladesh", "status": "red",
                   "risk_score": 0.18, "flood_population_exposed": 2_400_000}),
            json!({"iso3": "SSD", "country_name": "South Sudan", "risk_score": "0.21",
                   "flood_population_exposed": 850_000}),
            json!({"iso3": null, "risk_score": 0.3}),
        ]
    }

    #[tokio::test]
    async fn test_flood_hotspots_without_generator() {
        let p = pipeline(Some(FakeWarehouse::returning(flood_rows())), None);
        let response = p.answer("show me flood hotspots", None).await;

        assert_eq!(response.intent, Intent::FloodHotspots);
        assert_eq!(response.response_source, ResponseSource::Fallback);
        assert!(response.answer.starts_with("Flood hotspots"));
        assert_eq!(response.answer, response.explanation);
        assert_eq!(response.countries.len(), 2);
        assert_eq!(response.filters.mode, VisualizationMode::Flood);
        assert_eq!(response.filters.highlight, vec!["BGD", "SSD"]);

        let statements = p.warehouse.as_ref().unwrap().statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("flood_population_exposed IS NOT NULL"));
        assert!(statements[0].contains("ORDER BY flood_population_exposed DESC, risk_score DESC"));
    }

    #[tokio::test]
    async fn test_country_focus_sets_focus() {
        let warehouse = FakeWarehouse::returning(vec![json!({
            "iso3": "KEN", "country_name": "Kenya", "risk_score": 0.09
        })]);
        let p = pipeline(Some(warehouse), Some(FakeGenerator(Some("Kenya is in the green band."))));
        let response = p.answer("zoom to Kenya", None).await;

        assert_eq!(response.intent, Intent::CountryFocus);
        assert_eq!(response.filters.focus_iso3.as_deref(), Some("KEN"));
        assert_eq!(response.response_source, ResponseSource::Generative);
        assert_eq!(response.answer, "Kenya is in the green band.");

        let statements = p.warehouse.as_ref().unwrap().statements();
        assert!(statements[0].contains("UPPER(country_name) LIKE '%KENYA%' OR UPPER(iso3) = 'KENYA'"));
    }

    #[tokio::test]
    async fn test_smalltalk_skips_warehouse() {
        let p = pipeline(Some(FakeWarehouse::returning(flood_rows())), None);
        let response = p.answer("hi", Some(VisualizationMode::Hunger)).await;

        assert_eq!(response.intent, Intent::Smalltalk);
        assert_eq!(response.response_source, ResponseSource::Fallback);
        assert!(!response.answer.is_empty());
        assert!(response.countries.is_empty());
        assert_eq!(response.filters.mode, VisualizationMode::Hunger);
        assert!(p.warehouse.as_ref().unwrap().statements().is_empty());
    }

    #[tokio::test]
    async fn test_ui_controls_return_directives() {
        let p = pipeline(None, None);

        let response = p.answer("turn off the flood layer", None).await;
        assert_eq!(response.intent, Intent::ToggleLayers);
        assert_eq!(
            response.filters.layers,
            Some(vec![LayerToggle {
                layer: "flood".to_string(),
                enabled: false
            }])
        );

        let response = p.answer("close the panel", None).await;
        assert_eq!(response.intent, Intent::TogglePanel);
        assert_eq!(response.filters.panel_open, Some(false));
        assert_eq!(response.answer, "Closing the panel.");

        let response = p.answer("switch to flood mode", None).await;
        assert_eq!(response.intent, Intent::SwitchMode);
        assert_eq!(response.filters.mode, VisualizationMode::Flood);
    }

    #[tokio::test]
    async fn test_all_services_down_still_answers() {
        let p = pipeline(
            Some(FakeWarehouse::failing("503 Service Unavailable")),
            Some(FakeGenerator(None)),
        );
        let response = p.answer("which countries are in crisis", None).await;

        assert_eq!(response.intent, Intent::CrisisHotspots);
        assert_eq!(response.response_source, ResponseSource::Fallback);
        assert!(response.answer.starts_with("I couldn't retrieve data"));
        assert!(response.answer.contains("503"));
        assert!(!response.explanation.is_empty());
        assert_eq!(response.filters.statuses, Some(vec![Band::Red, Band::Yellow]));
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back() {
        let p = pipeline(
            Some(FakeWarehouse::returning(flood_rows())),
            Some(FakeGenerator(None)),
        );
        let response = p.answer("show me flood hotspots", None).await;
        assert_eq!(response.response_source, ResponseSource::Fallback);
        assert!(response.answer.starts_with("Flood hotspots"));
    }

    #[tokio::test]
    async fn test_missing_warehouse_answer() {
        let p = pipeline(None, None);
        let response = p.answer("show me flood hotspots", None).await;
        assert!(response.answer.contains("not configured"));
        assert_eq!(response.response_source, ResponseSource::Fallback);
        assert!(response.countries.is_empty());
    }

    #[tokio::test]
    async fn test_allocation_fills_amounts() {
        let warehouse = FakeWarehouse::returning(vec![
            json!({"iso3": "SSD", "country_name": "South Sudan", "risk_score": 0.75}),
            json!({"iso3": "SDN", "country_name": "Sudan", "risk_score": 0.25}),
        ]);
        let p = pipeline(Some(warehouse), None);
        let response = p.answer("how should we allocate $10M in funding", None).await;

        assert_eq!(response.intent, Intent::GlobalFundingAllocation);
        assert_eq!(response.filters.mode, VisualizationMode::Funding);
        let total: f64 = response
            .countries
            .iter()
            .filter_map(|r| r.context.allocated_amount)
            .sum();
        assert!((total - 10_000_000.0).abs() <= 2.0);
        assert!(response.explanation.contains("Budget: $10M."));
    }

    #[tokio::test]
    async fn test_records_are_capped() {
        let rows = (0..15)
            .map(|i| json!({"iso3": format!("C{:02}", i), "risk_score": 0.2}))
            .collect();
        let p = pipeline(Some(FakeWarehouse::returning(rows)), None);
        let response = p.answer("top risk countries", None).await;
        assert_eq!(response.countries.len(), MAX_RESPONSE_RECORDS);
        assert_eq!(response.filters.highlight.len(), MAX_RESPONSE_RECORDS);
    }
}
