//! Answer synthesis: grounded generation with a deterministic fallback.
//!
//! The fallback explanation is always built first. The generative answer is
//! only an upgrade over it; any failure lands back on the fallback text.

use tracing::warn;

use crate::allocation::format_amount;
use crate::generative::TextGenerator;
use crate::intent::Intent;
use crate::models::{Band, ResponseSource, ResultRecord, VisualizationMode};
use crate::summary::ContextSummary;
use crate::Result;

const FALLBACK_LINES: usize = 5;
const GROUNDING_RECORDS: usize = 12;
const COMPACT_TOKENS: usize = 7;
const DEEP_KEYWORDS: &[&str] = &[
    "why", "explain", "analyze", "analyse", "analysis", "detail", "detailed", "compare",
    "comparison", "breakdown", "elaborate", "in-depth",
];

pub const SMALLTALK_REPLY: &str = "Hi! I can walk you through humanitarian risk on the map. \
     Try \"show me flood hotspots\" or \"allocate $10M across South Sudan counties\".";

struct Template {
    headline: &'static str,
    actions: [&'static str; 3],
}

fn template(intent: Intent) -> Template {
    match intent {
        Intent::FloodHotspots => Template {
            headline: "Flood hotspots: countries with the largest flood-exposed populations.",
            actions: [
                "Pre-position shelter, WASH and health supplies ahead of the rainy season.",
                "Coordinate early-warning messaging with national disaster agencies.",
                "Map evacuation routes and safe sites for the most exposed districts.",
            ],
        },
        Intent::CrisisHotspots => Template {
            headline: "Crisis hotspots: countries in the red and yellow risk bands.",
            actions: [
                "Prioritize protection and emergency health response in red-band countries.",
                "Scale up needs assessments where scores sit near the red threshold.",
                "Secure humanitarian access agreements ahead of escalation.",
            ],
        },
        Intent::StableCountries => Template {
            headline: "Most stable countries: lowest risk scores in the green band.",
            actions: [
                "Keep monitoring indicators so early deterioration is caught.",
                "Use stable neighbours as logistics hubs for regional response.",
                "Invest in preparedness while operating conditions allow it.",
            ],
        },
        Intent::ForecastOutlook => Template {
            headline: "Risk outlook: countries where widening funding gaps point to rising risk.",
            actions: [
                "Flag under-funded appeals to donors before gaps become shortfalls.",
                "Stress-test response plans against a worsening scenario.",
                "Re-check these rankings when new funding data lands.",
            ],
        },
        Intent::CountryFocus => Template {
            headline: "Country focus: current risk profile.",
            actions: [
                "Review the funding gap against the current response plan.",
                "Check flood exposure before the next rainy season.",
                "Compare with neighbouring countries for cross-border effects.",
            ],
        },
        Intent::GlobalFundingAllocation => Template {
            headline: "Funding allocation: budget split across the highest-risk countries.",
            actions: [
                "Release priority-tier allocations first to cover life-saving needs.",
                "Tie elevated-tier funding to updated needs assessments.",
                "Hold a contingency reserve for sudden-onset emergencies.",
            ],
        },
        Intent::OpenRegionalMap => Template {
            headline: "South Sudan county map: counties ranked by hunger pressure.",
            actions: [
                "Select a county to see its hunger, displacement and facility data.",
                "Switch to stress or facilities mode for capacity gaps.",
                "Ask for an allocation to split a budget across counties.",
            ],
        },
        Intent::RegionalHungerHotspots => Template {
            headline: "South Sudan hunger hotspots: counties ranked by hunger-weighted priority.",
            actions: [
                "Scale up nutrition screening and treatment in red counties.",
                "Align food assistance with market functionality in each county.",
                "Target displaced households with blanket supplementary feeding.",
            ],
        },
        Intent::RegionalSystemStress => Template {
            headline: "South Sudan system stress: counties where displacement outpaces service capacity.",
            actions: [
                "Deploy mobile clinics where facility coverage is thinnest.",
                "Expand reception capacity in counties receiving returnees.",
                "Coordinate clusters to avoid gaps across health, food and shelter.",
            ],
        },
        Intent::RegionalFacilityAllocation => Template {
            headline: "South Sudan facility allocation: counties ranked by capacity and coverage gaps.",
            actions: [
                "Fund priority-tier counties first, starting with facility rehabilitation.",
                "Pair facility funding with staffing and supply pipelines.",
                "Reassess shares quarterly as displacement shifts.",
            ],
        },
        Intent::TopRiskCountries
        | Intent::Smalltalk
        | Intent::TogglePanel
        | Intent::ToggleLayers
        | Intent::SwitchMode => Template {
            headline: "Top-risk countries ranked by humanitarian risk score.",
            actions: [
                "Focus response planning on the red-band countries first.",
                "Cross-check funding gaps for the top-ranked countries.",
                "Drill into a country to see its flood and funding profile.",
            ],
        },
    }
}

/// Thousands-separated whole number.
pub fn format_count(value: f64) -> String {
    let digits = format!("{:.0}", value.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0.0 && digits != "0" {
        format!("-{}", out)
    } else {
        out
    }
}

fn record_title(record: &ResultRecord) -> String {
    match (&record.label, record.id.iso3()) {
        (Some(label), Some(iso3)) => format!("{} ({})", label, iso3),
        _ => record.name(),
    }
}

fn record_line(intent: Intent, rank: usize, record: &ResultRecord) -> String {
    let mut line = format!(
        "{}. {}: score {:.2}, {}",
        rank,
        record_title(record),
        record.score,
        record.status
    );
    let ctx = &record.context;
    match intent {
        Intent::FloodHotspots => {
            if let Some(exposed) = ctx.flood_population_exposed {
                line.push_str(&format!(", {} people flood-exposed", format_count(exposed)));
            }
        }
        Intent::ForecastOutlook | Intent::CountryFocus => {
            if let Some(gap) = ctx.funding_gap_ratio {
                line.push_str(&format!(", funding gap {:.0}%", gap * 100.0));
            }
        }
        Intent::OpenRegionalMap | Intent::RegionalHungerHotspots => {
            if let Some(gam) = ctx.hunger_gam_pct {
                line.push_str(&format!(", GAM {:.1}%", gam));
            }
        }
        Intent::RegionalSystemStress => {
            if let Some(idps) = ctx.idp_individuals {
                line.push_str(&format!(", {} IDPs", format_count(idps)));
            }
            if let Some(facilities) = ctx.health_facility_count {
                line.push_str(&format!(", {} health facilities", format_count(facilities)));
            }
        }
        Intent::GlobalFundingAllocation | Intent::RegionalFacilityAllocation => {
            if let Some(tier) = ctx.allocation_tier {
                line.push_str(&format!(", {} tier", tier.as_str()));
            }
            if let Some(pct) = ctx.allocation_share_pct {
                line.push_str(&format!(", {:.1}% share", pct));
            }
            if let Some(amount) = ctx.allocated_amount {
                line.push_str(&format!(" ({})", format_amount(amount)));
            }
        }
        _ => {}
    }
    line
}

fn band_rank(band: Band) -> u8 {
    match band {
        Band::Green => 0,
        Band::Yellow => 1,
        Band::Red => 2,
    }
}

/// Record that most needs attention: worst band, then highest score.
fn highest_priority(records: &[ResultRecord]) -> Option<&ResultRecord> {
    records.iter().max_by(|a, b| {
        band_rank(a.status)
            .cmp(&band_rank(b.status))
            .then(a.score.total_cmp(&b.score))
    })
}

/// Static reply for intents that never reach the warehouse.
pub fn non_data_reply(intent: Intent, detail: Option<&str>) -> String {
    match intent {
        Intent::TogglePanel => match detail {
            Some("open") => "Opening the panel.".to_string(),
            Some("close") => "Closing the panel.".to_string(),
            _ => "Toggling the panel.".to_string(),
        },
        Intent::ToggleLayers => match detail {
            Some(layer) => format!("Updating the {} layer.", layer),
            None => "Updating the map layers.".to_string(),
        },
        Intent::SwitchMode => match detail {
            Some(mode) => format!("Switching to {} mode.", mode),
            None => "Switching the map mode.".to_string(),
        },
        _ => SMALLTALK_REPLY.to_string(),
    }
}

/// Deterministic explanation; never empty.
pub fn fallback_explanation(
    intent: Intent,
    records: &[ResultRecord],
    summary: &ContextSummary,
    budget: Option<f64>,
) -> String {
    if !intent.is_data() {
        return non_data_reply(intent, None);
    }

    let template = template(intent);
    let mut out = String::from(template.headline);
    if let (Some(budget), true) = (budget, intent.is_allocation()) {
        out.push_str(&format!(" Budget: {}.", format_amount(budget)));
    }
    out.push('\n');

    if records.is_empty() {
        out.push_str("\nNo matching records were returned for this question.\n");
    } else {
        out.push('\n');
        for (i, record) in records.iter().take(FALLBACK_LINES).enumerate() {
            out.push_str(&record_line(intent, i + 1, record));
            out.push('\n');
        }
    }

    let counts = summary.band_counts;
    out.push_str(&format!(
        "\nStatus mix: {} red, {} yellow, {} green.\n",
        counts.red, counts.yellow, counts.green
    ));

    if let Some(top) = highest_priority(records) {
        out.push_str(&format!(
            "Highest priority: {} (score {:.2}, {}).\n",
            top.name(),
            top.score,
            top.status
        ));
    }

    out.push_str("\nRecommended actions:\n");
    for action in template.actions {
        out.push_str("- ");
        out.push_str(action);
        out.push('\n');
    }

    out.trim_end().to_string()
}

/// Length and layout directives for a generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseStyle {
    pub min_sentences: u8,
    pub max_sentences: u8,
    pub action_bullets: bool,
}

impl ResponseStyle {
    fn directive(&self) -> String {
        let length = if self.min_sentences == self.max_sentences {
            format!(
                "Answer in exactly {} sentence{}.",
                self.max_sentences,
                if self.max_sentences == 1 { "" } else { "s" }
            )
        } else {
            format!(
                "Answer in {} to {} sentences.",
                self.min_sentences, self.max_sentences
            )
        };
        if self.action_bullets {
            format!(
                "{} Then add a section titled \"Recommended actions\" with exactly 3 short bullets.",
                length
            )
        } else {
            format!("{} Do not use bullet points.", length)
        }
    }
}

fn is_compact(question: &str) -> bool {
    let lowered = question.to_lowercase();
    let tokens: Vec<&str> = lowered.split_whitespace().collect();
    tokens.len() <= COMPACT_TOKENS
        && !tokens.iter().any(|t| {
            let word = t.trim_matches(|c: char| !c.is_alphanumeric() && c != '-');
            DEEP_KEYWORDS.contains(&word)
        })
}

pub fn response_style(intent: Intent, question: &str) -> ResponseStyle {
    match intent {
        Intent::Smalltalk | Intent::OpenRegionalMap => ResponseStyle {
            min_sentences: 1,
            max_sentences: 1,
            action_bullets: false,
        },
        Intent::GlobalFundingAllocation
        | Intent::RegionalFacilityAllocation
        | Intent::RegionalSystemStress => ResponseStyle {
            min_sentences: 3,
            max_sentences: 5,
            action_bullets: true,
        },
        _ if is_compact(question) => ResponseStyle {
            min_sentences: 1,
            max_sentences: 2,
            action_bullets: false,
        },
        _ => ResponseStyle {
            min_sentences: 2,
            max_sentences: 3,
            action_bullets: false,
        },
    }
}

/// Everything the generative answer is grounded on.
pub struct AnswerContext<'a> {
    pub question: &'a str,
    pub intent: Intent,
    pub mode: VisualizationMode,
    pub summary: &'a ContextSummary,
    pub records: &'a [ResultRecord],
    pub budget: Option<f64>,
}

pub fn build_prompt(ctx: &AnswerContext<'_>) -> String {
    let grounding = &ctx.records[..ctx.records.len().min(GROUNDING_RECORDS)];
    let summary_json = serde_json::to_string(ctx.summary).unwrap_or_else(|_| "{}".to_string());
    let records_json = serde_json::to_string(grounding).unwrap_or_else(|_| "[]".to_string());
    let budget = ctx
        .budget
        .map(|b| format!("Budget to allocate: {}\n", format_amount(b)))
        .unwrap_or_default();

    format!(
        "You are a humanitarian risk analyst answering questions about a live risk map.\n\
         Use only the data provided below. Do not invent countries, counties or numbers.\n\
         If the data is empty, say so plainly.\n\n\
         Question: {question}\n\
         Intent: {intent}\n\
         Map mode: {mode}\n\
         {budget}\
         Style: {style}\n\n\
         Summary: {summary_json}\n\
         Records: {records_json}\n",
        question = ctx.question.trim(),
        intent = ctx.intent,
        mode = ctx.mode.as_str(),
        style = response_style(ctx.intent, ctx.question).directive(),
    )
}

/// Final answer text with its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub source: ResponseSource,
}

impl Answer {
    pub fn fallback(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: ResponseSource::Fallback,
        }
    }
}

/// Primary result when it succeeded with text, the fallback otherwise.
pub fn or_fallback(primary: Result<String>, fallback: &str) -> Answer {
    match primary {
        Ok(text) if !text.trim().is_empty() => Answer {
            text,
            source: ResponseSource::Generative,
        },
        Ok(_) => {
            warn!("Generative answer was empty, using fallback");
            Answer::fallback(fallback)
        }
        Err(e) => {
            warn!("Generative answer failed, using fallback: {}", e);
            Answer::fallback(fallback)
        }
    }
}

/// Try the generator (when configured), else use the fallback verbatim.
pub async fn synthesize_answer<G: TextGenerator>(
    generator: Option<&G>,
    ctx: &AnswerContext<'_>,
    fallback: &str,
) -> Answer {
    let Some(generator) = generator else {
        return Answer::fallback(fallback);
    };
    or_fallback(generator.generate(&build_prompt(ctx)).await, fallback)
}
