//! Rule-based intent classification and place-name extraction.
//!
//! Classification is an ordered decision table: the first rule whose
//! predicate matches decides the intent. UI-control rules sit at the top so
//! that "switch to flood mode" never becomes a flood query.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use crate::models::{LayerToggle, VisualizationMode};
use crate::Error;

/// Closed set of question intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    Smalltalk,
    OpenRegionalMap,
    ForecastOutlook,
    GlobalFundingAllocation,
    FloodHotspots,
    CrisisHotspots,
    StableCountries,
    TopRiskCountries,
    CountryFocus,
    RegionalHungerHotspots,
    RegionalSystemStress,
    RegionalFacilityAllocation,
    TogglePanel,
    ToggleLayers,
    SwitchMode,
}

/// Template and status-threshold group of a data intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    CountryRisk,
    Regional,
}

impl Intent {
    pub const ALL: [Intent; 15] = [
        Intent::Smalltalk,
        Intent::OpenRegionalMap,
        Intent::ForecastOutlook,
        Intent::GlobalFundingAllocation,
        Intent::FloodHotspots,
        Intent::CrisisHotspots,
        Intent::StableCountries,
        Intent::TopRiskCountries,
        Intent::CountryFocus,
        Intent::RegionalHungerHotspots,
        Intent::RegionalSystemStress,
        Intent::RegionalFacilityAllocation,
        Intent::TogglePanel,
        Intent::ToggleLayers,
        Intent::SwitchMode,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Smalltalk => "smalltalk",
            Intent::OpenRegionalMap => "open-regional-map",
            Intent::ForecastOutlook => "forecast-outlook",
            Intent::GlobalFundingAllocation => "global-funding-allocation",
            Intent::FloodHotspots => "flood-hotspots",
            Intent::CrisisHotspots => "crisis-hotspots",
            Intent::StableCountries => "stable-countries",
            Intent::TopRiskCountries => "top-risk-countries",
            Intent::CountryFocus => "country-focus",
            Intent::RegionalHungerHotspots => "regional-hunger-hotspots",
            Intent::RegionalSystemStress => "regional-system-stress",
            Intent::RegionalFacilityAllocation => "regional-facility-allocation",
            Intent::TogglePanel => "toggle-panel",
            Intent::ToggleLayers => "toggle-layers",
            Intent::SwitchMode => "switch-mode",
        }
    }

    /// One-line meaning, used when asking a model to classify.
    pub fn description(&self) -> &'static str {
        match self {
            Intent::Smalltalk => "greetings or chit-chat with no data request",
            Intent::OpenRegionalMap => "open the South Sudan county map",
            Intent::ForecastOutlook => "near-term outlook or forecast of country risk",
            Intent::GlobalFundingAllocation => "split a budget across countries by risk",
            Intent::FloodHotspots => "countries with the largest flood exposure",
            Intent::CrisisHotspots => "countries in conflict or crisis (red/yellow)",
            Intent::StableCountries => "lowest-risk, stable countries",
            Intent::TopRiskCountries => "general ranking of the highest-risk countries",
            Intent::CountryFocus => "zoom or focus on one named country",
            Intent::RegionalHungerHotspots => "South Sudan counties with the worst hunger",
            Intent::RegionalSystemStress => "South Sudan counties under displacement and capacity stress",
            Intent::RegionalFacilityAllocation => "split a budget across South Sudan counties and facilities",
            Intent::TogglePanel => "open or close a UI panel",
            Intent::ToggleLayers => "turn a map layer on or off",
            Intent::SwitchMode => "switch the map visualization mode",
        }
    }

    /// Whether answering needs a warehouse query.
    pub fn is_data(&self) -> bool {
        self.family().is_some()
    }

    pub fn family(&self) -> Option<Family> {
        match self {
            Intent::Smalltalk | Intent::TogglePanel | Intent::ToggleLayers | Intent::SwitchMode => None,
            Intent::OpenRegionalMap
            | Intent::RegionalHungerHotspots
            | Intent::RegionalSystemStress
            | Intent::RegionalFacilityAllocation => Some(Family::Regional),
            _ => Some(Family::CountryRisk),
        }
    }

    pub fn is_allocation(&self) -> bool {
        matches!(
            self,
            Intent::GlobalFundingAllocation | Intent::RegionalFacilityAllocation
        )
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Intent {
    type Err = Error;

    /// Accepts kebab-case or snake_case, any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        Intent::ALL
            .iter()
            .copied()
            .find(|intent| intent.as_str() == wanted)
            .ok_or_else(|| Error::Validation(format!("Unknown intent: {}", s)))
    }
}

/// Outcome of classification, with the rule that decided it.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub intent: Intent,
    pub entity: Option<String>,
    pub rule: &'static str,
}

/// Precomputed view of a question that rule predicates read.
pub struct Signals {
    text: String,
    entity: Option<String>,
    regional_mode: bool,
}

impl Signals {
    pub fn new(question: &str, mode: Option<VisualizationMode>) -> Self {
        Self {
            text: question.trim().to_lowercase(),
            entity: extract_entity(question),
            regional_mode: matches!(
                mode,
                Some(VisualizationMode::Hunger | VisualizationMode::Stress | VisualizationMode::Facilities)
            ),
        }
    }

    fn has(&self, pattern: &Regex) -> bool {
        pattern.is_match(&self.text)
    }

    /// Any vocabulary a later rule would act on.
    fn is_actionable(&self) -> bool {
        let p = patterns();
        [
            &p.actionable,
            &p.panel,
            &p.layer,
            &p.mode,
            &p.regional_map,
            &p.navigation,
            &p.region,
            &p.facility,
            &p.funding,
            &p.forecast,
            &p.nutrition,
            &p.systemic,
            &p.flood,
            &p.stability,
            &p.crisis,
        ]
        .into_iter()
        .any(|pattern| self.has(pattern))
    }
}

/// One row of the decision table.
pub struct Rule {
    pub name: &'static str,
    pub intent: Intent,
    pub matches: fn(&Signals) -> bool,
}

/// The decision table, in evaluation order.
pub const RULES: &[Rule] = &[
    Rule { name: "ui-panel", intent: Intent::TogglePanel, matches: |s| s.has(&patterns().panel) },
    Rule { name: "ui-layer", intent: Intent::ToggleLayers, matches: |s| s.has(&patterns().layer) },
    Rule { name: "ui-mode", intent: Intent::SwitchMode, matches: |s| s.has(&patterns().mode) },
    Rule {
        name: "regional-map",
        intent: Intent::OpenRegionalMap,
        matches: |s| s.has(&patterns().regional_map),
    },
    Rule {
        name: "greeting",
        intent: Intent::Smalltalk,
        matches: |s| s.has(&patterns().greeting) && !s.is_actionable(),
    },
    Rule {
        name: "navigation",
        intent: Intent::CountryFocus,
        matches: |s| s.has(&patterns().navigation) && s.entity.is_some(),
    },
    Rule {
        name: "regional-facility-funding",
        intent: Intent::RegionalFacilityAllocation,
        matches: |s| {
            let p = patterns();
            s.has(&p.region) && s.has(&p.facility) && s.has(&p.funding)
        },
    },
    Rule { name: "forecast", intent: Intent::ForecastOutlook, matches: |s| s.has(&patterns().forecast) },
    Rule {
        name: "regional-funding",
        intent: Intent::RegionalFacilityAllocation,
        matches: |s| s.has(&patterns().funding) && (s.has(&patterns().region) || s.regional_mode),
    },
    Rule {
        name: "funding",
        intent: Intent::GlobalFundingAllocation,
        matches: |s| s.has(&patterns().funding),
    },
    Rule {
        name: "regional-hunger",
        intent: Intent::RegionalHungerHotspots,
        matches: |s| s.has(&patterns().region) && s.has(&patterns().nutrition),
    },
    Rule {
        name: "regional-stress",
        intent: Intent::RegionalSystemStress,
        matches: |s| s.has(&patterns().region) && s.has(&patterns().systemic),
    },
    Rule {
        name: "region",
        intent: Intent::RegionalHungerHotspots,
        matches: |s| s.has(&patterns().region),
    },
    Rule { name: "flood", intent: Intent::FloodHotspots, matches: |s| s.has(&patterns().flood) },
    Rule { name: "stability", intent: Intent::StableCountries, matches: |s| s.has(&patterns().stability) },
    Rule { name: "crisis", intent: Intent::CrisisHotspots, matches: |s| s.has(&patterns().crisis) },
];

const DEFAULT_RULE: &str = "default";

/// Classify a question with the rule table alone. Total: every question gets
/// exactly one intent.
pub fn classify_rules(question: &str, mode: Option<VisualizationMode>) -> Classification {
    let signals = Signals::new(question, mode);
    let (intent, rule) = RULES
        .iter()
        .find(|rule| (rule.matches)(&signals))
        .map(|rule| (rule.intent, rule.name))
        .unwrap_or((Intent::TopRiskCountries, DEFAULT_RULE));

    Classification {
        intent,
        entity: signals.entity,
        rule,
    }
}

struct Patterns {
    panel: Regex,
    layer: Regex,
    mode: Regex,
    regional_map: Regex,
    greeting: Regex,
    actionable: Regex,
    navigation: Regex,
    region: Regex,
    facility: Regex,
    funding: Regex,
    forecast: Regex,
    nutrition: Regex,
    systemic: Regex,
    flood: Regex,
    stability: Regex,
    crisis: Regex,
    entity: Vec<Regex>,
}

fn words(list: &[&str]) -> Regex {
    let alternatives: Vec<String> = list
        .iter()
        .map(|w| regex::escape(w).replace(' ', r"\s+"))
        .collect();
    Regex::new(&format!(r"\b(?:{})\b", alternatives.join("|"))).expect("valid keyword pattern")
}

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid pattern")
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        panel: re(r"\b(?:open|close|hide|show|toggle|collapse|expand)\s+(?:the\s+)?(?:side\s*panel|panel|sidebar|drawer|legend)\b"),
        layer: re(concat!(
            r"\b(?:(?:turn|switch)\s+(?:on|off)|enable|disable|show|hide)\s+(?:the\s+)?",
            r"(?:conflict|flood|hunger|facility|facilities|funding|risk)\s+(?:layer|layers|overlay)\b",
            r"|\bturn\s+(?:the\s+)?(?:conflict|flood|hunger|facility|facilities|funding|risk)\s+(?:layer|overlay)\s+(?:on|off)\b",
        )),
        mode: re(concat!(
            r"\b(?:switch|change|set|go)\s+(?:the\s+)?(?:map\s+|view\s+)?(?:to\s+)?(?:the\s+)?",
            r"(?:risk|flood|funding|forecast|hunger|stress|facility|facilities)\s+(?:mode|view|lens)\b",
        )),
        regional_map: re(concat!(
            r"\b(?:open|show|switch\s+to|go\s+to|display|load|bring\s+up)\s+(?:me\s+)?(?:the\s+)?",
            r"(?:south\s+sudan|ssd|regional|county)\s+(?:county\s+)?map\b",
        )),
        greeting: re(concat!(
            r"^(?:hi|hello|hey|hiya|howdy|yo|greetings|cheers|thanks|thank\s+you",
            r"|good\s+(?:morning|afternoon|evening|day)|how\s+are\s+you|who\s+are\s+you|what\s+can\s+you\s+do)\b",
        )),
        actionable: words(&[
            "show", "zoom", "focus", "open", "close", "map", "risk", "risks", "risky", "conflict",
            "crisis", "crises", "flood", "floods", "flooding", "hunger", "nutrition", "fund",
            "funding", "allocate", "allocation", "budget", "forecast", "outlook", "country",
            "countries", "county", "counties", "red", "yellow", "green", "stable", "hotspot",
            "hotspots", "top", "rank", "highest", "lowest", "where", "which", "compare", "layer",
            "panel", "switch", "facility", "facilities", "displacement", "sudan",
        ]),
        navigation: re(r"\b(?:zoom|fly|pan|jump|focus|go\s+to|take\s+me|navigate|center|centre)\b"),
        region: words(&["south sudan", "ssd", "county", "counties", "juba", "state-level"]),
        facility: words(&[
            "facility", "facilities", "clinic", "clinics", "hospital", "hospitals",
            "health center", "health centers", "health centre", "health centres", "market",
            "markets",
        ]),
        funding: re(concat!(
            r"\b(?:fund|funds|funding|allocate|allocating|allocation|allocations|budget|budgets",
            r"|distribute|distribution|invest|investment|money|dollars|usd)\b|\$\s*\d",
        )),
        forecast: words(&[
            "forecast", "forecasts", "predict", "prediction", "projected", "projection", "outlook",
            "next month", "next quarter", "next year", "coming months", "trend", "trends",
        ]),
        nutrition: words(&[
            "hunger", "hungry", "nutrition", "malnutrition", "malnourished", "gam", "famine",
            "food insecurity", "food",
        ]),
        systemic: words(&[
            "stress", "strain", "pressure", "system", "systemic", "complex", "complexity",
            "capacity", "displacement", "displaced", "idp", "idps", "overwhelmed", "fragile",
        ]),
        flood: words(&["flood", "floods", "flooding", "flooded", "inundation", "rainfall"]),
        stability: words(&[
            "stable", "stability", "safe", "safest", "calm", "lowest risk", "least risk",
            "low risk", "green",
        ]),
        crisis: words(&[
            "conflict", "conflicts", "crisis", "crises", "war", "violence", "emergency",
            "emergencies", "hotspot", "hotspots", "red", "fighting", "unrest",
        ]),
        entity: vec![
            re(r"(?i)\b(?:zoom|fly|pan|jump)\s+(?:in\s+)?(?:to|into|onto|on)\s+(?:the\s+)?(.+)$"),
            re(r"(?i)\bfocus\s+(?:in\s+)?on\s+(?:the\s+)?(.+)$"),
            re(r"(?i)\b(?:go\s+to|take\s+me\s+to|navigate\s+to|cent(?:er|re)\s+(?:the\s+map\s+)?on)\s+(?:the\s+)?(.+)$"),
            re(r"(?i)\b(?:in|on)\s+(?:the\s+)?([a-z][a-z\s\-]*?)\s*[?.!]*$"),
        ],
    })
}

const MIN_ENTITY_LEN: usize = 3;
const TRAILING_FILLER: &[&str] = &["map", "please", "now"];

/// Reduce a candidate to letters, spaces and hyphens.
///
/// The result is interpolated into SQL as a literal, so nothing outside that
/// character class may survive.
pub fn sanitize_entity(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphabetic() || *c == ' ' || *c == '-')
        .collect();
    let mut parts: Vec<&str> = kept.split_whitespace().collect();
    while parts
        .last()
        .is_some_and(|last| TRAILING_FILLER.contains(&last.to_ascii_lowercase().as_str()))
    {
        parts.pop();
    }
    parts.join(" ").trim_matches('-').trim().to_string()
}

/// Extract the place-name phrase a navigation question refers to.
pub fn extract_entity(question: &str) -> Option<String> {
    let question = question.trim();
    patterns().entity.iter().find_map(|pattern| {
        pattern
            .captures(question)
            .and_then(|caps| caps.get(1))
            .map(|m| sanitize_entity(m.as_str()))
            .filter(|candidate| candidate.len() >= MIN_ENTITY_LEN)
    })
}

/// Layer change requested by a toggle-layers question.
pub fn parse_layer_toggle(question: &str) -> Option<LayerToggle> {
    static LAYER: OnceLock<Regex> = OnceLock::new();
    let pattern = LAYER.get_or_init(|| {
        re(r"\b(conflict|flood|hunger|facility|facilities|funding|risk)\s+(?:layer|layers|overlay)\b")
    });
    let text = question.to_lowercase();
    let layer = pattern.captures(&text)?.get(1)?.as_str();
    let layer = if layer == "facility" { "facilities" } else { layer };

    let disable = re_off().is_match(&text);
    Some(LayerToggle {
        layer: layer.to_string(),
        enabled: !disable,
    })
}

fn re_off() -> &'static Regex {
    static OFF: OnceLock<Regex> = OnceLock::new();
    OFF.get_or_init(|| re(r"\b(?:turn\s+off|switch\s+off|disable|hide)\b|\boff\b"))
}

/// Panel state requested by a toggle-panel question; `None` means flip.
pub fn parse_panel_state(question: &str) -> Option<bool> {
    static VERB: OnceLock<Regex> = OnceLock::new();
    let pattern = VERB.get_or_init(|| re(r"\b(open|show|expand|close|hide|collapse|toggle)\b"));
    let text = question.to_lowercase();
    match pattern.captures(&text)?.get(1)?.as_str() {
        "open" | "show" | "expand" => Some(true),
        "close" | "hide" | "collapse" => Some(false),
        _ => None,
    }
}

/// Target mode of a switch-mode question.
pub fn parse_mode_switch(question: &str) -> Option<VisualizationMode> {
    static MODE: OnceLock<Regex> = OnceLock::new();
    let pattern = MODE.get_or_init(|| {
        re(r"\b(risk|flood|funding|forecast|hunger|stress|facility|facilities)\s+(?:mode|view|lens)\b")
    });
    let text = question.to_lowercase();
    let word = pattern.captures(&text)?.get(1)?.as_str();
    VisualizationMode::from_keyword(word)
}
