//! Model-assisted classification layered over the rule table.

use serde_json::Value;
use tracing::{debug, warn};

use crate::generative::TextGenerator;
use crate::intent::{classify_rules, extract_entity, Classification, Intent};
use crate::models::VisualizationMode;

/// Minimum model confidence for an override to be accepted.
pub const ACCEPT_CONFIDENCE: f64 = 0.55;

const ASSIST_RULE: &str = "assist";

/// Prompt asking the model to pick one intent from the closed set.
pub fn assist_prompt(question: &str, mode: Option<VisualizationMode>) -> String {
    let intents: Vec<String> = Intent::ALL
        .iter()
        .map(|i| format!("- {}: {}", i.as_str(), i.description()))
        .collect();

    format!(
        "Classify the user's question for a humanitarian risk map.\n\
         Choose exactly one intent from this list:\n{}\n\n\
         Current map mode: {}\n\
         Question: {}\n\n\
         Reply with JSON only, no prose: {{\"intent\": \"<intent>\", \"confidence\": <number between 0 and 1>}}",
        intents.join("\n"),
        mode.unwrap_or_default().as_str(),
        question.trim()
    )
}

/// Intent and confidence from a model reply, if both are well-formed.
///
/// Tolerates code fences and prose around the JSON object; the confidence
/// may be a number or a numeric string but must be finite.
pub fn parse_assist_reply(reply: &str) -> Option<(Intent, f64)> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&reply[start..=end]).ok()?;

    let intent: Intent = value.get("intent")?.as_str()?.parse().ok()?;
    let confidence = match value.get("confidence")? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    confidence.is_finite().then_some((intent, confidence))
}

/// Classify a question, letting the model override the rules when it is
/// confident enough. Never fails: any problem falls back to the rules.
pub async fn classify<G: TextGenerator>(
    question: &str,
    mode: Option<VisualizationMode>,
    assist: Option<&G>,
) -> Classification {
    let rules = classify_rules(question, mode);
    let Some(generator) = assist else {
        return rules;
    };

    let candidate = match generator.generate(&assist_prompt(question, mode)).await {
        Ok(reply) => match parse_assist_reply(&reply) {
            Some((intent, confidence)) if confidence >= ACCEPT_CONFIDENCE => Some(Classification {
                intent,
                entity: extract_entity(question),
                rule: ASSIST_RULE,
            }),
            Some((intent, confidence)) => {
                debug!(
                    "Assist suggested {} at confidence {:.2}, keeping rule result {}",
                    intent, confidence, rules.intent
                );
                None
            }
            None => {
                warn!("Assist reply was not a valid classification");
                None
            }
        },
        Err(e) => {
            warn!("Assist classification failed: {}", e);
            None
        }
    };

    match candidate {
        Some(c) if c.intent == Intent::CountryFocus && c.entity.is_none() => {
            debug!("Assist chose country focus but no place name was found");
            rules
        }
        Some(c) => c,
        None => rules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, Result};

    struct Scripted(std::result::Result<&'static str, &'static str>);

    impl TextGenerator for Scripted {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(e) => Err(Error::Generative(e.to_string())),
            }
        }
    }

    #[test]
    fn test_parse_plain_and_fenced_replies() {
        assert_eq!(
            parse_assist_reply(r#"{"intent": "flood-hotspots", "confidence": 0.9}"#),
            Some((Intent::FloodHotspots, 0.9))
        );
        assert_eq!(
            parse_assist_reply("```json\n{\"intent\": \"stable_countries\", \"confidence\": \"0.7\"}\n```"),
            Some((Intent::StableCountries, 0.7))
        );
    }

    #[test]
    fn test_parse_rejects_bad_replies() {
        assert_eq!(parse_assist_reply("no json here"), None);
        assert_eq!(parse_assist_reply(r#"{"intent": "weather", "confidence": 0.9}"#), None);
        assert_eq!(parse_assist_reply(r#"{"intent": "flood-hotspots", "confidence": "high"}"#), None);
        assert_eq!(parse_assist_reply(r#"{"intent": "flood-hotspots"}"#), None);
        assert_eq!(parse_assist_reply("} {"), None);
    }

    #[test]
    fn test_prompt_lists_every_intent() {
        let prompt = assist_prompt("show me floods", Some(VisualizationMode::Flood));
        for intent in Intent::ALL {
            assert!(prompt.contains(intent.as_str()));
        }
        assert!(prompt.contains("Current map mode: flood"));
    }

    #[tokio::test]
    async fn test_confident_override_is_accepted() {
        let g = Scripted(Ok(r#"{"intent": "crisis-hotspots", "confidence": 0.55}"#));
        let c = classify("where is it bad right now", None, Some(&g)).await;
        assert_eq!(c.intent, Intent::CrisisHotspots);
        assert_eq!(c.rule, "assist");
    }

    #[tokio::test]
    async fn test_low_confidence_keeps_rules() {
        let g = Scripted(Ok(r#"{"intent": "crisis-hotspots", "confidence": 0.54}"#));
        let c = classify("show me flood hotspots", None, Some(&g)).await;
        assert_eq!(c.intent, Intent::FloodHotspots);
    }

    #[tokio::test]
    async fn test_failure_keeps_rules() {
        let g = Scripted(Err("connection refused"));
        let c = classify("show me flood hotspots", None, Some(&g)).await;
        assert_eq!(c.intent, Intent::FloodHotspots);

        let g = Scripted(Ok("I think it is about floods"));
        let c = classify("show me flood hotspots", None, Some(&g)).await;
        assert_eq!(c.intent, Intent::FloodHotspots);
    }

    #[tokio::test]
    async fn test_country_focus_without_place_is_rederived() {
        let g = Scripted(Ok(r#"{"intent": "country-focus", "confidence": 0.95}"#));
        let c = classify("show me flood hotspots", None, Some(&g)).await;
        assert_eq!(c.intent, Intent::FloodHotspots);

        let c = classify("zoom to Kenya", None, Some(&g)).await;
        assert_eq!(c.intent, Intent::CountryFocus);
        assert_eq!(c.entity.as_deref(), Some("Kenya"));
    }

    #[tokio::test]
    async fn test_without_assist_rules_decide() {
        let c = classify::<Scripted>("hello", None, None).await;
        assert_eq!(c.intent, Intent::Smalltalk);
    }
}
