//! Allocation tiers, proportional shares and budget parsing.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

use crate::models::ResultRecord;

/// Scores at or above this are top tier.
pub const PRIORITY_TIER_FROM: f64 = 0.70;
/// Scores at or above this (and below the top cutoff) are middle tier.
pub const ELEVATED_TIER_FROM: f64 = 0.45;

/// Allocation tier label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationTier {
    Priority,
    Elevated,
    Baseline,
}

impl AllocationTier {
    pub fn from_score(score: f64) -> Self {
        if score >= PRIORITY_TIER_FROM {
            AllocationTier::Priority
        } else if score >= ELEVATED_TIER_FROM {
            AllocationTier::Elevated
        } else {
            AllocationTier::Baseline
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "priority" => Some(AllocationTier::Priority),
            "elevated" => Some(AllocationTier::Elevated),
            "baseline" => Some(AllocationTier::Baseline),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationTier::Priority => "priority",
            AllocationTier::Elevated => "elevated",
            AllocationTier::Baseline => "baseline",
        }
    }
}

/// Each score over the window sum; all zero when the sum is not positive.
pub fn allocation_shares(scores: &[f64]) -> Vec<f64> {
    let total: f64 = scores.iter().filter(|s| s.is_finite() && **s > 0.0).sum();
    scores
        .iter()
        .map(|s| {
            if total > 0.0 && s.is_finite() && *s > 0.0 {
                s / total
            } else {
                0.0
            }
        })
        .collect()
}

fn budget_patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(
                r"(?i)(?:\$|\busd\s*)\s*([0-9][0-9,]*(?:\.[0-9]+)?)\s*(k|thousand|m|mn|mm|million|b|bn|billion)?\b",
            )
            .expect("valid budget pattern"),
            Regex::new(
                r"(?i)\b([0-9][0-9,]*(?:\.[0-9]+)?)\s*(k|thousand|m|mn|million|b|bn|billion)?\s*(?:dollars|usd)\b",
            )
            .expect("valid budget pattern"),
        ]
    })
}

fn multiplier(suffix: Option<&str>) -> f64 {
    match suffix.map(|s| s.to_ascii_lowercase()) {
        Some(s) if s == "k" || s == "thousand" => 1e3,
        Some(s) if s == "m" || s == "mn" || s == "mm" || s == "million" => 1e6,
        Some(s) if s == "b" || s == "bn" || s == "billion" => 1e9,
        _ => 1.0,
    }
}

/// Budget named in a question, in dollars.
pub fn extract_budget(question: &str) -> Option<f64> {
    budget_patterns().iter().find_map(|pattern| {
        let caps = pattern.captures(question)?;
        let amount: f64 = caps.get(1)?.as_str().replace(',', "").parse().ok()?;
        let value = amount * multiplier(caps.get(2).map(|m| m.as_str()));
        (value.is_finite() && value > 0.0).then_some(value)
    })
}

/// Fill tiers and shares the warehouse did not return, and turn shares into
/// dollar amounts when a budget was named.
pub fn apply_allocation(records: &mut [ResultRecord], budget: Option<f64>) {
    if records.iter().any(|r| r.context.allocation_share_pct.is_none()) {
        let scores: Vec<f64> = records.iter().map(|r| r.score).collect();
        for (record, share) in records.iter_mut().zip(allocation_shares(&scores)) {
            record.context.allocation_share_pct = Some(share * 100.0);
        }
    }

    for record in records.iter_mut() {
        if record.context.allocation_tier.is_none() {
            record.context.allocation_tier = Some(AllocationTier::from_score(record.score));
        }
        if let (Some(budget), Some(pct)) = (budget, record.context.allocation_share_pct) {
            record.context.allocated_amount = Some((budget * pct / 100.0).round());
        }
    }
}

/// Compact dollar rendering: $10M, $2.5M, $750K.
pub fn format_amount(amount: f64) -> String {
    let (value, suffix) = if amount >= 1e9 {
        (amount / 1e9, "B")
    } else if amount >= 1e6 {
        (amount / 1e6, "M")
    } else if amount >= 1e3 {
        (amount / 1e3, "K")
    } else {
        (amount, "")
    };
    let rendered = format!("{:.1}", value);
    let rendered = rendered.strip_suffix(".0").unwrap_or(&rendered);
    format!("${}{}", rendered, suffix)
}
