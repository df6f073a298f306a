//! Aggregate statistics used to ground generated answers.

use serde::Serialize;

use crate::models::{Band, ResultRecord};

const TOP_IDENTIFIERS: usize = 5;

/// Counts per band.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BandCounts {
    pub green: usize,
    pub yellow: usize,
    pub red: usize,
}

/// Aggregate view of one result set.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    pub row_count: usize,
    pub band_counts: BandCounts,
    pub mean_score: Option<f64>,
    pub top_identifiers: Vec<String>,
}

pub fn summarize(records: &[ResultRecord]) -> ContextSummary {
    let mut band_counts = BandCounts::default();
    for record in records {
        match record.status {
            Band::Green => band_counts.green += 1,
            Band::Yellow => band_counts.yellow += 1,
            Band::Red => band_counts.red += 1,
        }
    }

    let finite: Vec<f64> = records
        .iter()
        .map(|r| r.score)
        .filter(|s| s.is_finite())
        .collect();
    let mean_score = (!finite.is_empty()).then(|| finite.iter().sum::<f64>() / finite.len() as f64);

    ContextSummary {
        row_count: records.len(),
        band_counts,
        mean_score,
        top_identifiers: records
            .iter()
            .take(TOP_IDENTIFIERS)
            .map(|r| r.id.display())
            .collect(),
    }
}
