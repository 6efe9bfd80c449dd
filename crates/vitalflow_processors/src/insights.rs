//! Insight-map helpers shared by the numeric processors.

use crate::bands::BandTable;
use crate::samples::Extraction;
use crate::stats::{round2, Summary, Trend};
use chrono::{DateTime, Utc};
use serde_json::Value;
use vitalflow_protocol::keys;
use vitalflow_protocol::InsightMap;

/// Keys every numeric processor emits.
pub(crate) fn base_insights(
    extraction: &Extraction,
    summary: &Summary,
    percent_in_range: f64,
    trend: Trend,
    bands: &BandTable,
) -> InsightMap {
    let mut insights = InsightMap::new();
    insights.insert(keys::SAMPLE_COUNT.into(), Value::from(summary.count));
    insights.insert(keys::DROPPED_SAMPLES.into(), Value::from(extraction.dropped));
    insights.insert(keys::MEAN.into(), Value::from(round2(summary.mean)));
    insights.insert(keys::STD_DEV.into(), Value::from(round2(summary.std_dev)));
    insights.insert(keys::MIN.into(), Value::from(summary.min));
    insights.insert(keys::MAX.into(), Value::from(summary.max));
    insights.insert(
        keys::PERCENT_IN_RANGE.into(),
        Value::from(round2(percent_in_range)),
    );
    insights.insert(
        keys::COEFFICIENT_OF_VARIATION.into(),
        Value::from(round2(summary.coefficient_of_variation())),
    );
    insights.insert(keys::TREND.into(), Value::from(trend.as_str()));
    for (band, share) in bands.distribution(&extraction.values()) {
        insights.insert(keys::band_key(&band), Value::from(round2(share)));
    }
    insights
}

/// Human description of the span between two instants ("45 minutes", "3.5 hours", "2.0 days").
pub(crate) fn describe_span(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let minutes = (end - start).num_seconds() as f64 / 60.0;
    if minutes < 90.0 {
        format!("{:.0} minutes", minutes.max(0.0))
    } else if minutes < 48.0 * 60.0 {
        format!("{:.1} hours", minutes / 60.0)
    } else {
        format!("{:.1} days", minutes / (24.0 * 60.0))
    }
}
