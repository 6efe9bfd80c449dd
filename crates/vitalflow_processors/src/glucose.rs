//! Continuous glucose monitoring analysis.

use crate::config::{minutes, GlucoseConfig};
use crate::error::{ProcessorError, Result};
use crate::insights::{base_insights, describe_span};
use crate::narrative::{describe_events, NarrativeBuilder};
use crate::processor::Processor;
use crate::samples::extract_samples;
use crate::stats::{percent_where, round2, summarize, trend, Trend};
use crate::window::{detect_sustained_events, Direction};
use serde_json::Value;
use std::time::Instant;
use vitalflow_protocol::keys;
use vitalflow_protocol::{DataType, MessageContext, ProcessingResult, Record, ValidationResult};

/// Consensus target: at least this share of readings in range.
const TIME_IN_RANGE_GOAL: f64 = 70.0;
/// Consensus ceiling for time below range.
const TIME_BELOW_RANGE_LIMIT: f64 = 4.0;
/// Consensus ceiling for time above range.
const TIME_ABOVE_RANGE_LIMIT: f64 = 25.0;
/// CV at or below this is considered stable.
const STABLE_CV: f64 = 36.0;

/// Glucose management indicator (%) from mean glucose in mg/dL.
pub fn glucose_management_indicator(mean_mg_dl: f64) -> f64 {
    3.31 + 0.02392 * mean_mg_dl
}

pub struct GlucoseProcessor {
    config: GlucoseConfig,
    initialized: bool,
}

impl GlucoseProcessor {
    pub fn new(config: GlucoseConfig) -> Self {
        Self {
            config,
            initialized: false,
        }
    }
}

impl Default for GlucoseProcessor {
    fn default() -> Self {
        Self::new(GlucoseConfig::default())
    }
}

impl Processor for GlucoseProcessor {
    fn name(&self) -> &'static str {
        "glucose"
    }

    fn data_type(&self) -> DataType {
        DataType::Glucose
    }

    fn initialize(&mut self) -> Result<()> {
        let c = &self.config;
        if c.target_low >= c.target_high {
            return Err(ProcessorError::Initialization {
                processor: self.name().to_string(),
                reason: format!("empty target range {}-{}", c.target_low, c.target_high),
            });
        }
        self.initialized = true;
        Ok(())
    }

    fn process(
        &self,
        records: &[Record],
        context: &MessageContext,
        validation: &ValidationResult,
    ) -> Result<ProcessingResult> {
        if !self.initialized {
            return Err(ProcessorError::NotInitialized {
                processor: self.name().to_string(),
            });
        }
        let started = Instant::now();
        let c = &self.config;

        let extraction = extract_samples(records, &c.value_field, &c.timestamp_field);
        if extraction.is_empty() {
            return Ok(ProcessingResult::failed(
                format!(
                    "no usable glucose readings: {} of {} records lacked a valid '{}' and '{}'",
                    extraction.dropped,
                    records.len(),
                    c.value_field,
                    c.timestamp_field
                ),
                validation.quality_score,
            )
            .with_processing_time(started.elapsed()));
        }

        let values = extraction.values();
        let summary = summarize(&values)
            .ok_or_else(|| ProcessorError::internal("summary of non-empty samples was empty"))?;
        let in_range = percent_where(&values, |v| v >= c.target_low && v <= c.target_high);
        let below = percent_where(&values, |v| v < c.target_low);
        let above = percent_where(&values, |v| v > c.target_high);
        let cv = summary.coefficient_of_variation();
        let gmi = glucose_management_indicator(summary.mean);
        let direction = trend(&values);

        let min_duration = minutes(c.min_event_minutes);
        let hyper = detect_sustained_events(
            &extraction.samples,
            c.hyperglycemia_threshold,
            Direction::Above,
            min_duration,
        );
        let hypo = detect_sustained_events(
            &extraction.samples,
            c.hypoglycemia_threshold,
            Direction::Below,
            min_duration,
        );

        let mut insights = base_insights(&extraction, &summary, in_range, direction, &c.bands);
        insights.insert("time_in_range".into(), Value::from(round2(in_range)));
        insights.insert("time_below_range".into(), Value::from(round2(below)));
        insights.insert("time_above_range".into(), Value::from(round2(above)));
        insights.insert("gmi".into(), Value::from(round2(gmi)));
        insights.insert("hyperglycemia_events".into(), Value::from(hyper.len()));
        insights.insert("hypoglycemia_events".into(), Value::from(hypo.len()));
        let events: Vec<Value> = hyper
            .iter()
            .map(|e| e.to_json("hyperglycemia"))
            .chain(hypo.iter().map(|e| e.to_json("hypoglycemia")))
            .collect();
        insights.insert(keys::EVENTS.into(), Value::Array(events));

        let first = extraction.samples[0].timestamp;
        let last = extraction.samples[extraction.samples.len() - 1].timestamp;
        let mut narrative = NarrativeBuilder::new()
            .summary(format!(
                "Analyzed {} glucose readings over {} for {}: mean {:.0} mg/dL (range {:.0}-{:.0}).",
                summary.count,
                describe_span(first, last),
                context.owner_id,
                summary.mean,
                summary.min,
                summary.max
            ))
            .assessment(format!(
                "Time in range ({:.0}-{:.0} mg/dL) was {:.1}%, {} the {:.0}% goal, with {:.1}% below and {:.1}% above range; estimated GMI {:.1}%.",
                c.target_low,
                c.target_high,
                in_range,
                if in_range >= TIME_IN_RANGE_GOAL { "meeting" } else { "short of" },
                TIME_IN_RANGE_GOAL,
                below,
                above,
                gmi
            ));
        if let Some(text) = describe_events("hyperglycemia", &hyper, "mg/dL") {
            narrative = narrative.event(text);
        }
        if let Some(text) = describe_events("hypoglycemia", &hypo, "mg/dL") {
            narrative = narrative.event(text);
        }
        let variability = if cv <= STABLE_CV { "stable" } else { "highly variable" };
        let trend_text = match direction {
            Trend::Stable => format!("Levels held steady and were {variability} (CV {cv:.1}%)."),
            other => {
                format!("Levels were {other} over the period and {variability} (CV {cv:.1}%).")
            }
        };
        narrative = narrative.trend(trend_text).recommendation(
            if below > TIME_BELOW_RANGE_LIMIT || !hypo.is_empty() {
                Some("Frequent low readings warrant a review of hypoglycemia risk.".to_string())
            } else if above > TIME_ABOVE_RANGE_LIMIT {
                Some(
                    "Sustained highs suggest reviewing meal timing and therapy settings."
                        .to_string(),
                )
            } else {
                None
            },
        );

        Ok(ProcessingResult::succeeded(
            narrative.build(),
            insights,
            summary.count,
            validation.quality_score,
        )
        .with_processing_time(started.elapsed()))
    }
}
