//! Heart rate analysis.

use crate::config::{minutes, HeartRateConfig};
use crate::error::{ProcessorError, Result};
use crate::insights::{base_insights, describe_span};
use crate::narrative::{describe_events, NarrativeBuilder};
use crate::processor::Processor;
use crate::samples::extract_samples;
use crate::stats::{percent_where, percentile, round2, summarize, trend, Trend};
use crate::window::{detect_sustained_events, Direction};
use serde_json::Value;
use std::time::Instant;
use vitalflow_protocol::keys;
use vitalflow_protocol::{DataType, MessageContext, ProcessingResult, Record, ValidationResult};

pub struct HeartRateProcessor {
    config: HeartRateConfig,
    initialized: bool,
}

impl HeartRateProcessor {
    pub fn new(config: HeartRateConfig) -> Self {
        Self {
            config,
            initialized: false,
        }
    }
}

impl Default for HeartRateProcessor {
    fn default() -> Self {
        Self::new(HeartRateConfig::default())
    }
}

impl Processor for HeartRateProcessor {
    fn name(&self) -> &'static str {
        "heart_rate"
    }

    fn data_type(&self) -> DataType {
        DataType::HeartRate
    }

    fn initialize(&mut self) -> Result<()> {
        if self.config.bradycardia_threshold >= self.config.tachycardia_threshold {
            return Err(ProcessorError::Initialization {
                processor: self.name().to_string(),
                reason: "bradycardia threshold must be below tachycardia threshold".to_string(),
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
                    "no usable heart rate samples: {} of {} records lacked a valid '{}' and '{}'",
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
        let resting = percentile(&values, c.resting_percentile).unwrap_or(summary.min);
        let in_zone = percent_where(&values, |v| {
            v >= c.bradycardia_threshold && v <= c.tachycardia_threshold
        });
        let direction = trend(&values);

        let min_duration = minutes(c.min_event_minutes);
        let tachy = detect_sustained_events(
            &extraction.samples,
            c.tachycardia_threshold,
            Direction::Above,
            min_duration,
        );
        let brady = detect_sustained_events(
            &extraction.samples,
            c.bradycardia_threshold,
            Direction::Below,
            min_duration,
        );

        let mut insights = base_insights(&extraction, &summary, in_zone, direction, &c.bands);
        insights.insert("resting_heart_rate".into(), Value::from(round2(resting)));
        insights.insert("tachycardia_events".into(), Value::from(tachy.len()));
        insights.insert("bradycardia_events".into(), Value::from(brady.len()));
        let events: Vec<Value> = tachy
            .iter()
            .map(|e| e.to_json("tachycardia"))
            .chain(brady.iter().map(|e| e.to_json("bradycardia")))
            .collect();
        insights.insert(keys::EVENTS.into(), Value::Array(events));

        let first = extraction.samples[0].timestamp;
        let last = extraction.samples[extraction.samples.len() - 1].timestamp;
        let resting_band = c.bands.classify(resting);
        let mut narrative = NarrativeBuilder::new()
            .summary(format!(
                "Analyzed {} heart rate samples over {} for {}: mean {:.0} bpm (range {:.0}-{:.0}).",
                summary.count,
                describe_span(first, last),
                context.owner_id,
                summary.mean,
                summary.min,
                summary.max
            ))
            .assessment(format!(
                "Estimated resting heart rate is {:.0} bpm ({}), and {:.1}% of samples fell within {:.0}-{:.0} bpm.",
                resting,
                resting_band.name.replace('_', " "),
                in_zone,
                c.bradycardia_threshold,
                c.tachycardia_threshold
            ));
        if let Some(text) = describe_events("tachycardia", &tachy, "bpm") {
            narrative = narrative.event(text);
        }
        if let Some(text) = describe_events("bradycardia", &brady, "bpm") {
            narrative = narrative.event(text);
        }
        let cv = summary.coefficient_of_variation();
        narrative = narrative.trend(match direction {
            Trend::Stable => format!("Heart rate was steady across the period (CV {cv:.1}%)."),
            other => format!("Heart rate was {other} across the period (CV {cv:.1}%)."),
        });
        narrative = narrative.recommendation(if !tachy.is_empty() || !brady.is_empty() {
            Some(
                "Sustained out-of-range episodes should be reviewed against activity and symptoms."
                    .to_string(),
            )
        } else {
            None
        });

        Ok(ProcessingResult::succeeded(
            narrative.build(),
            insights,
            summary.count,
            validation.quality_score,
        )
        .with_processing_time(started.elapsed()))
    }
}
