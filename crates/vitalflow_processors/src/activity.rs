//! Step-count activity analysis.
//!
//! Records are step intervals: a start timestamp, a step count and an
//! optional interval length in minutes (one minute when absent).

use crate::config::{end_after_minutes, minutes, ActivityConfig};
use crate::error::{ProcessorError, Result};
use crate::insights::describe_span;
use crate::narrative::{plural, NarrativeBuilder};
use crate::processor::Processor;
use crate::samples::span_samples;
use crate::stats::{percent_where, round2, summarize, trend, Trend};
use crate::window::{detect_sustained_events, Direction};
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;
use vitalflow_protocol::keys;
use vitalflow_protocol::{
    DataType, InsightMap, MessageContext, ProcessingResult, Record, ValidationResult,
};
use vitalflow_quality::{lookup_path, numeric_value, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepInterval {
    pub start: DateTime<Utc>,
    /// `start + duration_minutes`, always representable
    pub end: DateTime<Utc>,
    pub steps: f64,
    pub duration_minutes: f64,
}

impl StepInterval {
    /// Steps per minute over the interval.
    pub fn cadence(&self) -> f64 {
        self.steps / self.duration_minutes
    }
}

/// Intervals in start order plus the count of unusable records.
///
/// An interval whose end cannot be represented as a timestamp is unusable.
pub fn extract_intervals(
    records: &[Record],
    config: &ActivityConfig,
) -> (Vec<StepInterval>, usize) {
    let mut intervals = Vec::with_capacity(records.len());
    let mut dropped = 0;
    for record in records {
        let start = lookup_path(record, &config.timestamp_field).and_then(parse_timestamp);
        let steps = numeric_value(record, &config.steps_field).filter(|s| *s >= 0.0);
        let duration = match lookup_path(record, &config.duration_field) {
            None | Some(Value::Null) => Some(1.0),
            Some(_) => numeric_value(record, &config.duration_field).filter(|d| *d > 0.0),
        };
        let interval = match (start, steps, duration) {
            (Some(start), Some(steps), Some(duration_minutes)) => {
                end_after_minutes(start, duration_minutes).map(|end| StepInterval {
                    start,
                    end,
                    steps,
                    duration_minutes,
                })
            }
            _ => None,
        };
        match interval {
            Some(interval) => intervals.push(interval),
            None => dropped += 1,
        }
    }
    intervals.sort_by_key(|i| i.start);
    (intervals, dropped)
}

/// Step totals per UTC calendar day, keyed by interval start.
pub fn daily_totals(intervals: &[StepInterval]) -> BTreeMap<NaiveDate, f64> {
    let mut totals = BTreeMap::new();
    for interval in intervals {
        *totals.entry(interval.start.date_naive()).or_insert(0.0) += interval.steps;
    }
    totals
}

pub struct ActivityProcessor {
    config: ActivityConfig,
    initialized: bool,
}

impl ActivityProcessor {
    pub fn new(config: ActivityConfig) -> Self {
        Self {
            config,
            initialized: false,
        }
    }
}

impl Default for ActivityProcessor {
    fn default() -> Self {
        Self::new(ActivityConfig::default())
    }
}

impl Processor for ActivityProcessor {
    fn name(&self) -> &'static str {
        "activity"
    }

    fn data_type(&self) -> DataType {
        DataType::Activity
    }

    fn initialize(&mut self) -> Result<()> {
        if self.config.bout_steps_per_minute <= 0.0 {
            return Err(ProcessorError::Initialization {
                processor: self.name().to_string(),
                reason: format!(
                    "bout_steps_per_minute must be positive, got {}",
                    self.config.bout_steps_per_minute
                ),
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

        let (intervals, dropped) = extract_intervals(records, c);
        let (Some(first), Some(last)) = (intervals.first(), intervals.last()) else {
            return Ok(ProcessingResult::failed(
                format!(
                    "no usable step intervals: {} of {} records lacked a valid '{}' and '{}'",
                    dropped,
                    records.len(),
                    c.steps_field,
                    c.timestamp_field
                ),
                validation.quality_score,
            )
            .with_processing_time(started.elapsed()));
        };

        let total_steps: f64 = intervals.iter().map(|i| i.steps).sum();
        let days = daily_totals(&intervals);
        let day_values: Vec<f64> = days.values().copied().collect();
        let summary = summarize(&day_values)
            .ok_or_else(|| ProcessorError::internal("summary of non-empty days was empty"))?;
        let daily_band = c.daily_bands.classify(summary.mean);
        let goal_days = percent_where(&day_values, |v| v >= c.daily_step_goal);
        let direction = trend(&day_values);

        let spans: Vec<_> = intervals
            .iter()
            .map(|i| (i.start, i.end, i.cadence()))
            .collect();
        let cadence = span_samples(&spans);
        let bouts = detect_sustained_events(
            &cadence,
            c.bout_steps_per_minute,
            Direction::Above,
            minutes(c.min_bout_minutes),
        );
        let active_minutes: f64 = bouts.iter().map(|b| b.duration_minutes()).sum();

        let mut insights = InsightMap::new();
        insights.insert(keys::SAMPLE_COUNT.into(), Value::from(intervals.len()));
        insights.insert(keys::DROPPED_SAMPLES.into(), Value::from(dropped));
        insights.insert(keys::MEAN.into(), Value::from(round2(summary.mean)));
        insights.insert(keys::STD_DEV.into(), Value::from(round2(summary.std_dev)));
        insights.insert(keys::MIN.into(), Value::from(summary.min));
        insights.insert(keys::MAX.into(), Value::from(summary.max));
        insights.insert(keys::PERCENT_IN_RANGE.into(), Value::from(round2(goal_days)));
        insights.insert(
            keys::COEFFICIENT_OF_VARIATION.into(),
            Value::from(round2(summary.coefficient_of_variation())),
        );
        insights.insert(keys::TREND.into(), Value::from(direction.as_str()));
        for (band, share) in c.daily_bands.distribution(&day_values) {
            insights.insert(keys::band_key(&band), Value::from(round2(share)));
        }
        insights.insert("total_steps".into(), Value::from(total_steps));
        insights.insert("days".into(), Value::from(days.len()));
        insights.insert("average_daily_steps".into(), Value::from(round2(summary.mean)));
        insights.insert("daily_band".into(), Value::from(daily_band.name.clone()));
        let mut per_day = Map::new();
        for (day, steps) in &days {
            per_day.insert(day.format("%Y-%m-%d").to_string(), Value::from(*steps));
        }
        insights.insert("daily_steps".into(), Value::Object(per_day));
        insights.insert("active_bouts".into(), Value::from(bouts.len()));
        insights.insert("active_minutes".into(), Value::from(round2(active_minutes)));
        insights.insert(
            keys::EVENTS.into(),
            Value::Array(bouts.iter().map(|b| b.to_json("active_bout")).collect()),
        );

        let mut narrative = NarrativeBuilder::new()
            .summary(format!(
                "Counted {:.0} steps across {} over {} for {}.",
                total_steps,
                plural(days.len(), "day", "days"),
                describe_span(first.start, last.end),
                context.owner_id
            ))
            .assessment(format!(
                "Average daily steps were {:.0} ({}); the {:.0}-step goal was met on {:.0}% of days.",
                summary.mean, daily_band.name, c.daily_step_goal, goal_days
            ));
        if !bouts.is_empty() {
            narrative = narrative.event(format!(
                "Recorded {} of brisk activity above {:.0} steps/min, {:.0} active minutes in total.",
                plural(bouts.len(), "bout", "bouts"),
                c.bout_steps_per_minute,
                active_minutes
            ));
        }
        if days.len() > 1 {
            narrative = narrative.trend(match direction {
                Trend::Stable => "Daily step counts held steady.".to_string(),
                other => format!("Daily step counts were {other}."),
            });
        }
        narrative = narrative.recommendation(
            if daily_band.severity > crate::bands::Severity::Normal {
                Some(
                    "Activity is low; short regular walks would raise the daily total."
                        .to_string(),
                )
            } else {
                None
            },
        );

        Ok(ProcessingResult::succeeded(
            narrative.build(),
            insights,
            intervals.len(),
            validation.quality_score,
        )
        .with_processing_time(started.elapsed()))
    }
}
