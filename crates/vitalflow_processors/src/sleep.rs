//! Sleep stage analysis.
//!
//! Input records are stage segments: a start timestamp, a stage label and a
//! length in minutes.

use crate::config::{end_after_minutes, minutes, SleepConfig};
use crate::error::{ProcessorError, Result};
use crate::insights::describe_span;
use crate::narrative::{plural, NarrativeBuilder};
use crate::processor::Processor;
use crate::samples::span_samples;
use crate::stats::{round2, summarize};
use crate::window::detect_sustained_events;
use crate::window::Direction;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use vitalflow_protocol::keys;
use vitalflow_protocol::{DataType, MessageContext, ProcessingResult, Record, ValidationResult};
use vitalflow_quality::{lookup_path, numeric_value, parse_timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SleepStage {
    Awake,
    Light,
    Deep,
    Rem,
    /// Asleep, stage not reported
    Asleep,
}

impl SleepStage {
    pub const ALL: [SleepStage; 5] = [
        SleepStage::Awake,
        SleepStage::Light,
        SleepStage::Deep,
        SleepStage::Rem,
        SleepStage::Asleep,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SleepStage::Awake => "awake",
            SleepStage::Light => "light",
            SleepStage::Deep => "deep",
            SleepStage::Rem => "rem",
            SleepStage::Asleep => "asleep",
        }
    }

    pub fn is_asleep(&self) -> bool {
        !matches!(self, SleepStage::Awake)
    }
}

impl fmt::Display for SleepStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SleepStage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "awake" | "wake" | "awakening" => Ok(SleepStage::Awake),
            "light" | "core" | "n1" | "n2" => Ok(SleepStage::Light),
            "deep" | "n3" | "slow_wave" => Ok(SleepStage::Deep),
            "rem" => Ok(SleepStage::Rem),
            "asleep" | "sleep" | "unspecified" => Ok(SleepStage::Asleep),
            _ => Err(format!("Invalid sleep stage: '{}'", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SleepSegment {
    pub start: DateTime<Utc>,
    /// `start + duration_minutes`, always representable
    pub end: DateTime<Utc>,
    pub stage: SleepStage,
    pub duration_minutes: f64,
}

/// Segments in start order plus the count of unusable records.
///
/// A segment whose end cannot be represented as a timestamp is unusable.
pub fn extract_segments(
    records: &[Record],
    config: &SleepConfig,
) -> (Vec<SleepSegment>, usize) {
    let mut segments = Vec::with_capacity(records.len());
    let mut dropped = 0;
    for record in records {
        let start = lookup_path(record, &config.timestamp_field).and_then(parse_timestamp);
        let stage = lookup_path(record, &config.stage_field)
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<SleepStage>().ok());
        let duration = numeric_value(record, &config.duration_field).filter(|d| *d >= 0.0);
        let segment = match (start, stage, duration) {
            (Some(start), Some(stage), Some(duration_minutes)) => {
                end_after_minutes(start, duration_minutes).map(|end| SleepSegment {
                    start,
                    end,
                    stage,
                    duration_minutes,
                })
            }
            _ => None,
        };
        match segment {
            Some(segment) => segments.push(segment),
            None => dropped += 1,
        }
    }
    segments.sort_by_key(|s| s.start);
    (segments, dropped)
}

pub struct SleepProcessor {
    config: SleepConfig,
    initialized: bool,
}

impl SleepProcessor {
    pub fn new(config: SleepConfig) -> Self {
        Self {
            config,
            initialized: false,
        }
    }
}

impl Default for SleepProcessor {
    fn default() -> Self {
        Self::new(SleepConfig::default())
    }
}

impl Processor for SleepProcessor {
    fn name(&self) -> &'static str {
        "sleep"
    }

    fn data_type(&self) -> DataType {
        DataType::Sleep
    }

    fn initialize(&mut self) -> Result<()> {
        if !(0.0..1.0).contains(&self.config.wake_threshold) {
            return Err(ProcessorError::Initialization {
                processor: self.name().to_string(),
                reason: format!(
                    "wake_threshold must be within [0, 1), got {}",
                    self.config.wake_threshold
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

        let (segments, dropped) = extract_segments(records, c);
        let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
            return Ok(ProcessingResult::failed(
                format!(
                    "no usable sleep segments: {} of {} records lacked a valid '{}', '{}' or '{}'",
                    dropped,
                    records.len(),
                    c.timestamp_field,
                    c.stage_field,
                    c.duration_field
                ),
                validation.quality_score,
            )
            .with_processing_time(started.elapsed()));
        };

        let mut stage_minutes: BTreeMap<SleepStage, f64> =
            SleepStage::ALL.iter().map(|s| (*s, 0.0)).collect();
        for segment in &segments {
            *stage_minutes.entry(segment.stage).or_insert(0.0) += segment.duration_minutes;
        }
        let in_bed: f64 = stage_minutes.values().sum();
        let asleep: f64 = stage_minutes
            .iter()
            .filter(|(stage, _)| stage.is_asleep())
            .map(|(_, m)| *m)
            .sum();
        let efficiency = if in_bed > 0.0 { asleep / in_bed * 100.0 } else { 0.0 };
        let efficiency_band = c.efficiency_bands.classify(efficiency);

        // Awake indicator per segment; gaps between segments count as not awake.
        let spans: Vec<_> = segments
            .iter()
            .map(|s| {
                let awake = if s.stage == SleepStage::Awake { 1.0 } else { 0.0 };
                (s.start, s.end, awake)
            })
            .collect();
        let indicator = span_samples(&spans);
        let wake_episodes = detect_sustained_events(
            &indicator,
            c.wake_threshold,
            Direction::Above,
            minutes(c.min_wake_minutes),
        );

        let durations: Vec<f64> = segments.iter().map(|s| s.duration_minutes).collect();
        let summary = summarize(&durations)
            .ok_or_else(|| ProcessorError::internal("summary of non-empty segments was empty"))?;

        let mut insights = vitalflow_protocol::InsightMap::new();
        insights.insert(keys::SAMPLE_COUNT.into(), Value::from(segments.len()));
        insights.insert(keys::DROPPED_SAMPLES.into(), Value::from(dropped));
        insights.insert(keys::MEAN.into(), Value::from(round2(summary.mean)));
        insights.insert(keys::STD_DEV.into(), Value::from(round2(summary.std_dev)));
        insights.insert(keys::MIN.into(), Value::from(summary.min));
        insights.insert(keys::MAX.into(), Value::from(summary.max));
        insights.insert(keys::PERCENT_IN_RANGE.into(), Value::from(round2(efficiency)));
        insights.insert("time_in_bed_minutes".into(), Value::from(round2(in_bed)));
        insights.insert("total_sleep_minutes".into(), Value::from(round2(asleep)));
        insights.insert("sleep_efficiency".into(), Value::from(round2(efficiency)));
        insights.insert(
            "efficiency_band".into(),
            Value::from(efficiency_band.name.clone()),
        );
        for (band, share) in c.efficiency_bands.distribution(&[efficiency]) {
            insights.insert(keys::band_key(&band), Value::from(share));
        }
        let mut stages = Map::new();
        for (stage, mins) in &stage_minutes {
            stages.insert(stage.as_str().to_string(), Value::from(round2(*mins)));
        }
        insights.insert("stage_minutes".into(), Value::Object(stages));
        insights.insert("wake_episodes".into(), Value::from(wake_episodes.len()));
        insights.insert(
            keys::EVENTS.into(),
            Value::Array(wake_episodes.iter().map(|e| e.to_json("wake_episode")).collect()),
        );

        let share = |stage: SleepStage| {
            if asleep > 0.0 {
                stage_minutes.get(&stage).copied().unwrap_or(0.0) / asleep * 100.0
            } else {
                0.0
            }
        };
        let mut narrative = NarrativeBuilder::new()
            .summary(format!(
                "Recorded {} sleep segments spanning {} for {}: {:.0} minutes asleep of {:.0} minutes in bed.",
                segments.len(),
                describe_span(first.start, last.end),
                context.owner_id,
                asleep,
                in_bed
            ))
            .assessment(format!(
                "Sleep efficiency was {:.1}% ({}), with {:.0}% deep and {:.0}% REM sleep.",
                efficiency,
                efficiency_band.name,
                share(SleepStage::Deep),
                share(SleepStage::Rem)
            ));
        if !wake_episodes.is_empty() {
            let longest = wake_episodes
                .iter()
                .map(|e| e.duration_minutes())
                .fold(0.0, f64::max);
            narrative = narrative.event(format!(
                "There were {} lasting at least {:.0} minutes (longest {:.0} minutes).",
                plural(wake_episodes.len(), "extended wake episode", "extended wake episodes"),
                c.min_wake_minutes,
                longest
            ));
        }
        narrative = narrative
            .trend(format!(
                "Segments averaged {:.0} minutes (longest {:.0}).",
                summary.mean, summary.max
            ))
            .recommendation(if efficiency_band.severity > crate::bands::Severity::Normal {
                Some("Low efficiency suggests reviewing sleep schedule consistency.".to_string())
            } else {
                None
            });

        Ok(ProcessingResult::succeeded(
            narrative.build(),
            insights,
            segments.len(),
            validation.quality_score,
        )
        .with_processing_time(started.elapsed()))
    }
}
