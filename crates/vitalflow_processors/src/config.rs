//! Processor thresholds and reference tables.
//!
//! Lives under `[processors.*]` in the worker TOML. Every field has a
//! default, so an empty section is valid.

use crate::bands::{BandTable, ReferenceBand, Severity};
use crate::error::{ProcessorError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use vitalflow_protocol::defaults::DEFAULT_TIMESTAMP_FIELD;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessorsConfig {
    #[serde(default)]
    pub glucose: GlucoseConfig,
    #[serde(default)]
    pub heart_rate: HeartRateConfig,
    #[serde(default)]
    pub sleep: SleepConfig,
    #[serde(default)]
    pub activity: ActivityConfig,
}

impl ProcessorsConfig {
    pub fn validate(&self) -> Result<()> {
        check_minutes("glucose.min_event_minutes", self.glucose.min_event_minutes)?;
        check_minutes("heart_rate.min_event_minutes", self.heart_rate.min_event_minutes)?;
        check_minutes("sleep.min_wake_minutes", self.sleep.min_wake_minutes)?;
        check_minutes("activity.min_bout_minutes", self.activity.min_bout_minutes)?;
        if self.glucose.target_low >= self.glucose.target_high {
            return Err(ProcessorError::config(format!(
                "glucose target range is empty: {} >= {}",
                self.glucose.target_low, self.glucose.target_high
            )));
        }
        if !(0.0..=100.0).contains(&self.heart_rate.resting_percentile) {
            return Err(ProcessorError::config(format!(
                "heart_rate.resting_percentile must be within [0, 100], got {}",
                self.heart_rate.resting_percentile
            )));
        }
        Ok(())
    }
}

fn check_minutes(name: &str, minutes: f64) -> Result<()> {
    if minutes.is_finite() && minutes >= 0.0 {
        Ok(())
    } else {
        Err(ProcessorError::config(format!(
            "{name} must be a non-negative number of minutes, got {minutes}"
        )))
    }
}

/// Longest span [`minutes`] can represent.
const MAX_MINUTES: f64 = (i64::MAX / 60_000) as f64;

/// Minutes as a chrono duration (millisecond precision).
///
/// Values beyond the representable range are clamped; NaN becomes zero.
pub fn minutes(value: f64) -> Duration {
    let clamped = if value.is_nan() {
        0.0
    } else {
        value.clamp(-MAX_MINUTES, MAX_MINUTES)
    };
    Duration::milliseconds((clamped * 60_000.0).round() as i64)
}

/// `start + value` minutes, or `None` when the result is not a representable
/// timestamp.
pub fn end_after_minutes(start: DateTime<Utc>, value: f64) -> Option<DateTime<Utc>> {
    if !value.is_finite() || value.abs() > MAX_MINUTES {
        return None;
    }
    start.checked_add_signed(minutes(value))
}

fn default_timestamp_field() -> String {
    DEFAULT_TIMESTAMP_FIELD.to_string()
}

fn default_duration_field() -> String {
    "duration_minutes".to_string()
}

// ============================================================================
// Glucose
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlucoseConfig {
    #[serde(default = "default_glucose_field")]
    pub value_field: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    /// Lower edge of the target range (mg/dL, inclusive)
    #[serde(default = "default_target_low")]
    pub target_low: f64,
    /// Upper edge of the target range (mg/dL, inclusive)
    #[serde(default = "default_target_high")]
    pub target_high: f64,
    #[serde(default = "default_target_high")]
    pub hyperglycemia_threshold: f64,
    #[serde(default = "default_target_low")]
    pub hypoglycemia_threshold: f64,
    #[serde(default = "default_glucose_event_minutes")]
    pub min_event_minutes: f64,
    #[serde(default = "default_glucose_bands")]
    pub bands: BandTable,
}

fn default_glucose_field() -> String {
    "glucose_mg_dl".to_string()
}

fn default_target_low() -> f64 {
    70.0
}

fn default_target_high() -> f64 {
    180.0
}

fn default_glucose_event_minutes() -> f64 {
    15.0
}

fn default_glucose_bands() -> BandTable {
    BandTable::from_trusted(vec![
        ReferenceBand::below("very_low", Severity::Critical, 54.0),
        ReferenceBand::below("low", Severity::Warning, 70.0),
        ReferenceBand::through("in_range", Severity::Normal, 180.0),
        ReferenceBand::through("high", Severity::Warning, 250.0),
        ReferenceBand::above("very_high", Severity::Critical),
    ])
}

impl Default for GlucoseConfig {
    fn default() -> Self {
        Self {
            value_field: default_glucose_field(),
            timestamp_field: default_timestamp_field(),
            target_low: default_target_low(),
            target_high: default_target_high(),
            hyperglycemia_threshold: default_target_high(),
            hypoglycemia_threshold: default_target_low(),
            min_event_minutes: default_glucose_event_minutes(),
            bands: default_glucose_bands(),
        }
    }
}

// ============================================================================
// Heart rate
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateConfig {
    #[serde(default = "default_bpm_field")]
    pub value_field: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default = "default_tachycardia")]
    pub tachycardia_threshold: f64,
    #[serde(default = "default_bradycardia")]
    pub bradycardia_threshold: f64,
    #[serde(default = "default_hr_event_minutes")]
    pub min_event_minutes: f64,
    /// Percentile used as the resting heart rate estimate
    #[serde(default = "default_resting_percentile")]
    pub resting_percentile: f64,
    #[serde(default = "default_hr_bands")]
    pub bands: BandTable,
}

fn default_bpm_field() -> String {
    "bpm".to_string()
}

fn default_tachycardia() -> f64 {
    100.0
}

fn default_bradycardia() -> f64 {
    50.0
}

fn default_hr_event_minutes() -> f64 {
    10.0
}

fn default_resting_percentile() -> f64 {
    10.0
}

fn default_hr_bands() -> BandTable {
    BandTable::from_trusted(vec![
        ReferenceBand::below("low", Severity::Warning, 50.0),
        ReferenceBand::through("resting", Severity::Normal, 100.0),
        ReferenceBand::through("elevated", Severity::Warning, 150.0),
        ReferenceBand::above("high", Severity::Critical),
    ])
}

impl Default for HeartRateConfig {
    fn default() -> Self {
        Self {
            value_field: default_bpm_field(),
            timestamp_field: default_timestamp_field(),
            tachycardia_threshold: default_tachycardia(),
            bradycardia_threshold: default_bradycardia(),
            min_event_minutes: default_hr_event_minutes(),
            resting_percentile: default_resting_percentile(),
            bands: default_hr_bands(),
        }
    }
}

// ============================================================================
// Sleep
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepConfig {
    #[serde(default = "default_stage_field")]
    pub stage_field: String,
    #[serde(default = "default_duration_field")]
    pub duration_field: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    /// Awake indicator (1.0 awake, 0.0 asleep) must exceed this
    #[serde(default = "default_wake_threshold")]
    pub wake_threshold: f64,
    #[serde(default = "default_wake_minutes")]
    pub min_wake_minutes: f64,
    #[serde(default = "default_efficiency_bands")]
    pub efficiency_bands: BandTable,
}

fn default_stage_field() -> String {
    "stage".to_string()
}

fn default_wake_threshold() -> f64 {
    0.5
}

fn default_wake_minutes() -> f64 {
    20.0
}

fn default_efficiency_bands() -> BandTable {
    BandTable::from_trusted(vec![
        ReferenceBand::below("poor", Severity::Warning, 75.0),
        ReferenceBand::below("fair", Severity::Normal, 85.0),
        ReferenceBand::above("good", Severity::Normal),
    ])
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self {
            stage_field: default_stage_field(),
            duration_field: default_duration_field(),
            timestamp_field: default_timestamp_field(),
            wake_threshold: default_wake_threshold(),
            min_wake_minutes: default_wake_minutes(),
            efficiency_bands: default_efficiency_bands(),
        }
    }
}

// ============================================================================
// Activity
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityConfig {
    #[serde(default = "default_steps_field")]
    pub steps_field: String,
    /// Interval length per record; records without it count as one minute
    #[serde(default = "default_duration_field")]
    pub duration_field: String,
    #[serde(default = "default_timestamp_field")]
    pub timestamp_field: String,
    #[serde(default = "default_bout_cadence")]
    pub bout_steps_per_minute: f64,
    #[serde(default = "default_bout_minutes")]
    pub min_bout_minutes: f64,
    #[serde(default = "default_step_goal")]
    pub daily_step_goal: f64,
    #[serde(default = "default_daily_bands")]
    pub daily_bands: BandTable,
}

fn default_steps_field() -> String {
    "steps".to_string()
}

fn default_bout_cadence() -> f64 {
    100.0
}

fn default_bout_minutes() -> f64 {
    10.0
}

fn default_step_goal() -> f64 {
    10_000.0
}

fn default_daily_bands() -> BandTable {
    BandTable::from_trusted(vec![
        ReferenceBand::below("sedentary", Severity::Warning, 5_000.0),
        ReferenceBand::below("low", Severity::Normal, 7_500.0),
        ReferenceBand::below("moderate", Severity::Normal, 10_000.0),
        ReferenceBand::above("active", Severity::Normal),
    ])
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            steps_field: default_steps_field(),
            duration_field: default_duration_field(),
            timestamp_field: default_timestamp_field(),
            bout_steps_per_minute: default_bout_cadence(),
            min_bout_minutes: default_bout_minutes(),
            daily_step_goal: default_step_goal(),
            daily_bands: default_daily_bands(),
        }
    }
}
