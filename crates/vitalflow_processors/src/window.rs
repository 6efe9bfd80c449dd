//! Sustained-threshold event detection.
//!
//! Walks time-ordered samples, accumulating runs that stay beyond a
//! threshold. A run closes on the first sample back inside (the recovery
//! sample) or at the end of the stream, and is reported only if it lasted
//! at least the minimum duration.

use crate::samples::Sample;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Crossing means `value > threshold`
    Above,
    /// Crossing means `value < threshold`
    Below,
}

impl Direction {
    pub fn crosses(&self, value: f64, threshold: f64) -> bool {
        match self {
            Direction::Above => value > threshold,
            Direction::Below => value < threshold,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Above => "above",
            Direction::Below => "below",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One run of samples beyond the threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct SustainedEvent {
    pub direction: Direction,
    pub threshold: f64,
    /// Timestamp of the first crossing sample
    pub start: DateTime<Utc>,
    /// Recovery-sample timestamp, or the last crossing sample if none
    pub end: DateTime<Utc>,
    pub duration: Duration,
    pub sample_count: usize,
    pub average: f64,
    /// Max for `Above`, min for `Below`
    pub extreme: f64,
    /// Distance of `extreme` beyond the threshold
    pub peak_excursion: f64,
    /// Last in-window value minus the recovery value
    pub recovery_delta: Option<f64>,
}

impl SustainedEvent {
    pub fn duration_minutes(&self) -> f64 {
        self.duration.num_milliseconds() as f64 / 60_000.0
    }

    pub fn to_json(&self, kind: &str) -> Value {
        json!({
            "kind": kind,
            "direction": self.direction.as_str(),
            "threshold": self.threshold,
            "start": self.start.to_rfc3339(),
            "end": self.end.to_rfc3339(),
            "duration_minutes": crate::stats::round2(self.duration_minutes()),
            "sample_count": self.sample_count,
            "average": crate::stats::round2(self.average),
            "extreme": self.extreme,
            "peak_excursion": crate::stats::round2(self.peak_excursion),
            "recovery_delta": self.recovery_delta,
        })
    }
}

/// Detect runs beyond `threshold` lasting at least `min_duration`.
///
/// `samples` must be ordered by timestamp.
pub fn detect_sustained_events(
    samples: &[Sample],
    threshold: f64,
    direction: Direction,
    min_duration: Duration,
) -> Vec<SustainedEvent> {
    let mut events = Vec::new();
    let mut window: Vec<Sample> = Vec::new();

    for sample in samples {
        if direction.crosses(sample.value, threshold) {
            window.push(*sample);
            continue;
        }
        if !window.is_empty() {
            let closed = close_window(&window, Some(sample), threshold, direction, min_duration);
            if let Some(event) = closed {
                events.push(event);
            }
            window.clear();
        }
    }

    if !window.is_empty() {
        if let Some(event) = close_window(&window, None, threshold, direction, min_duration) {
            events.push(event);
        }
    }

    events
}

fn close_window(
    window: &[Sample],
    recovery: Option<&Sample>,
    threshold: f64,
    direction: Direction,
    min_duration: Duration,
) -> Option<SustainedEvent> {
    let first = window.first()?;
    let last = window.last()?;
    let end = recovery.map_or(last.timestamp, |r| r.timestamp);
    let duration = end - first.timestamp;
    if duration < min_duration {
        return None;
    }

    let sum: f64 = window.iter().map(|s| s.value).sum();
    let extreme = match direction {
        Direction::Above => window.iter().map(|s| s.value).fold(f64::NEG_INFINITY, f64::max),
        Direction::Below => window.iter().map(|s| s.value).fold(f64::INFINITY, f64::min),
    };

    Some(SustainedEvent {
        direction,
        threshold,
        start: first.timestamp,
        end,
        duration,
        sample_count: window.len(),
        average: sum / window.len() as f64,
        extreme,
        peak_excursion: (extreme - threshold).abs(),
        recovery_delta: recovery.map(|r| last.value - r.value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn minute(m: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::minutes(m)
    }

    fn series(values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| Sample::new(minute(i as i64), *v))
            .collect()
    }

    #[test]
    fn test_twelve_minute_excursion_emits_one_event() {
        // Minutes 2..=13 above 100, recovery at minute 14.
        let mut values = vec![90.0, 95.0];
        values.extend((0..12).map(|i| 110.0 + i as f64));
        values.extend([92.0, 90.0]);
        let samples = series(&values);

        let events =
            detect_sustained_events(&samples, 100.0, Direction::Above, Duration::minutes(10));
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.start, minute(2));
        assert_eq!(event.end, minute(14));
        assert_eq!(event.duration, Duration::minutes(12));
        assert_eq!(event.sample_count, 12);
        assert!((event.average - 115.5).abs() < 1e-9);
        assert_eq!(event.extreme, 121.0);
        assert_eq!(event.peak_excursion, 21.0);
        assert_eq!(event.recovery_delta, Some(121.0 - 92.0));
    }

    #[test]
    fn test_short_excursion_is_ignored() {
        let mut values = vec![90.0];
        values.extend([105.0; 5]);
        values.extend([90.0; 3]);
        let events = detect_sustained_events(
            &series(&values),
            100.0,
            Direction::Above,
            Duration::minutes(10),
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_stream_ending_mid_window_uses_last_sample() {
        let mut values = vec![60.0];
        values.extend([45.0, 44.0, 40.0, 43.0, 46.0, 47.0, 45.0, 44.0, 43.0, 42.0, 41.0]);
        let events = detect_sustained_events(
            &series(&values),
            50.0,
            Direction::Below,
            Duration::minutes(10),
        );
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.duration, Duration::minutes(10));
        assert_eq!(event.end, minute(11));
        assert_eq!(event.extreme, 40.0);
        assert_eq!(event.recovery_delta, None);
    }

    #[test]
    fn test_threshold_value_is_not_crossing() {
        let samples = series(&[100.0; 20]);
        let events = detect_sustained_events(&samples, 100.0, Direction::Above, Duration::zero());
        assert!(events.is_empty());
    }

    #[test]
    fn test_multiple_windows() {
        let mut values = Vec::new();
        values.extend([200.0; 16]);
        values.push(150.0);
        values.extend([210.0; 20]);
        values.push(140.0);
        let events = detect_sustained_events(
            &series(&values),
            180.0,
            Direction::Above,
            Duration::minutes(15),
        );
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].duration, Duration::minutes(16));
        assert_eq!(events[1].duration, Duration::minutes(20));
    }
}
