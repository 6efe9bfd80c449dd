//! Summary statistics over sample values.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub count: usize,
    pub mean: f64,
    /// Sample standard deviation (n - 1); 0 for fewer than two values
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    /// Coefficient of variation as a percentage; 0 when the mean is 0.
    pub fn coefficient_of_variation(&self) -> f64 {
        if self.mean.abs() < f64::EPSILON {
            0.0
        } else {
            self.std_dev / self.mean * 100.0
        }
    }
}

/// `None` for an empty slice.
pub fn summarize(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let std_dev = if count > 1 {
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Some(Summary {
        count,
        mean,
        std_dev,
        min,
        max,
    })
}

/// Linear-interpolated percentile, `p` in [0, 100].
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Percentage of values satisfying `pred`; 0 for an empty slice.
pub fn percent_where(values: &[f64], pred: impl Fn(f64) -> bool) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().filter(|v| pred(**v)).count() as f64 / values.len() as f64 * 100.0
}

/// Direction of the series, comparing the first and last thirds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
}

impl Trend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::Rising => "rising",
            Trend::Falling => "falling",
            Trend::Stable => "stable",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Relative change between the first- and last-third means that counts as movement.
const TREND_TOLERANCE: f64 = 0.05;

pub fn trend(values: &[f64]) -> Trend {
    if values.len() < 3 {
        return Trend::Stable;
    }
    let third = values.len() / 3;
    let head = &values[..third];
    let tail = &values[values.len() - third..];
    let head_mean = head.iter().sum::<f64>() / head.len() as f64;
    let tail_mean = tail.iter().sum::<f64>() / tail.len() as f64;
    let scale = head_mean.abs().max(f64::EPSILON);
    let change = (tail_mean - head_mean) / scale;
    if change > TREND_TOLERANCE {
        Trend::Rising
    } else if change < -TREND_TOLERANCE {
        Trend::Falling
    } else {
        Trend::Stable
    }
}

/// Round for presentation in insights (avoids 17-digit floats in artifacts).
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summarize() {
        let s = summarize(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(s.count, 8);
        assert!((s.mean - 5.0).abs() < 1e-12);
        assert!((s.std_dev - 2.138_089_935).abs() < 1e-6);
        assert_eq!(s.min, 2.0);
        assert_eq!(s.max, 9.0);
        assert!(summarize(&[]).is_none());
        assert_eq!(summarize(&[3.0]).unwrap().std_dev, 0.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f64> = (1..=11).map(f64::from).collect();
        assert_eq!(percentile(&values, 10.0), Some(2.0));
        assert_eq!(percentile(&values, 50.0), Some(6.0));
        assert_eq!(percentile(&[10.0, 20.0], 50.0), Some(15.0));
        assert_eq!(percentile(&[], 10.0), None);
    }

    #[test]
    fn test_trend_detection() {
        assert_eq!(trend(&[100.0, 100.0, 110.0, 120.0, 130.0, 140.0]), Trend::Rising);
        assert_eq!(trend(&[140.0, 130.0, 120.0, 110.0, 100.0, 90.0]), Trend::Falling);
        assert_eq!(trend(&[100.0, 101.0, 99.0, 100.0, 102.0, 100.0]), Trend::Stable);
        assert_eq!(trend(&[1.0, 2.0]), Trend::Stable);
    }

    #[test]
    fn test_cv_and_percent_where() {
        let s = summarize(&[90.0, 110.0]).unwrap();
        assert!((s.coefficient_of_variation() - 14.142_135).abs() < 1e-5);
        assert_eq!(percent_where(&[1.0, 2.0, 3.0, 4.0], |v| v > 2.0), 50.0);
    }
}
