//! Ordered reference-band tables.
//!
//! A table is a list of bands sorted by upper bound. A value belongs to the
//! first band whose upper bound admits it; the last band is unbounded.

use crate::error::{ProcessorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Normal,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Normal => "normal",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceBand {
    pub name: String,
    pub severity: Severity,
    /// Upper bound; `None` only for the last band
    #[serde(default)]
    pub upper: Option<f64>,
    /// Whether `upper` itself belongs to this band
    #[serde(default)]
    pub upper_inclusive: bool,
}

impl ReferenceBand {
    /// Band covering values strictly below `upper`.
    pub fn below(name: &str, severity: Severity, upper: f64) -> Self {
        Self {
            name: name.to_string(),
            severity,
            upper: Some(upper),
            upper_inclusive: false,
        }
    }

    /// Band covering values up to and including `upper`.
    pub fn through(name: &str, severity: Severity, upper: f64) -> Self {
        Self {
            name: name.to_string(),
            severity,
            upper: Some(upper),
            upper_inclusive: true,
        }
    }

    /// Unbounded top band.
    pub fn above(name: &str, severity: Severity) -> Self {
        Self {
            name: name.to_string(),
            severity,
            upper: None,
            upper_inclusive: false,
        }
    }

    fn admits(&self, value: f64) -> bool {
        match self.upper {
            None => true,
            Some(upper) if self.upper_inclusive => value <= upper,
            Some(upper) => value < upper,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ReferenceBand>", into = "Vec<ReferenceBand>")]
pub struct BandTable {
    bands: Vec<ReferenceBand>,
}

impl BandTable {
    /// Validate ordering: strictly ascending bounds, exactly one unbounded band, last.
    pub fn new(bands: Vec<ReferenceBand>) -> Result<Self> {
        let Some((last, init)) = bands.split_last() else {
            return Err(ProcessorError::config("band table is empty"));
        };
        if last.upper.is_some() {
            return Err(ProcessorError::config(format!(
                "last band '{}' must be unbounded",
                last.name
            )));
        }
        let mut previous: Option<f64> = None;
        for band in init {
            let upper = band.upper.ok_or_else(|| {
                ProcessorError::config(format!("band '{}' is unbounded but not last", band.name))
            })?;
            if !upper.is_finite() {
                return Err(ProcessorError::config(format!(
                    "band '{}' has a non-finite bound",
                    band.name
                )));
            }
            if previous.is_some_and(|prev| upper <= prev) {
                return Err(ProcessorError::config(format!(
                    "band '{}' overlaps the band before it",
                    band.name
                )));
            }
            previous = Some(upper);
        }
        Ok(Self { bands })
    }

    /// Built-in tables only; checked by the config tests.
    pub(crate) fn from_trusted(bands: Vec<ReferenceBand>) -> Self {
        Self { bands }
    }

    pub fn bands(&self) -> &[ReferenceBand] {
        &self.bands
    }

    pub fn classify(&self, value: f64) -> &ReferenceBand {
        self.bands
            .iter()
            .find(|band| band.admits(value))
            // new() guarantees an unbounded last band
            .unwrap_or(&self.bands[self.bands.len() - 1])
    }

    /// Percentage of values per band name, every band present (0 if empty).
    pub fn distribution(&self, values: &[f64]) -> BTreeMap<String, f64> {
        let mut counts: BTreeMap<String, usize> =
            self.bands.iter().map(|b| (b.name.clone(), 0)).collect();
        for value in values {
            if let Some(count) = counts.get_mut(&self.classify(*value).name) {
                *count += 1;
            }
        }
        let total = values.len().max(1) as f64;
        counts
            .into_iter()
            .map(|(name, count)| (name, count as f64 / total * 100.0))
            .collect()
    }
}

impl TryFrom<Vec<ReferenceBand>> for BandTable {
    type Error = ProcessorError;

    fn try_from(bands: Vec<ReferenceBand>) -> Result<Self> {
        BandTable::new(bands)
    }
}

impl From<BandTable> for Vec<ReferenceBand> {
    fn from(table: BandTable) -> Self {
        table.bands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glucose_like() -> BandTable {
        BandTable::new(vec![
            ReferenceBand::below("very_low", Severity::Critical, 54.0),
            ReferenceBand::below("low", Severity::Warning, 70.0),
            ReferenceBand::through("in_range", Severity::Normal, 180.0),
            ReferenceBand::through("high", Severity::Warning, 250.0),
            ReferenceBand::above("very_high", Severity::Critical),
        ])
        .unwrap()
    }

    #[test]
    fn test_classify_edges() {
        let table = glucose_like();
        assert_eq!(table.classify(53.9).name, "very_low");
        assert_eq!(table.classify(54.0).name, "low");
        assert_eq!(table.classify(69.0).name, "low");
        assert_eq!(table.classify(70.0).name, "in_range");
        assert_eq!(table.classify(180.0).name, "in_range");
        assert_eq!(table.classify(180.5).name, "high");
        assert_eq!(table.classify(250.0).name, "high");
        assert_eq!(table.classify(251.0).name, "very_high");
        assert_eq!(table.classify(251.0).severity, Severity::Critical);
    }

    #[test]
    fn test_rejects_overlap_and_missing_top() {
        assert!(BandTable::new(vec![]).is_err());
        assert!(BandTable::new(vec![
            ReferenceBand::below("a", Severity::Normal, 10.0),
            ReferenceBand::below("b", Severity::Normal, 5.0),
            ReferenceBand::above("c", Severity::Normal),
        ])
        .is_err());
        assert!(BandTable::new(vec![ReferenceBand::below("a", Severity::Normal, 10.0)]).is_err());
        assert!(BandTable::new(vec![
            ReferenceBand::above("a", Severity::Normal),
            ReferenceBand::above("b", Severity::Normal),
        ])
        .is_err());
    }

    #[test]
    fn test_distribution_covers_all_bands() {
        let dist = glucose_like().distribution(&[100.0, 120.0, 200.0, 60.0]);
        assert_eq!(dist.len(), 5);
        assert_eq!(dist["in_range"], 50.0);
        assert_eq!(dist["high"], 25.0);
        assert_eq!(dist["very_low"], 0.0);
    }

    #[test]
    fn test_deserialize_validates() {
        let err = serde_json::from_str::<BandTable>(
            r#"[{"name": "a", "severity": "normal", "upper": 10.0}]"#,
        );
        assert!(err.is_err());
        let ok: BandTable = serde_json::from_str(
            r#"[{"name": "a", "severity": "normal", "upper": 10.0}, {"name": "b", "severity": "warning"}]"#,
        )
        .unwrap();
        assert_eq!(ok.classify(11.0).name, "b");
    }
}
