//! Narrative assembly in a fixed fragment order.

use crate::window::SustainedEvent;

/// Slots are emitted as: summary, assessment, events, trend, recommendation.
/// Setting a slot twice replaces it; empty slots are skipped.
#[derive(Debug, Default, Clone)]
pub struct NarrativeBuilder {
    summary: Option<String>,
    assessment: Option<String>,
    events: Vec<String>,
    trend: Option<String>,
    recommendation: Option<String>,
}

impl NarrativeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(mut self, text: impl Into<String>) -> Self {
        self.summary = Some(text.into());
        self
    }

    pub fn assessment(mut self, text: impl Into<String>) -> Self {
        self.assessment = Some(text.into());
        self
    }

    pub fn event(mut self, text: impl Into<String>) -> Self {
        self.events.push(text.into());
        self
    }

    pub fn trend(mut self, text: impl Into<String>) -> Self {
        self.trend = Some(text.into());
        self
    }

    pub fn recommendation(mut self, text: Option<String>) -> Self {
        self.recommendation = text;
        self
    }

    pub fn build(self) -> String {
        let mut parts: Vec<String> = Vec::new();
        parts.extend(self.summary);
        parts.extend(self.assessment);
        parts.extend(self.events);
        parts.extend(self.trend);
        parts.extend(self.recommendation);
        parts
            .into_iter()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// "1 episode" / "3 episodes"
pub fn plural(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

/// "Detected 2 hyperglycemia episodes (longest 42 minutes, extreme 260 mg/dL)."
pub fn describe_events(kind: &str, events: &[SustainedEvent], unit: &str) -> Option<String> {
    let longest = events
        .iter()
        .max_by(|a, b| a.duration.cmp(&b.duration))?;
    Some(format!(
        "Detected {} (longest {:.0} minutes, extreme {:.0} {}).",
        plural(events.len(), &format!("{kind} episode"), &format!("{kind} episodes")),
        longest.duration_minutes(),
        longest.extreme,
        unit
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragments_keep_order_regardless_of_call_order() {
        let text = NarrativeBuilder::new()
            .recommendation(Some("Rec.".into()))
            .trend("Trend.")
            .event("Event one.")
            .assessment("Assess.")
            .summary("Summary.")
            .event("Event two.")
            .build();
        assert_eq!(text, "Summary. Assess. Event one. Event two. Trend. Rec.");
    }

    #[test]
    fn test_empty_fragments_skipped() {
        let text = NarrativeBuilder::new()
            .summary("Only summary.")
            .assessment("  ")
            .recommendation(None)
            .build();
        assert_eq!(text, "Only summary.");
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1, "episode", "episodes"), "1 episode");
        assert_eq!(plural(0, "episode", "episodes"), "0 episodes");
    }
}
