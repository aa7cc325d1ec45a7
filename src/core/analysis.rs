use crate::core::quality::QualityMetrics;
use serde::{Deserialize, Serialize};

/// Pattern tags attached to results.
pub mod patterns {
    pub const RAPID_SUCCESSION: &str = "rapid_succession";
    pub const SAME_LOCATION: &str = "same_location";
    pub const MATCHING_FINGERPRINT: &str = "matching_fingerprint";
    pub const TEMPORAL_CLUSTER: &str = "temporal_cluster";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Duplicate,
    BurstShot,
    Similar,
    Unique,
}

impl Decision {
    /// Parse the wire name (`duplicate`, `burst_shot`, `similar`, `unique`).
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "duplicate" => Some(Decision::Duplicate),
            "burst_shot" => Some(Decision::BurstShot),
            "similar" => Some(Decision::Similar),
            "unique" => Some(Decision::Unique),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Duplicate => "duplicate",
            Decision::BurstShot => "burst_shot",
            Decision::Similar => "similar",
            Decision::Unique => "unique",
        }
    }

    /// Duplicates and bursts are the decisions that carry quality metrics.
    pub fn wants_quality(&self) -> bool {
        matches!(self, Decision::Duplicate | Decision::BurstShot)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMethod {
    /// Judged by the external vision classifier.
    Visual,
    /// Decided by the metadata heuristics.
    Heuristic,
    /// Settled by candidate selection alone (no temporal neighbours).
    Temporal,
}

/// Outcome of analysing one photo. Created once per run, never mutated after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub photo_id: String,
    pub decision: Decision,
    pub confidence: f64,
    pub reasoning: String,
    pub visual_observations: String,
    pub technical_notes: String,
    pub related_photo_ids: Vec<String>,
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_metrics: Option<QualityMetrics>,
    pub analysis_method: AnalysisMethod,
}

impl AnalysisResult {
    pub fn new(
        photo_id: impl Into<String>,
        decision: Decision,
        confidence: f64,
        reasoning: impl Into<String>,
        method: AnalysisMethod,
    ) -> Self {
        Self {
            photo_id: photo_id.into(),
            decision,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.into(),
            visual_observations: String::new(),
            technical_notes: String::new(),
            related_photo_ids: Vec::new(),
            patterns: Vec::new(),
            quality_metrics: None,
            analysis_method: method,
        }
    }

    /// Related ids are dropped for `unique` results; duplicates collapse.
    pub fn with_related(mut self, ids: impl IntoIterator<Item = String>) -> Self {
        if self.decision == Decision::Unique {
            return self;
        }
        for id in ids {
            if id != self.photo_id && !self.related_photo_ids.contains(&id) {
                self.related_photo_ids.push(id);
            }
        }
        self
    }

    pub fn with_patterns(mut self, patterns: impl IntoIterator<Item = String>) -> Self {
        for pattern in patterns {
            if !self.patterns.contains(&pattern) {
                self.patterns.push(pattern);
            }
        }
        self
    }

    pub fn with_quality(mut self, metrics: QualityMetrics) -> Self {
        self.quality_metrics = Some(metrics);
        self
    }

    pub fn with_observations(mut self, observations: impl Into<String>) -> Self {
        self.visual_observations = observations.into();
        self
    }

    /// Append a technical note.
    pub fn with_note(mut self, note: impl AsRef<str>) -> Self {
        let note = note.as_ref();
        if note.is_empty() {
            return self;
        }
        if !self.technical_notes.is_empty() {
            self.technical_notes.push_str("; ");
        }
        self.technical_notes.push_str(note);
        self
    }

    /// Put a note in front of the existing ones, so the cause reads first.
    pub fn with_leading_note(mut self, note: impl AsRef<str>) -> Self {
        let existing = std::mem::take(&mut self.technical_notes);
        self = self.with_note(note);
        self.with_note(existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_wire_names() {
        for decision in [
            Decision::Duplicate,
            Decision::BurstShot,
            Decision::Similar,
            Decision::Unique,
        ] {
            assert_eq!(Decision::parse(decision.as_str()), Some(decision));
            let json = serde_json::to_string(&decision).unwrap();
            assert_eq!(json, format!("\"{}\"", decision.as_str()));
        }
        assert_eq!(Decision::parse(" Burst_Shot "), Some(Decision::BurstShot));
        assert_eq!(Decision::parse("burst"), None);
    }

    #[test]
    fn test_unique_result_never_has_related_ids() {
        let result = AnalysisResult::new("a", Decision::Unique, 0.8, "alone", AnalysisMethod::Heuristic)
            .with_related(vec!["b".to_string()]);
        assert!(result.related_photo_ids.is_empty());
    }

    #[test]
    fn test_related_ids_skip_self_and_repeats() {
        let result = AnalysisResult::new("a", Decision::BurstShot, 0.8, "", AnalysisMethod::Heuristic)
            .with_related(vec![
                "b".to_string(),
                "a".to_string(),
                "b".to_string(),
                "c".to_string(),
            ]);
        assert_eq!(result.related_photo_ids, vec!["b", "c"]);
    }

    #[test]
    fn test_notes_are_joined_in_order() {
        let result = AnalysisResult::new("a", Decision::Unique, 0.8, "", AnalysisMethod::Heuristic)
            .with_note("second")
            .with_leading_note("first");
        assert_eq!(result.technical_notes, "first; second");
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = AnalysisResult::new("a", Decision::Similar, 0.6, "close", AnalysisMethod::Visual)
            .with_related(vec!["b".to_string()]);
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["photoId"], "a");
        assert_eq!(value["decision"], "similar");
        assert_eq!(value["relatedPhotoIds"][0], "b");
        assert_eq!(value["analysisMethod"], "visual");
        assert!(value.get("qualityMetrics").is_none());
    }
}
