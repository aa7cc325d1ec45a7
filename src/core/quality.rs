use crate::core::analysis::AnalysisResult;
use serde::{Deserialize, Serialize};

/// Score assumed for photos that carry no quality metrics at all.
pub const DEFAULT_QUALITY: f64 = 0.5;

/// Baseline for metadata-only estimates, before the small nudges below.
const ESTIMATE_BASELINE: f64 = 0.6;
const ESTIMATE_GPS_BONUS: f64 = 0.05;
const ESTIMATE_FINGERPRINT_BONUS: f64 = 0.05;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualitySource {
    /// Judged by the vision classifier from pixels.
    Vision,
    /// Guessed from metadata alone; no image content was examined.
    Estimated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub sharpness: f64,
    pub composition: f64,
    pub lighting: f64,
    pub subject_clarity: f64,
    pub overall_quality: f64,
    pub notes: String,
    pub source: QualitySource,
}

impl QualityMetrics {
    /// Sub-scores are clamped to [0, 1]; `overall_quality` is their mean.
    pub fn new(
        sharpness: f64,
        composition: f64,
        lighting: f64,
        subject_clarity: f64,
        notes: impl Into<String>,
        source: QualitySource,
    ) -> Self {
        let sharpness = unit_interval(sharpness);
        let composition = unit_interval(composition);
        let lighting = unit_interval(lighting);
        let subject_clarity = unit_interval(subject_clarity);
        let overall_quality =
            unit_interval((sharpness + composition + lighting + subject_clarity) / 4.0);

        Self {
            sharpness,
            composition,
            lighting,
            subject_clarity,
            overall_quality,
            notes: notes.into(),
            source,
        }
    }

    /// Estimate used when no image content is available.
    pub fn estimated_from_metadata(has_coordinates: bool, has_fingerprint: bool) -> Self {
        let mut score = ESTIMATE_BASELINE;
        if has_coordinates {
            score += ESTIMATE_GPS_BONUS;
        }
        if has_fingerprint {
            score += ESTIMATE_FINGERPRINT_BONUS;
        }

        Self::new(
            score,
            score,
            score,
            score,
            "Estimated from metadata; image content was not analyzed",
            QualitySource::Estimated,
        )
    }

    pub fn is_estimated(&self) -> bool {
        self.source == QualitySource::Estimated
    }
}

/// Turns quality metrics into the single ranking key used for best-photo picks.
pub struct QualityScorer;

impl QualityScorer {
    pub fn new() -> Self {
        Self
    }

    /// Always finite and within [0, 1]; `DEFAULT_QUALITY` when nothing is known.
    pub fn overall_quality(&self, metrics: Option<&QualityMetrics>) -> f64 {
        match metrics {
            Some(metrics) if metrics.overall_quality.is_finite() => {
                metrics.overall_quality.clamp(0.0, 1.0)
            }
            _ => DEFAULT_QUALITY,
        }
    }

    pub fn score_result(&self, result: &AnalysisResult) -> f64 {
        self.overall_quality(result.quality_metrics.as_ref())
    }
}

impl Default for QualityScorer {
    fn default() -> Self {
        Self::new()
    }
}

fn unit_interval(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        DEFAULT_QUALITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_is_mean_of_sub_scores() {
        let metrics = QualityMetrics::new(0.8, 0.6, 0.4, 0.2, "", QualitySource::Vision);
        assert!((metrics.overall_quality - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_sub_scores_are_clamped() {
        let metrics = QualityMetrics::new(1.7, -0.3, f64::NAN, 1.0, "", QualitySource::Vision);

        assert_eq!(metrics.sharpness, 1.0);
        assert_eq!(metrics.composition, 0.0);
        assert_eq!(metrics.lighting, DEFAULT_QUALITY);
        assert!((0.0..=1.0).contains(&metrics.overall_quality));
    }

    #[test]
    fn test_metadata_estimate_is_labelled() {
        let bare = QualityMetrics::estimated_from_metadata(false, false);
        let rich = QualityMetrics::estimated_from_metadata(true, true);

        assert!(bare.is_estimated());
        assert!((bare.overall_quality - 0.6).abs() < 1e-9);
        assert!((rich.overall_quality - 0.7).abs() < 1e-9);
        assert!(rich.notes.contains("Estimated"));
    }

    #[test]
    fn test_scorer_defaults_when_absent() {
        let scorer = QualityScorer::new();
        assert_eq!(scorer.overall_quality(None), DEFAULT_QUALITY);

        let mut broken = QualityMetrics::new(0.9, 0.9, 0.9, 0.9, "", QualitySource::Vision);
        broken.overall_quality = f64::NAN;
        assert_eq!(scorer.overall_quality(Some(&broken)), DEFAULT_QUALITY);

        broken.overall_quality = 3.0;
        assert_eq!(scorer.overall_quality(Some(&broken)), 1.0);
    }
}
