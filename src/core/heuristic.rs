use crate::config::HeuristicConfig;
use crate::core::analysis::{AnalysisMethod, AnalysisResult, Decision, patterns};
use crate::core::candidates::Candidate;
use crate::core::photo::BatchPhoto;
use crate::core::quality::QualityMetrics;

pub const BURST_CONFIDENCE: f64 = 0.8;
pub const DUPLICATE_CONFIDENCE: f64 = 0.9;
pub const SIMILAR_CONFIDENCE: f64 = 0.6;
pub const UNIQUE_CONFIDENCE: f64 = 0.8;

/// Deterministic classification from capture time, GPS and fingerprints.
///
/// Rules are checked in order and the first match wins: burst, duplicate,
/// similar, unique. Burst comes first because at short timescales it is the
/// stronger claim, even when the duplicate conditions also hold.
pub struct HeuristicClassifier {
    config: HeuristicConfig,
}

impl HeuristicClassifier {
    pub fn new(config: HeuristicConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, target: &BatchPhoto, candidates: &[Candidate<'_>]) -> AnalysisResult {
        let result = self.decide(target, candidates);
        let result = result.with_note(format!(
            "heuristic classification over {} candidate(s)",
            candidates.len()
        ));

        match &target.degraded {
            Some(reason) => result.with_note(format!("degraded: {}", reason)),
            None => result,
        }
    }

    fn decide(&self, target: &BatchPhoto, candidates: &[Candidate<'_>]) -> AnalysisResult {
        let burst: Vec<&Candidate<'_>> = candidates
            .iter()
            .filter(|c| c.gap_secs() <= self.config.burst_window_secs)
            .collect();
        if !burst.is_empty() {
            let mut tags = vec![patterns::RAPID_SUCCESSION];
            if burst.iter().any(|c| self.same_location(target, c.photo)) {
                tags.push(patterns::SAME_LOCATION);
            }
            let reasoning = format!(
                "{} photo(s) captured within {}s of this shot",
                burst.len(),
                self.config.burst_window_secs
            );
            return self.related_result(
                target,
                Decision::BurstShot,
                BURST_CONFIDENCE,
                reasoning,
                &burst,
                &tags,
            );
        }

        let duplicates: Vec<&Candidate<'_>> = candidates
            .iter()
            .filter(|c| c.gap_secs() <= self.config.duplicate_window_secs)
            .filter(|c| {
                self.same_location(target, c.photo) || self.matching_fingerprint(target, c.photo)
            })
            .collect();
        if !duplicates.is_empty() {
            let mut tags = Vec::new();
            if duplicates.iter().any(|c| self.same_location(target, c.photo)) {
                tags.push(patterns::SAME_LOCATION);
            }
            if duplicates
                .iter()
                .any(|c| self.matching_fingerprint(target, c.photo))
            {
                tags.push(patterns::MATCHING_FINGERPRINT);
            }
            let reasoning = format!(
                "{} photo(s) taken at the same spot within {}s",
                duplicates.len(),
                self.config.duplicate_window_secs
            );
            return self.related_result(
                target,
                Decision::Duplicate,
                DUPLICATE_CONFIDENCE,
                reasoning,
                &duplicates,
                &tags,
            );
        }

        let nearby: Vec<&Candidate<'_>> = candidates
            .iter()
            .filter(|c| c.gap_secs() <= self.config.similar_window_secs)
            .collect();
        if nearby.len() >= self.config.similar_min_candidates {
            // Candidates arrive closest first, so this keeps the nearest ones.
            let related: Vec<&Candidate<'_>> = nearby
                .into_iter()
                .take(self.config.similar_max_related)
                .collect();
            let reasoning = format!(
                "{} photos captured within {}s; likely the same scene",
                related.len(),
                self.config.similar_window_secs
            );
            return self.related_result(
                target,
                Decision::Similar,
                SIMILAR_CONFIDENCE,
                reasoning,
                &related,
                &[patterns::TEMPORAL_CLUSTER],
            );
        }

        AnalysisResult::new(
            target.id(),
            Decision::Unique,
            UNIQUE_CONFIDENCE,
            "no burst, duplicate or similar signal from metadata",
            AnalysisMethod::Heuristic,
        )
    }

    fn related_result(
        &self,
        target: &BatchPhoto,
        decision: Decision,
        confidence: f64,
        reasoning: String,
        related: &[&Candidate<'_>],
        tags: &[&str],
    ) -> AnalysisResult {
        let result = AnalysisResult::new(
            target.id(),
            decision,
            confidence,
            reasoning,
            AnalysisMethod::Heuristic,
        )
        .with_related(related.iter().map(|c| c.id().to_string()))
        .with_patterns(tags.iter().map(|tag| tag.to_string()));

        if decision.wants_quality() {
            result.with_quality(QualityMetrics::estimated_from_metadata(
                target.record.coordinates.is_some(),
                target.fingerprint.is_some(),
            ))
        } else {
            result
        }
    }

    fn same_location(&self, a: &BatchPhoto, b: &BatchPhoto) -> bool {
        match (&a.record.coordinates, &b.record.coordinates) {
            (Some(a), Some(b)) => a.matches(b, self.config.gps_epsilon_degrees),
            _ => false,
        }
    }

    fn matching_fingerprint(&self, a: &BatchPhoto, b: &BatchPhoto) -> bool {
        if !self.config.fingerprint_duplicates {
            return false;
        }
        match (&a.fingerprint, &b.fingerprint) {
            (Some(a), Some(b)) => a
                .similarity(b)
                .map(|similarity| similarity >= self.config.fingerprint_similarity_threshold)
                .unwrap_or(false),
            _ => false,
        }
    }
}
