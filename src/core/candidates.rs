use crate::config::CandidateConfig;
use crate::core::analysis::{AnalysisMethod, AnalysisResult, Decision};
use crate::core::photo::BatchPhoto;

const ISOLATED_CONFIDENCE: f64 = 0.9;

/// Another photo from the batch worth comparing against a target.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    /// Position in the batch.
    pub index: usize,
    pub photo: &'a BatchPhoto,
    /// Candidate capture time minus target capture time.
    pub offset_secs: i64,
}

impl Candidate<'_> {
    pub fn gap_secs(&self) -> i64 {
        self.offset_secs.abs()
    }

    pub fn id(&self) -> &str {
        self.photo.id()
    }
}

/// Picks the temporally closest photos to compare against a target.
pub struct CandidateSelector {
    window_secs: i64,
    max_candidates: usize,
}

impl CandidateSelector {
    pub fn new(config: &CandidateConfig) -> Self {
        Self {
            window_secs: config.proximity_window_secs,
            max_candidates: config.max_candidates,
        }
    }

    /// Up to `max_candidates` photos captured strictly within the proximity
    /// window of `batch[target_index]`, closest first. Equal gaps keep batch
    /// order.
    pub fn select<'a>(&self, target_index: usize, batch: &'a [BatchPhoto]) -> Vec<Candidate<'a>> {
        let Some(target) = batch.get(target_index) else {
            return Vec::new();
        };

        let mut candidates: Vec<Candidate<'a>> = batch
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != target_index)
            .map(|(index, photo)| Candidate {
                index,
                photo,
                offset_secs: photo.captured_at().saturating_sub(target.captured_at()),
            })
            .filter(|candidate| candidate.gap_secs() < self.window_secs)
            .collect();

        // Stable sort keeps batch order for equal gaps.
        candidates.sort_by_key(|candidate| candidate.gap_secs());
        candidates.truncate(self.max_candidates);
        candidates
    }
}

/// Result for a photo with no temporal neighbours; nothing else to analyse.
pub fn isolated_result(photo: &BatchPhoto) -> AnalysisResult {
    let result = AnalysisResult::new(
        photo.id(),
        Decision::Unique,
        ISOLATED_CONFIDENCE,
        "no temporal neighbors",
        AnalysisMethod::Temporal,
    );

    match &photo.degraded {
        Some(reason) => result.with_note(format!("degraded: {}", reason)),
        None => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::photo::PhotoRecord;

    fn batch(times: &[i64]) -> Vec<BatchPhoto> {
        times
            .iter()
            .enumerate()
            .map(|(i, &captured_at)| {
                BatchPhoto::new(
                    PhotoRecord {
                        id: format!("p{}", i),
                        image_url: String::new(),
                        captured_at,
                        coordinates: None,
                        fingerprint: String::new(),
                    },
                    None,
                )
            })
            .collect()
    }

    fn ids(candidates: &[Candidate<'_>]) -> Vec<String> {
        candidates.iter().map(|c| c.id().to_string()).collect()
    }

    #[test]
    fn test_candidates_sorted_by_gap() {
        let photos = batch(&[100, 125, 95, 102, 300]);
        let selector = CandidateSelector::new(&CandidateConfig::default());

        let candidates = selector.select(0, &photos);

        assert_eq!(ids(&candidates), vec!["p3", "p2", "p1"]);
        assert_eq!(candidates[1].offset_secs, -5);
        assert_eq!(candidates[1].index, 2);
    }

    #[test]
    fn test_window_is_exclusive() {
        let photos = batch(&[0, 30, 29]);
        let selector = CandidateSelector::new(&CandidateConfig::default());

        assert_eq!(ids(&selector.select(0, &photos)), vec!["p2"]);
    }

    #[test]
    fn test_candidate_cap_and_tie_order() {
        let photos = batch(&[50, 48, 52, 49, 51, 47]);
        let selector = CandidateSelector::new(&CandidateConfig::default());

        // Gaps: p1=2, p2=2, p3=1, p4=1, p5=3. Ties keep batch order.
        assert_eq!(ids(&selector.select(0, &photos)), vec!["p3", "p4", "p1", "p2"]);
    }

    #[test]
    fn test_same_timestamp_is_still_a_candidate() {
        let photos = batch(&[10, 10]);
        let selector = CandidateSelector::new(&CandidateConfig::default());

        assert_eq!(ids(&selector.select(0, &photos)), vec!["p1"]);
        assert_eq!(ids(&selector.select(1, &photos)), vec!["p0"]);
    }

    #[test]
    fn test_isolated_photo_is_unique() {
        let photos = batch(&[0, 1000]);
        let selector = CandidateSelector::new(&CandidateConfig::default());
        assert!(selector.select(0, &photos).is_empty());

        let result = isolated_result(&photos[0]);
        assert_eq!(result.decision, Decision::Unique);
        assert_eq!(result.confidence, 0.9);
        assert_eq!(result.reasoning, "no temporal neighbors");
        assert!(result.related_photo_ids.is_empty());
    }
}
