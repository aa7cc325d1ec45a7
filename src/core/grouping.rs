// Duplicate grouping:
// - folds per-photo results into disjoint groups, single pass, input order
// - picks the best-quality frame of every burst
// - derives group ids from content so repeated runs agree

use crate::core::analysis::{AnalysisResult, Decision};
use crate::core::quality::QualityScorer;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupType {
    ExactDuplicate,
    BurstSequence,
    SimilarComposition,
}

impl GroupType {
    pub fn from_decision(decision: Decision) -> Option<Self> {
        match decision {
            Decision::Duplicate => Some(GroupType::ExactDuplicate),
            Decision::BurstShot => Some(GroupType::BurstSequence),
            Decision::Similar => Some(GroupType::SimilarComposition),
            Decision::Unique => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupType::ExactDuplicate => "exact_duplicate",
            GroupType::BurstSequence => "burst_sequence",
            GroupType::SimilarComposition => "similar_composition",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub id: String,
    #[serde(rename = "type")]
    pub group_type: GroupType,
    pub photo_ids: Vec<String>,
    pub reasoning: String,
    pub recommendation: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_photo_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_ranking: Option<Vec<String>>,
}

pub struct GroupBuilder {
    scorer: QualityScorer,
}

impl GroupBuilder {
    pub fn new() -> Self {
        Self {
            scorer: QualityScorer::new(),
        }
    }

    /// Build disjoint groups from a complete result set.
    ///
    /// Greedy and order-dependent: a photo consumed by an earlier group is
    /// never considered again, so `results` must be in batch order.
    pub fn build_groups(&self, results: &[AnalysisResult]) -> Vec<DuplicateGroup> {
        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(results.len());
        for (index, result) in results.iter().enumerate() {
            positions.entry(result.photo_id.as_str()).or_insert(index);
        }

        let mut processed: HashSet<&str> = HashSet::new();
        let mut groups = Vec::new();

        for result in results {
            let Some(group_type) = GroupType::from_decision(result.decision) else {
                continue;
            };
            if processed.contains(result.photo_id.as_str()) || result.related_photo_ids.is_empty() {
                continue;
            }

            let mut members: Vec<&str> = Vec::with_capacity(result.related_photo_ids.len() + 1);
            let candidates = std::iter::once(result.photo_id.as_str())
                .chain(result.related_photo_ids.iter().map(String::as_str));
            for id in candidates {
                if processed.contains(id) || !positions.contains_key(id) || members.contains(&id) {
                    continue;
                }
                members.push(id);
            }

            if members.len() < 2 {
                continue;
            }

            processed.extend(members.iter().copied());
            groups.push(self.make_group(group_type, result, &members, results, &positions));
        }

        log::debug!(
            "Built {} group(s) from {} result(s)",
            groups.len(),
            results.len()
        );
        groups
    }

    fn make_group(
        &self,
        group_type: GroupType,
        origin: &AnalysisResult,
        members: &[&str],
        results: &[AnalysisResult],
        positions: &HashMap<&str, usize>,
    ) -> DuplicateGroup {
        let photo_ids: Vec<String> = members.iter().map(|id| id.to_string()).collect();

        let (best_photo_id, quality_ranking, recommendation) = match group_type {
            GroupType::BurstSequence => {
                let ranked = self.rank_by_quality(members, results, positions);
                let (best_id, best_score) = ranked[0];
                let recommendation = format!(
                    "Keep {} (quality {:.2}); the other {} frame(s) of this burst can be discarded.",
                    best_id,
                    best_score,
                    ranked.len() - 1
                );
                let ranking = ranked.iter().map(|(id, _)| id.to_string()).collect();
                (Some(best_id.to_string()), Some(ranking), recommendation)
            }
            GroupType::ExactDuplicate => (
                None,
                None,
                format!(
                    "Keep one copy; the remaining {} photo(s) duplicate the same shot and can be removed.",
                    members.len() - 1
                ),
            ),
            GroupType::SimilarComposition => (
                None,
                None,
                format!(
                    "Review these {} photos; they share a similar composition and may be redundant.",
                    members.len()
                ),
            ),
        };

        DuplicateGroup {
            id: group_id(group_type, &photo_ids),
            group_type,
            photo_ids,
            reasoning: origin.reasoning.clone(),
            recommendation,
            confidence: origin.confidence,
            best_photo_id,
            quality_ranking,
        }
    }

    /// Members ordered best first; equal scores keep result order.
    fn rank_by_quality<'a>(
        &self,
        members: &[&'a str],
        results: &[AnalysisResult],
        positions: &HashMap<&str, usize>,
    ) -> Vec<(&'a str, f64)> {
        let mut ranked: Vec<(&'a str, f64, usize)> = members
            .iter()
            .map(|&id| {
                let position = positions.get(id).copied().unwrap_or(usize::MAX);
                let score = results
                    .get(position)
                    .map(|result| self.scorer.score_result(result))
                    .unwrap_or_else(|| self.scorer.overall_quality(None));
                (id, score, position)
            })
            .collect();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.2.cmp(&b.2)));
        ranked.into_iter().map(|(id, score, _)| (id, score)).collect()
    }
}

impl Default for GroupBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn group_id(group_type: GroupType, members: &[String]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(group_type.as_str().as_bytes());
    for member in members {
        hasher.update(&[0]);
        hasher.update(member.as_bytes());
    }
    let digest = hasher.finalize().to_hex();
    format!("grp_{}", &digest.as_str()[..12])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::analysis::AnalysisMethod;
    use crate::core::quality::{QualityMetrics, QualitySource};

    fn result(id: &str, decision: Decision, related: &[&str]) -> AnalysisResult {
        AnalysisResult::new(id, decision, 0.8, "test", AnalysisMethod::Heuristic)
            .with_related(related.iter().map(|r| r.to_string()))
    }

    fn scored(id: &str, related: &[&str], quality: f64) -> AnalysisResult {
        result(id, Decision::BurstShot, related).with_quality(QualityMetrics::new(
            quality,
            quality,
            quality,
            quality,
            "",
            QualitySource::Vision,
        ))
    }

    #[test]
    fn test_burst_ranking_picks_best() {
        let results = vec![
            scored("low", &["high", "mid"], 0.4),
            scored("high", &["low", "mid"], 0.9),
            scored("mid", &["low", "high"], 0.7),
        ];

        let groups = GroupBuilder::new().build_groups(&results);

        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.group_type, GroupType::BurstSequence);
        assert_eq!(group.photo_ids, vec!["low", "high", "mid"]);
        assert_eq!(group.best_photo_id.as_deref(), Some("high"));
        assert_eq!(
            group.quality_ranking,
            Some(vec!["high".to_string(), "mid".to_string(), "low".to_string()])
        );
        assert!(group.recommendation.contains("Keep high (quality 0.90)"));
    }

    #[test]
    fn test_quality_ties_keep_result_order() {
        let results = vec![
            result("a", Decision::BurstShot, &["b", "c"]),
            result("b", Decision::BurstShot, &["a"]),
            result("c", Decision::BurstShot, &["a"]),
        ];

        let groups = GroupBuilder::new().build_groups(&results);

        assert_eq!(
            groups[0].quality_ranking,
            Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
        assert_eq!(groups[0].best_photo_id.as_deref(), Some("a"));
    }

    #[test]
    fn test_no_photo_in_two_groups() {
        let results = vec![
            result("a", Decision::Duplicate, &["b"]),
            result("b", Decision::Duplicate, &["a", "c"]),
            result("c", Decision::Similar, &["b", "d"]),
            result("d", Decision::Similar, &["c", "e"]),
            result("e", Decision::Unique, &[]),
        ];

        let groups = GroupBuilder::new().build_groups(&results);

        let mut seen = HashSet::new();
        for group in &groups {
            assert!(group.photo_ids.len() >= 2);
            for id in &group.photo_ids {
                assert!(seen.insert(id.clone()), "{} appears twice", id);
            }
        }
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].photo_ids, vec!["a", "b"]);
        assert_eq!(groups[0].group_type, GroupType::ExactDuplicate);
        assert_eq!(groups[1].photo_ids, vec!["c", "d"]);
        assert_eq!(groups[1].group_type, GroupType::SimilarComposition);
        assert!(groups[0].best_photo_id.is_none());
        assert!(groups[1].quality_ranking.is_none());
    }

    #[test]
    fn test_group_of_one_is_dropped() {
        let results = vec![
            result("a", Decision::BurstShot, &["b"]),
            result("b", Decision::BurstShot, &["a"]),
            result("c", Decision::BurstShot, &["b"]),
        ];

        let groups = GroupBuilder::new().build_groups(&results);

        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].photo_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_unknown_related_ids_are_ignored() {
        let results = vec![
            result("a", Decision::Duplicate, &["ghost"]),
            result("b", Decision::Unique, &[]),
        ];

        assert!(GroupBuilder::new().build_groups(&results).is_empty());
    }

    #[test]
    fn test_build_groups_is_idempotent() {
        let results = vec![
            scored("a", &["b", "c"], 0.3),
            scored("b", &["a"], 0.6),
            scored("c", &["a"], 0.5),
            result("d", Decision::Duplicate, &["e"]),
            result("e", Decision::Duplicate, &["d"]),
        ];
        let builder = GroupBuilder::new();

        let first = builder.build_groups(&results);
        let second = builder.build_groups(&results);

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert!(first[0].id.starts_with("grp_"));
        assert_ne!(first[0].id, first[1].id);
    }

    #[test]
    fn test_group_serializes_type_field() {
        let results = vec![
            result("a", Decision::Duplicate, &["b"]),
            result("b", Decision::Duplicate, &["a"]),
        ];

        let groups = GroupBuilder::new().build_groups(&results);
        let value = serde_json::to_value(&groups[0]).unwrap();

        assert_eq!(value["type"], "exact_duplicate");
        assert_eq!(value["photoIds"][1], "b");
        assert!(value.get("bestPhotoId").is_none());
    }
}
