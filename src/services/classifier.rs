use crate::config::AnalysisConfig;
use crate::core::analysis::{AnalysisMethod, AnalysisResult, Decision};
use crate::core::candidates::Candidate;
use crate::core::heuristic::HeuristicClassifier;
use crate::core::photo::{BatchPhoto, Coordinates};
use crate::core::quality::{DEFAULT_QUALITY, QualityMetrics, QualitySource};
use crate::services::image_source::ImageSourceError;
use crate::services::rate_limit::RateLimiter;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Confidence assumed when the classifier omits it.
const DEFAULT_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Image unavailable: {0}")]
    Image(#[from] ImageSourceError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Empty response")]
    EmptyResponse,

    #[error("Unknown decision: {0}")]
    UnknownDecision(String),

    #[error("Confidence {0} is outside [0, 1]")]
    InvalidConfidence(f64),

    #[error("Related index {index} does not name one of {candidates} candidate(s)")]
    IndexOutOfRange { index: i64, candidates: usize },
}

impl ClassifierError {
    /// Errors caused by what the service sent back rather than by reaching it.
    pub fn is_malformed_response(&self) -> bool {
        matches!(
            self,
            ClassifierError::Json(_)
                | ClassifierError::EmptyResponse
                | ClassifierError::UnknownDecision(_)
                | ClassifierError::InvalidConfidence(_)
                | ClassifierError::IndexOutOfRange { .. }
        )
    }
}

/// One candidate as shown to the classifier. `index` is its position in the
/// list sent, which is what `relatedIndices` refers back to.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSummary {
    pub index: usize,
    pub photo_id: String,
    pub image_url: String,
    pub offset_secs: i64,
    pub coordinates: Option<Coordinates>,
    pub fingerprint_similarity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationRequest {
    pub photo_id: String,
    pub image_url: String,
    pub captured_at: i64,
    pub coordinates: Option<Coordinates>,
    pub candidates: Vec<CandidateSummary>,
}

impl ClassificationRequest {
    pub fn new(target: &BatchPhoto, candidates: &[Candidate<'_>]) -> Self {
        let candidates = candidates
            .iter()
            .enumerate()
            .map(|(index, candidate)| CandidateSummary {
                index,
                photo_id: candidate.id().to_string(),
                image_url: candidate.photo.record.image_url.clone(),
                offset_secs: candidate.offset_secs,
                coordinates: candidate.photo.record.coordinates,
                fingerprint_similarity: match (&target.fingerprint, &candidate.photo.fingerprint) {
                    (Some(a), Some(b)) => a.similarity(b).ok(),
                    _ => None,
                },
            })
            .collect();

        Self {
            photo_id: target.id().to_string(),
            image_url: target.record.image_url.clone(),
            captured_at: target.captured_at(),
            coordinates: target.record.coordinates,
            candidates,
        }
    }
}

/// An external service that judges a target photo against its candidates.
///
/// Implementations return the service's raw answer; parsing and validation
/// happen in [`ClassifierAdapter`].
#[async_trait]
pub trait VisualClassifier: Send + Sync {
    async fn classify(&self, request: &ClassificationRequest) -> Result<String, ClassifierError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisualJudgement {
    decision: Option<String>,
    confidence: Option<f64>,
    reasoning: Option<String>,
    visual_observations: Option<String>,
    #[serde(alias = "relatedPhotoIndices")]
    related_indices: Option<Vec<i64>>,
    patterns: Option<Vec<String>>,
    quality_assessment: Option<QualityAssessment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QualityAssessment {
    sharpness: Option<f64>,
    composition: Option<f64>,
    lighting: Option<f64>,
    subject_clarity: Option<f64>,
    notes: Option<String>,
}

/// Why the heuristic path answered instead of the external classifier.
#[derive(Debug)]
pub enum FallbackReason {
    NotConfigured,
    RateLimited,
    TimedOut(Duration),
    Failed(ClassifierError),
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::NotConfigured => write!(f, "visual classifier not configured"),
            FallbackReason::RateLimited => write!(f, "rate limited"),
            FallbackReason::TimedOut(after) => {
                write!(f, "visual classifier timed out after {:?}", after)
            }
            FallbackReason::Failed(e) if e.is_malformed_response() => {
                write!(f, "malformed classifier response: {}", e)
            }
            FallbackReason::Failed(e) => write!(f, "visual classifier error: {}", e),
        }
    }
}

/// Classifies one photo, preferring the external classifier and falling back
/// to the metadata heuristics whenever it is missing, throttled, slow or wrong.
pub struct ClassifierAdapter {
    classifier: Option<Arc<dyn VisualClassifier>>,
    heuristic: HeuristicClassifier,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl ClassifierAdapter {
    /// Adapter with no external classifier; every photo takes the heuristic path.
    pub fn heuristic_only(config: &AnalysisConfig) -> Self {
        Self {
            classifier: None,
            heuristic: HeuristicClassifier::new(config.heuristics.clone()),
            limiter: Arc::new(RateLimiter::from_config(&config.classifier)),
            timeout: config.classifier.timeout(),
        }
    }

    pub fn new(
        classifier: Arc<dyn VisualClassifier>,
        limiter: Arc<RateLimiter>,
        config: &AnalysisConfig,
    ) -> Self {
        Self {
            classifier: Some(classifier),
            heuristic: HeuristicClassifier::new(config.heuristics.clone()),
            limiter,
            timeout: config.classifier.timeout(),
        }
    }

    pub fn uses_external(&self) -> bool {
        self.classifier.is_some()
    }

    /// Never fails: any problem with the external classifier is absorbed by
    /// the heuristic fallback and recorded in the result's technical notes.
    pub async fn classify(&self, target: &BatchPhoto, candidates: &[Candidate<'_>]) -> AnalysisResult {
        let Some(classifier) = &self.classifier else {
            return self.fallback(target, candidates, FallbackReason::NotConfigured);
        };

        if !self.limiter.try_acquire() {
            return self.fallback(target, candidates, FallbackReason::RateLimited);
        }

        let request = ClassificationRequest::new(target, candidates);
        let response = match tokio::time::timeout(self.timeout, classifier.classify(&request)).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => return self.fallback(target, candidates, FallbackReason::Failed(e)),
            Err(_) => {
                return self.fallback(target, candidates, FallbackReason::TimedOut(self.timeout));
            }
        };

        match parse_judgement(&response, target, candidates) {
            Ok(result) => {
                log::debug!(
                    "{}: {} ({:.2}) from visual classifier",
                    result.photo_id,
                    result.decision.as_str(),
                    result.confidence
                );
                result
            }
            Err(e) => self.fallback(target, candidates, FallbackReason::Failed(e)),
        }
    }

    fn fallback(
        &self,
        target: &BatchPhoto,
        candidates: &[Candidate<'_>],
        reason: FallbackReason,
    ) -> AnalysisResult {
        match reason {
            FallbackReason::NotConfigured => {}
            _ => log::warn!("Heuristic fallback for {}: {}", target.id(), reason),
        }
        self.heuristic
            .classify(target, candidates)
            .with_leading_note(reason.to_string())
    }
}

/// Strip a surrounding Markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line.
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn parse_judgement(
    text: &str,
    target: &BatchPhoto,
    candidates: &[Candidate<'_>],
) -> Result<AnalysisResult, ClassifierError> {
    let body = strip_code_fence(text);
    if body.is_empty() {
        return Err(ClassifierError::EmptyResponse);
    }
    let judgement: VisualJudgement = serde_json::from_str(body)?;

    let decision = match judgement.decision.as_deref() {
        None => Decision::Unique,
        Some(raw) => {
            Decision::parse(raw).ok_or_else(|| ClassifierError::UnknownDecision(raw.to_string()))?
        }
    };

    let confidence = judgement.confidence.unwrap_or(DEFAULT_CONFIDENCE);
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(ClassifierError::InvalidConfidence(confidence));
    }

    let mut related = Vec::new();
    for index in judgement.related_indices.unwrap_or_default() {
        let candidate = usize::try_from(index)
            .ok()
            .and_then(|position| candidates.get(position))
            .ok_or(ClassifierError::IndexOutOfRange {
                index,
                candidates: candidates.len(),
            })?;
        related.push(candidate.id().to_string());
    }

    let mut result = AnalysisResult::new(
        target.id(),
        decision,
        confidence,
        judgement.reasoning.unwrap_or_default(),
        AnalysisMethod::Visual,
    )
    .with_observations(judgement.visual_observations.unwrap_or_default())
    .with_related(related)
    .with_patterns(judgement.patterns.unwrap_or_default());

    if decision.wants_quality() {
        result = match judgement.quality_assessment {
            Some(quality) => result.with_quality(QualityMetrics::new(
                quality.sharpness.unwrap_or(DEFAULT_QUALITY),
                quality.composition.unwrap_or(DEFAULT_QUALITY),
                quality.lighting.unwrap_or(DEFAULT_QUALITY),
                quality.subject_clarity.unwrap_or(DEFAULT_QUALITY),
                quality.notes.unwrap_or_default(),
                QualitySource::Vision,
            )),
            None => result
                .with_quality(QualityMetrics::estimated_from_metadata(
                    target.record.coordinates.is_some(),
                    target.fingerprint.is_some(),
                ))
                .with_note("classifier gave no quality assessment; estimated from metadata"),
        };
    }

    let result = result.with_note(format!(
        "visual classification over {} candidate(s)",
        candidates.len()
    ));
    Ok(match &target.degraded {
        Some(reason) => result.with_note(format!("degraded: {}", reason)),
        None => result,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CandidateConfig;
    use crate::core::candidates::CandidateSelector;
    use crate::core::photo::PhotoRecord;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behaviour {
        Reply(String),
        Fail,
        Sleep(Duration),
    }

    struct StubClassifier {
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    impl StubClassifier {
        fn new(behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                behaviour,
                calls: AtomicUsize::new(0),
            })
        }

        fn reply(text: &str) -> Arc<Self> {
            Self::new(Behaviour::Reply(text.to_string()))
        }
    }

    #[async_trait]
    impl VisualClassifier for StubClassifier {
        async fn classify(&self, _request: &ClassificationRequest) -> Result<String, ClassifierError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behaviour {
                Behaviour::Reply(text) => Ok(text.clone()),
                Behaviour::Fail => Err(ClassifierError::Api {
                    status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
                    body: "overloaded".to_string(),
                }),
                Behaviour::Sleep(duration) => {
                    tokio::time::sleep(*duration).await;
                    Ok("{}".to_string())
                }
            }
        }
    }

    /// Target "t" at 100s plus neighbours; candidate order is c3, c1, c2.
    fn batch() -> Vec<BatchPhoto> {
        [("t", 100), ("c1", 104), ("c2", 120), ("c3", 101)]
            .into_iter()
            .map(|(id, captured_at)| {
                BatchPhoto::new(
                    PhotoRecord {
                        id: id.to_string(),
                        image_url: format!("{}.jpg", id),
                        captured_at,
                        coordinates: None,
                        fingerprint: String::new(),
                    },
                    None,
                )
            })
            .collect()
    }

    fn adapter(classifier: Arc<StubClassifier>, config: &AnalysisConfig) -> ClassifierAdapter {
        ClassifierAdapter::new(
            classifier,
            Arc::new(RateLimiter::from_config(&config.classifier)),
            config,
        )
    }

    async fn run(adapter: &ClassifierAdapter, photos: &[BatchPhoto]) -> AnalysisResult {
        let candidates = CandidateSelector::new(&CandidateConfig::default()).select(0, photos);
        adapter.classify(&photos[0], &candidates).await
    }

    #[test]
    fn test_request_lists_candidates_in_selection_order() {
        let photos = batch();
        let candidates = CandidateSelector::new(&CandidateConfig::default()).select(0, &photos);
        let request = ClassificationRequest::new(&photos[0], &candidates);

        let ids: Vec<&str> = request.candidates.iter().map(|c| c.photo_id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c1", "c2"]);
        assert_eq!(request.candidates[2].index, 2);
        assert_eq!(request.candidates[2].offset_secs, 20);
    }

    #[tokio::test]
    async fn test_related_indices_map_to_candidate_ids() {
        let photos = batch();
        let config = AnalysisConfig::default();
        let stub = StubClassifier::reply(
            r#"{"decision":"burst_shot","confidence":0.92,"reasoning":"same framing",
                "visualObservations":"crane in frame","relatedIndices":[0,1,1],
                "patterns":["rapid_succession"],
                "qualityAssessment":{"sharpness":0.9,"composition":0.8,"lighting":0.7,"subjectClarity":0.6,"notes":"sharp"}}"#,
        );

        let result = run(&adapter(stub, &config), &photos).await;

        assert_eq!(result.analysis_method, AnalysisMethod::Visual);
        assert_eq!(result.decision, Decision::BurstShot);
        assert_eq!(result.related_photo_ids, vec!["c3", "c1"]);
        assert_eq!(result.visual_observations, "crane in frame");
        let metrics = result.quality_metrics.unwrap();
        assert_eq!(metrics.source, QualitySource::Vision);
        assert!((metrics.overall_quality - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_out_of_range_index_falls_back() {
        let photos = batch();
        let config = AnalysisConfig::default();
        let stub = StubClassifier::reply(r#"{"decision":"duplicate","confidence":0.9,"relatedIndices":[3]}"#);

        let result = run(&adapter(stub, &config), &photos).await;

        assert_eq!(result.analysis_method, AnalysisMethod::Heuristic);
        assert!(result.technical_notes.starts_with("malformed classifier response:"));
        assert_eq!(result.decision, Decision::BurstShot);
    }

    #[tokio::test]
    async fn test_negative_index_falls_back() {
        let photos = batch();
        let config = AnalysisConfig::default();
        let stub = StubClassifier::reply(r#"{"decision":"similar","relatedIndices":[-1]}"#);

        let result = run(&adapter(stub, &config), &photos).await;

        assert_eq!(result.analysis_method, AnalysisMethod::Heuristic);
        assert!(result.technical_notes.contains("index -1"));
    }

    #[tokio::test]
    async fn test_fenced_json_is_accepted() {
        let photos = batch();
        let config = AnalysisConfig::default();
        let stub = StubClassifier::reply("```json\n{\"decision\":\"similar\",\"confidence\":0.65,\"relatedIndices\":[2]}\n```");

        let result = run(&adapter(stub, &config), &photos).await;

        assert_eq!(result.analysis_method, AnalysisMethod::Visual);
        assert_eq!(result.decision, Decision::Similar);
        assert_eq!(result.related_photo_ids, vec!["c2"]);
        assert!(result.quality_metrics.is_none());
    }

    #[tokio::test]
    async fn test_missing_fields_default_conservatively() {
        let photos = batch();
        let config = AnalysisConfig::default();
        let stub = StubClassifier::reply(r#"{"relatedIndices":[0,1]}"#);

        let result = run(&adapter(stub, &config), &photos).await;

        assert_eq!(result.analysis_method, AnalysisMethod::Visual);
        assert_eq!(result.decision, Decision::Unique);
        assert_eq!(result.confidence, 0.7);
        assert!(result.related_photo_ids.is_empty());
    }

    #[tokio::test]
    async fn test_bad_decision_and_confidence_fall_back() {
        let photos = batch();
        let config = AnalysisConfig::default();

        for reply in [
            r#"{"decision":"maybe"}"#,
            r#"{"decision":"unique","confidence":1.4}"#,
            "not json at all",
            "[1, 2, 3]",
            "",
        ] {
            let result = run(&adapter(StubClassifier::reply(reply), &config), &photos).await;
            assert_eq!(result.analysis_method, AnalysisMethod::Heuristic, "reply: {}", reply);
            assert!(result.technical_notes.starts_with("malformed classifier response:"));
        }
    }

    #[tokio::test]
    async fn test_service_error_falls_back() {
        let photos = batch();
        let config = AnalysisConfig::default();

        let result = run(&adapter(StubClassifier::new(Behaviour::Fail), &config), &photos).await;

        assert_eq!(result.analysis_method, AnalysisMethod::Heuristic);
        assert!(result.technical_notes.starts_with("visual classifier error: API error (status 503"));
    }

    #[tokio::test]
    async fn test_slow_classifier_times_out() {
        let photos = batch();
        let mut config = AnalysisConfig::default();
        config.classifier.timeout_ms = 20;
        let stub = StubClassifier::new(Behaviour::Sleep(Duration::from_millis(500)));

        let result = run(&adapter(stub, &config), &photos).await;

        assert_eq!(result.analysis_method, AnalysisMethod::Heuristic);
        assert!(result.technical_notes.starts_with("visual classifier timed out after 20ms"));
    }

    #[tokio::test]
    async fn test_rate_limited_calls_skip_the_classifier() {
        let photos = batch();
        let config = AnalysisConfig::default();
        let stub = StubClassifier::reply(r#"{"decision":"unique","confidence":0.9}"#);
        let limiter = Arc::new(RateLimiter::new(1, Duration::from_secs(3600)));
        let adapter = ClassifierAdapter::new(stub.clone(), limiter, &config);

        let first = run(&adapter, &photos).await;
        let second = run(&adapter, &photos).await;

        assert_eq!(first.analysis_method, AnalysisMethod::Visual);
        assert_eq!(second.analysis_method, AnalysisMethod::Heuristic);
        assert!(second.technical_notes.starts_with("rate limited"));
        assert_eq!(stub.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_heuristic_only_adapter_notes_missing_classifier() {
        let photos = batch();
        let adapter = ClassifierAdapter::heuristic_only(&AnalysisConfig::default());

        let result = run(&adapter, &photos).await;

        assert!(!adapter.uses_external());
        assert_eq!(result.analysis_method, AnalysisMethod::Heuristic);
        assert!(result.technical_notes.starts_with("visual classifier not configured"));
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("  {\"a\":1} "), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{}\n```\n"), "{}");
    }
}
