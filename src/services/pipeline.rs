use crate::config::AnalysisConfig;
use crate::core::analysis::{AnalysisMethod, AnalysisResult};
use crate::core::candidates::{CandidateSelector, isolated_result};
use crate::core::fingerprint::{FINGERPRINT_BITS, Fingerprint, FingerprintService};
use crate::core::grouping::{DuplicateGroup, GroupBuilder};
use crate::core::photo::{AnalysisRequest, BatchPhoto, PhotoRecord, RequestError};
use crate::services::classifier::{ClassifierAdapter, VisualClassifier};
use crate::services::image_source::ImageSource;
use crate::services::rate_limit::RateLimiter;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

/// Images fetched and fingerprinted at once.
const FINGERPRINT_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] RequestError),

    #[error("Operation cancelled")]
    Cancelled,
}

/// How the run as a whole was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMethod {
    Visual,
    Heuristic,
    /// Some photos were judged visually, others fell back to heuristics.
    Mixed,
    /// Every photo was isolated in time; nothing needed comparing.
    Temporal,
}

impl RunMethod {
    fn from_results(results: &[AnalysisResult]) -> Self {
        let visual = results
            .iter()
            .any(|r| r.analysis_method == AnalysisMethod::Visual);
        let heuristic = results
            .iter()
            .any(|r| r.analysis_method == AnalysisMethod::Heuristic);

        match (visual, heuristic) {
            (true, true) => RunMethod::Mixed,
            (true, false) => RunMethod::Visual,
            (false, true) => RunMethod::Heuristic,
            (false, false) => RunMethod::Temporal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisMetadata {
    pub run_id: Uuid,
    pub analysis_time_ms: u64,
    pub photos_analyzed: usize,
    pub analysis_method: RunMethod,
    /// Photos analysed without a usable fingerprint.
    pub degraded_photos: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResponse {
    pub analysis_results: Vec<AnalysisResult>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub metadata: AnalysisMetadata,
}

/// End-to-end analysis of one batch: fingerprints, candidate selection,
/// per-photo classification in throttled sub-batches, then grouping.
pub struct AnalysisPipeline {
    config: AnalysisConfig,
    images: Arc<dyn ImageSource>,
    selector: CandidateSelector,
    adapter: ClassifierAdapter,
    grouper: GroupBuilder,
    cancellation_token: Arc<AtomicBool>,
}

impl AnalysisPipeline {
    /// Pipeline that classifies with the metadata heuristics only.
    pub fn new(config: AnalysisConfig, images: Arc<dyn ImageSource>) -> Self {
        Self {
            selector: CandidateSelector::new(&config.candidates),
            adapter: ClassifierAdapter::heuristic_only(&config),
            grouper: GroupBuilder::new(),
            cancellation_token: Arc::new(AtomicBool::new(false)),
            images,
            config,
        }
    }

    pub fn with_classifier(
        mut self,
        classifier: Arc<dyn VisualClassifier>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        self.adapter = ClassifierAdapter::new(classifier, limiter, &self.config);
        self
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    /// Cancel the current and any later run on this pipeline.
    pub fn cancel(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisResponse, AnalysisError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();

        let records = request.into_records(self.config.batch.max_photos)?;
        self.check_cancelled()?;
        log::info!("Run {}: analyzing {} photo(s)", run_id, records.len());

        let batch: Vec<BatchPhoto> = stream::iter(records)
            .map(|record| self.resolve_fingerprint(record))
            .buffered(FINGERPRINT_CONCURRENCY)
            .collect()
            .await;
        let degraded_photos = batch.iter().filter(|p| p.degraded.is_some()).count();
        if degraded_photos > 0 {
            log::warn!(
                "Run {}: {} photo(s) have no usable fingerprint",
                run_id,
                degraded_photos
            );
        }

        let results = self.classify_batch(&batch).await?;
        self.check_cancelled()?;

        let duplicate_groups = self.grouper.build_groups(&results);
        let metadata = AnalysisMetadata {
            run_id,
            analysis_time_ms: started.elapsed().as_millis() as u64,
            photos_analyzed: results.len(),
            analysis_method: RunMethod::from_results(&results),
            degraded_photos,
        };
        log::info!(
            "Run {}: {} group(s) in {}ms ({:?})",
            run_id,
            duplicate_groups.len(),
            metadata.analysis_time_ms,
            metadata.analysis_method
        );

        Ok(AnalysisResponse {
            analysis_results: results,
            duplicate_groups,
            metadata,
        })
    }

    /// Analyze requests one after another and merge them into one response.
    ///
    /// Each request is grouped on its own, so groups never span two requests.
    pub async fn analyze_batches(
        &self,
        requests: Vec<AnalysisRequest>,
    ) -> Result<AnalysisResponse, AnalysisError> {
        if requests.is_empty() {
            return Err(RequestError::EmptyBatch.into());
        }
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let total = requests.len();

        let mut analysis_results = Vec::new();
        let mut duplicate_groups = Vec::new();
        let mut degraded_photos = 0;
        for (number, request) in requests.into_iter().enumerate() {
            log::info!("Run {}: batch {}/{} ({} photo(s))", run_id, number + 1, total, request.len());
            let response = self.analyze(request).await?;
            degraded_photos += response.metadata.degraded_photos;
            analysis_results.extend(response.analysis_results);
            duplicate_groups.extend(response.duplicate_groups);
        }

        let metadata = AnalysisMetadata {
            run_id,
            analysis_time_ms: started.elapsed().as_millis() as u64,
            photos_analyzed: analysis_results.len(),
            analysis_method: RunMethod::from_results(&analysis_results),
            degraded_photos,
        };
        Ok(AnalysisResponse {
            analysis_results,
            duplicate_groups,
            metadata,
        })
    }

    /// Results come back in batch order regardless of completion order.
    async fn classify_batch(&self, batch: &[BatchPhoto]) -> Result<Vec<AnalysisResult>, AnalysisError> {
        let indices: Vec<usize> = (0..batch.len()).collect();
        let delay = self.config.batch.inter_batch_delay();
        let mut results = Vec::with_capacity(batch.len());

        for (chunk_number, chunk) in indices.chunks(self.config.batch.sub_batch_size.max(1)).enumerate() {
            self.check_cancelled()?;
            if chunk_number > 0 && self.adapter.uses_external() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let classified = join_all(chunk.iter().map(|&index| self.classify_one(index, batch))).await;
            results.extend(classified);
        }

        Ok(results)
    }

    async fn classify_one(&self, index: usize, batch: &[BatchPhoto]) -> AnalysisResult {
        let target = &batch[index];
        let candidates = self.selector.select(index, batch);

        let result = if candidates.is_empty() {
            isolated_result(target)
        } else {
            self.adapter.classify(target, &candidates).await
        };
        log::debug!(
            "{}: {} ({:.2}, {:?})",
            result.photo_id,
            result.decision.as_str(),
            result.confidence,
            result.analysis_method
        );
        result
    }

    /// Use the supplied fingerprint when it is a valid 64-bit hash, otherwise
    /// fetch the image and compute one. Failure leaves the photo degraded.
    async fn resolve_fingerprint(&self, record: PhotoRecord) -> BatchPhoto {
        let mut problem = None;
        if !record.fingerprint.is_empty() {
            match Fingerprint::from_hex(&record.fingerprint) {
                Ok(fingerprint) if fingerprint.bit_width() == FINGERPRINT_BITS => {
                    return BatchPhoto::new(record, Some(fingerprint));
                }
                Ok(fingerprint) => {
                    problem = Some(format!(
                        "supplied fingerprint has {} bits, expected {}",
                        fingerprint.bit_width(),
                        FINGERPRINT_BITS
                    ));
                }
                Err(e) => problem = Some(format!("supplied fingerprint rejected: {}", e)),
            }
        }

        let fetch_timeout = self.config.batch.fetch_timeout();
        let fetched = tokio::time::timeout(fetch_timeout, self.images.fetch(&record.image_url)).await;
        let bytes = match fetched {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(e)) => {
                let reason = join_reasons(problem, format!("image unavailable: {}", e));
                log::warn!("{}: {}", record.id, reason);
                return BatchPhoto::degraded(record, reason);
            }
            Err(_) => {
                let reason = join_reasons(
                    problem,
                    format!("image fetch timed out after {:?}", fetch_timeout),
                );
                log::warn!("{}: {}", record.id, reason);
                return BatchPhoto::degraded(record, reason);
            }
        };

        let computed =
            tokio::task::spawn_blocking(move || FingerprintService::new().fingerprint_bytes(&bytes)).await;
        match computed {
            Ok(Ok(fingerprint)) => BatchPhoto::new(record, Some(fingerprint)),
            Ok(Err(e)) => {
                let reason = join_reasons(problem, format!("fingerprint failed: {}", e));
                log::warn!("{}: {}", record.id, reason);
                BatchPhoto::degraded(record, reason)
            }
            Err(e) => {
                let reason = join_reasons(problem, format!("fingerprint task failed: {}", e));
                log::warn!("{}: {}", record.id, reason);
                BatchPhoto::degraded(record, reason)
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), AnalysisError> {
        if self.cancellation_token.load(Ordering::Relaxed) {
            Err(AnalysisError::Cancelled)
        } else {
            Ok(())
        }
    }
}

fn join_reasons(first: Option<String>, second: String) -> String {
    match first {
        Some(first) => format!("{}; {}", first, second),
        None => second,
    }
}
