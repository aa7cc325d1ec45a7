//! Duplicate, burst and similar-shot detection for batches of job-site photos.
//!
//! The pipeline selects temporal neighbours for every photo, asks an external
//! vision classifier for a judgement (falling back to metadata heuristics when
//! that fails), and folds the per-photo results into disjoint groups with a
//! recommended keeper.

pub mod config;
pub mod core;
pub mod services;

pub use crate::config::AnalysisConfig;
pub use crate::core::analysis::{AnalysisMethod, AnalysisResult, Decision};
pub use crate::core::fingerprint::{Fingerprint, FingerprintError, FingerprintService};
pub use crate::core::grouping::{DuplicateGroup, GroupBuilder, GroupType};
pub use crate::core::photo::{AnalysisRequest, BatchPhoto, Coordinates, PhotoRecord, RequestError};
pub use crate::core::quality::{QualityMetrics, QualityScorer, QualitySource};
pub use crate::services::classifier::{ClassifierAdapter, ClassifierError, VisualClassifier};
pub use crate::services::pipeline::{AnalysisError, AnalysisPipeline, AnalysisResponse};
pub use crate::services::rate_limit::RateLimiter;
