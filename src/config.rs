use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Every threshold the analysis uses, in one place.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalysisConfig {
    pub candidates: CandidateConfig,
    pub heuristics: HeuristicConfig,
    pub batch: BatchConfig,
    pub classifier: ClassifierConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CandidateConfig {
    /// Photos further apart than this are never compared.
    pub proximity_window_secs: i64,
    pub max_candidates: usize,
}

impl Default for CandidateConfig {
    fn default() -> Self {
        Self {
            proximity_window_secs: 30,
            max_candidates: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeuristicConfig {
    pub burst_window_secs: i64,
    pub duplicate_window_secs: i64,
    pub similar_window_secs: i64,
    /// Neighbours needed within the similar window before "similar" applies.
    pub similar_min_candidates: usize,
    /// Cap on related ids for a "similar" result.
    pub similar_max_related: usize,
    /// Two coordinates are the same place when both axes differ by at most this.
    pub gps_epsilon_degrees: f64,
    /// Fingerprint similarity at or above which two shots count as near-identical.
    pub fingerprint_similarity_threshold: f64,
    /// Let matching fingerprints stand in for matching GPS in the duplicate rule.
    pub fingerprint_duplicates: bool,
}

impl Default for HeuristicConfig {
    fn default() -> Self {
        Self {
            burst_window_secs: 10,
            duplicate_window_secs: 30,
            similar_window_secs: 60,
            similar_min_candidates: 2,
            similar_max_related: 2,
            gps_epsilon_degrees: 1e-5,
            fingerprint_similarity_threshold: 0.88,
            fingerprint_duplicates: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BatchConfig {
    pub max_photos: usize,
    /// Photos classified concurrently per sub-batch.
    pub sub_batch_size: usize,
    /// Pause between sub-batches while an external classifier is in use.
    pub inter_batch_delay_ms: u64,
    /// Limit on fetching one image for fingerprinting; slower photos are degraded.
    pub fetch_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_photos: 100,
            sub_batch_size: 5,
            inter_batch_delay_ms: 1000,
            fetch_timeout_ms: 20_000,
        }
    }
}

impl BatchConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClassifierConfig {
    pub timeout_ms: u64,
    pub rate_limit_requests: u32,
    pub rate_limit_window_secs: u64,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 25_000,
            rate_limit_requests: 60,
            rate_limit_window_secs: 60,
        }
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: AnalysisConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Explicit path first, then `<config dir>/sitecull/config.json`, else defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(default_path) if default_path.exists() => {
                log::info!("Loading configuration from {}", default_path.display());
                Self::load(&default_path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sitecull").join("config.json"))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.candidates.proximity_window_secs <= 0 {
            problems.push("candidates.proximityWindowSecs must be positive");
        }
        if self.candidates.max_candidates == 0 {
            problems.push("candidates.maxCandidates must be at least 1");
        }

        let h = &self.heuristics;
        if h.burst_window_secs <= 0 || h.duplicate_window_secs <= 0 || h.similar_window_secs <= 0
        {
            problems.push("heuristic windows must be positive");
        }
        if h.similar_min_candidates == 0 {
            problems.push("heuristics.similarMinCandidates must be at least 1");
        }
        if !(h.gps_epsilon_degrees.is_finite() && h.gps_epsilon_degrees >= 0.0) {
            problems.push("heuristics.gpsEpsilonDegrees must be a non-negative number");
        }
        if !(0.0..=1.0).contains(&h.fingerprint_similarity_threshold) {
            problems.push("heuristics.fingerprintSimilarityThreshold must be within [0, 1]");
        }

        if self.batch.max_photos == 0 {
            problems.push("batch.maxPhotos must be at least 1");
        }
        if self.batch.sub_batch_size == 0 {
            problems.push("batch.subBatchSize must be at least 1");
        }
        if self.batch.fetch_timeout_ms == 0 {
            problems.push("batch.fetchTimeoutMs must be positive");
        }

        if self.classifier.timeout_ms == 0 {
            problems.push("classifier.timeoutMs must be positive");
        }
        if self.classifier.rate_limit_requests == 0 || self.classifier.rate_limit_window_secs == 0 {
            problems.push("classifier rate limit must allow at least one request per window");
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid {
                message: problems.join("; "),
            })
        }
    }
}
