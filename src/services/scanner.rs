use crate::core::exif::ExifService;
use crate::core::fingerprint::FingerprintService;
use crate::core::photo::{AnalysisRequest, RequestPhoto};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanOptions {
    pub recursive: bool,
    pub max_depth: Option<usize>,
    pub supported_formats: Vec<String>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            max_depth: None,
            supported_formats: vec![
                "jpg".to_string(),
                "jpeg".to_string(),
                "png".to_string(),
                "tiff".to_string(),
                "tif".to_string(),
                "webp".to_string(),
            ],
        }
    }
}

/// Turns a directory of photos into an analysis request: capture time and GPS
/// from EXIF (file modification time when absent) plus a dHash per file.
pub struct ScannerService {
    options: ScanOptions,
    exif_service: ExifService,
    cancellation_token: Arc<AtomicBool>,
}

impl ScannerService {
    pub fn new() -> Self {
        Self::with_options(ScanOptions::default())
    }

    pub fn with_options(options: ScanOptions) -> Self {
        Self {
            options,
            exif_service: ExifService::new(),
            cancellation_token: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn get_cancellation_token(&self) -> Arc<AtomicBool> {
        self.cancellation_token.clone()
    }

    pub fn cancel_scan(&self) {
        self.cancellation_token.store(true, Ordering::Relaxed);
    }

    /// Photos come back in capture order, ties broken by id.
    pub fn scan(&self, root: &Path) -> Result<AnalysisRequest, ScanError> {
        if !root.is_dir() {
            return Err(ScanError::InvalidPath {
                path: root.to_string_lossy().to_string(),
            });
        }

        let files = self.discover_files(root)?;
        log::info!("Found {} image file(s) under {}", files.len(), root.display());

        let mut photos: Vec<RequestPhoto> = files
            .par_iter()
            .map_init(FingerprintService::new, |fingerprints, path| {
                if self.cancellation_token.load(Ordering::Relaxed) {
                    return None;
                }
                Some(self.describe(root, path, fingerprints))
            })
            .collect::<Option<Vec<_>>>()
            .ok_or(ScanError::Cancelled)?;

        photos.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then_with(|| a.id.cmp(&b.id)));
        Ok(AnalysisRequest::from_photos(photos))
    }

    /// Scan `root` and split the result into requests of at most `max_photos`,
    /// cutting only where consecutive shots are `window_secs` or more apart.
    pub fn scan_batches(
        &self,
        root: &Path,
        max_photos: usize,
        window_secs: i64,
    ) -> Result<Vec<AnalysisRequest>, ScanError> {
        let photos = match self.scan(root)? {
            AnalysisRequest::Records { photos } => photos,
            AnalysisRequest::Columns(_) => Vec::new(),
        };

        let batches = split_into_batches(photos, max_photos, window_secs);
        if batches.len() > 1 {
            log::info!("Split scan into {} batches of at most {} photo(s)", batches.len(), max_photos);
        }
        Ok(batches.into_iter().map(AnalysisRequest::from_photos).collect())
    }

    fn discover_files(&self, root: &Path) -> Result<Vec<PathBuf>, ScanError> {
        let mut walker = WalkDir::new(root).follow_links(false);
        if !self.options.recursive {
            walker = walker.max_depth(1);
        } else if let Some(max_depth) = self.options.max_depth {
            walker = walker.max_depth(max_depth);
        }

        let mut discovered_files = Vec::new();
        for entry in walker.into_iter() {
            if self.cancellation_token.load(Ordering::Relaxed) {
                return Err(ScanError::Cancelled);
            }

            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let supported = entry
                .path()
                .extension()
                .map(|ext| ext.to_string_lossy().to_lowercase())
                .is_some_and(|ext| self.options.supported_formats.contains(&ext));
            if supported {
                discovered_files.push(entry.into_path());
            }
        }

        discovered_files.sort();
        Ok(discovered_files)
    }

    fn describe(&self, root: &Path, path: &Path, fingerprints: &FingerprintService) -> RequestPhoto {
        let metadata = self.exif_service.extract(path).unwrap_or_default();

        let captured_at = metadata
            .captured_at
            .or_else(|| modified_time(path))
            .map(|at| at.timestamp())
            .unwrap_or(0);

        let fingerprint = match fingerprints.fingerprint_file(path) {
            Ok(fingerprint) => fingerprint.to_hex(),
            Err(e) => {
                log::warn!("Could not fingerprint {}: {}", path.display(), e);
                String::new()
            }
        };

        let id = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        RequestPhoto {
            id,
            image_url: path.to_string_lossy().to_string(),
            captured_at,
            coordinates: metadata
                .coordinates
                .map(|at| vec![at.latitude, at.longitude])
                .unwrap_or_default(),
            fingerprint,
        }
    }
}

impl Default for ScannerService {
    fn default() -> Self {
        Self::new()
    }
}

/// Split capture-ordered photos into batches of at most `max_photos`.
///
/// A cut lands only before a photo taken `window_secs` or more after its
/// predecessor, so no two photos that could be candidates for each other end
/// up in different batches. A run of closely spaced shots longer than
/// `max_photos` is the exception and gets cut at the limit.
pub fn split_into_batches(
    photos: Vec<RequestPhoto>,
    max_photos: usize,
    window_secs: i64,
) -> Vec<Vec<RequestPhoto>> {
    let max_photos = max_photos.max(1);
    let mut batches = Vec::new();
    let mut current: Vec<RequestPhoto> = Vec::new();
    // Index in `current` of the latest photo that may start a batch.
    let mut last_gap: Option<usize> = None;

    for photo in photos {
        let starts_cluster = current
            .last()
            .is_none_or(|previous| photo.captured_at - previous.captured_at >= window_secs);

        if current.len() == max_photos {
            if starts_cluster {
                batches.push(std::mem::take(&mut current));
                last_gap = None;
            } else if let Some(cut) = last_gap.filter(|&cut| cut > 0) {
                let rest = current.split_off(cut);
                batches.push(std::mem::replace(&mut current, rest));
                last_gap = Some(0);
            } else {
                log::warn!(
                    "More than {} photos taken less than {}s apart; splitting the run at {}",
                    max_photos,
                    window_secs,
                    photo.id
                );
                batches.push(std::mem::take(&mut current));
                last_gap = None;
            }
        }

        if starts_cluster {
            last_gap = Some(current.len());
        }
        current.push(photo);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}
