use crate::core::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    #[error("Request contains no photos")]
    EmptyBatch,

    #[error("Request contains {count} photos; the limit is {max}")]
    TooManyPhotos { count: usize, max: usize },

    #[error("Array lengths differ: {details}")]
    MismatchedLengths { details: String },

    #[error("Photo at position {index} has a blank id")]
    BlankId { index: usize },

    #[error("Duplicate photo id: {id}")]
    DuplicateId { id: String },

    #[error("Photo {id} has {len} coordinate values; expected 0 or 2")]
    MalformedCoordinates { id: String, len: usize },

    #[error("Photo {id} has out-of-range coordinates ({latitude}, {longitude})")]
    CoordinatesOutOfRange {
        id: String,
        latitude: f64,
        longitude: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both axes agree within `epsilon` degrees.
    pub fn matches(&self, other: &Coordinates, epsilon: f64) -> bool {
        (self.latitude - other.latitude).abs() <= epsilon
            && (self.longitude - other.longitude).abs() <= epsilon
    }

    fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// A photo as supplied by the storage collaborator. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoRecord {
    pub id: String,
    pub image_url: String,
    pub captured_at: i64,
    pub coordinates: Option<Coordinates>,
    pub fingerprint: String,
}

/// A photo paired with its resolved fingerprint for one analysis run.
#[derive(Debug, Clone)]
pub struct BatchPhoto {
    pub record: PhotoRecord,
    pub fingerprint: Option<Fingerprint>,
    /// Why the fingerprint is missing, when it is.
    pub degraded: Option<String>,
}

impl BatchPhoto {
    pub fn new(record: PhotoRecord, fingerprint: Option<Fingerprint>) -> Self {
        Self {
            record,
            fingerprint,
            degraded: None,
        }
    }

    pub fn degraded(record: PhotoRecord, reason: impl Into<String>) -> Self {
        Self {
            record,
            fingerprint: None,
            degraded: Some(reason.into()),
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn captured_at(&self) -> i64 {
        self.record.captured_at
    }
}

/// Wire form of a single photo in the record-style request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPhoto {
    pub id: String,
    #[serde(default)]
    pub image_url: String,
    pub captured_at: i64,
    #[serde(default)]
    pub coordinates: Vec<f64>,
    #[serde(default)]
    pub fingerprint: String,
}

/// Column-style request: parallel arrays, one entry per photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnarRequest {
    pub photo_ids: Vec<String>,
    pub image_urls: Vec<String>,
    pub timestamps: Vec<i64>,
    #[serde(default)]
    pub locations: Vec<Vec<f64>>,
    #[serde(default)]
    pub fingerprints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalysisRequest {
    Records { photos: Vec<RequestPhoto> },
    Columns(ColumnarRequest),
}

impl AnalysisRequest {
    pub fn from_photos(photos: Vec<RequestPhoto>) -> Self {
        AnalysisRequest::Records { photos }
    }

    pub fn len(&self) -> usize {
        match self {
            AnalysisRequest::Records { photos } => photos.len(),
            AnalysisRequest::Columns(columns) => columns.photo_ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Validate the request shape and convert it into batch records.
    ///
    /// Runs before any processing; every error here is fatal for the request.
    pub fn into_records(self, max_photos: usize) -> Result<Vec<PhotoRecord>, RequestError> {
        let photos = match self {
            AnalysisRequest::Records { photos } => photos,
            AnalysisRequest::Columns(columns) => columns.into_rows()?,
        };

        if photos.is_empty() {
            return Err(RequestError::EmptyBatch);
        }
        if photos.len() > max_photos {
            return Err(RequestError::TooManyPhotos {
                count: photos.len(),
                max: max_photos,
            });
        }

        let mut seen = HashSet::new();
        let mut records = Vec::with_capacity(photos.len());
        for (index, photo) in photos.into_iter().enumerate() {
            let id = photo.id.trim().to_string();
            if id.is_empty() {
                return Err(RequestError::BlankId { index });
            }
            if !seen.insert(id.clone()) {
                return Err(RequestError::DuplicateId { id });
            }

            let coordinates = parse_coordinates(&id, &photo.coordinates)?;

            records.push(PhotoRecord {
                id,
                image_url: photo.image_url,
                captured_at: photo.captured_at,
                coordinates,
                fingerprint: photo.fingerprint.trim().to_string(),
            });
        }

        Ok(records)
    }
}

impl ColumnarRequest {
    fn into_rows(self) -> Result<Vec<RequestPhoto>, RequestError> {
        let expected = self.photo_ids.len();
        let mut mismatched = Vec::new();
        if self.image_urls.len() != expected {
            mismatched.push(format!("imageUrls has {}", self.image_urls.len()));
        }
        if self.timestamps.len() != expected {
            mismatched.push(format!("timestamps has {}", self.timestamps.len()));
        }
        // Optional columns may be omitted entirely.
        if !self.locations.is_empty() && self.locations.len() != expected {
            mismatched.push(format!("locations has {}", self.locations.len()));
        }
        if !self.fingerprints.is_empty() && self.fingerprints.len() != expected {
            mismatched.push(format!("fingerprints has {}", self.fingerprints.len()));
        }
        if !mismatched.is_empty() {
            return Err(RequestError::MismatchedLengths {
                details: format!("photoIds has {}, {}", expected, mismatched.join(", ")),
            });
        }

        let mut locations = self.locations.into_iter();
        let mut fingerprints = self.fingerprints.into_iter();
        Ok(self
            .photo_ids
            .into_iter()
            .zip(self.image_urls)
            .zip(self.timestamps)
            .map(|((id, image_url), captured_at)| RequestPhoto {
                id,
                image_url,
                captured_at,
                coordinates: locations.next().unwrap_or_default(),
                fingerprint: fingerprints.next().unwrap_or_default(),
            })
            .collect())
    }
}

fn parse_coordinates(id: &str, values: &[f64]) -> Result<Option<Coordinates>, RequestError> {
    match values {
        [] => Ok(None),
        [latitude, longitude] => {
            let coordinates = Coordinates::new(*latitude, *longitude);
            if coordinates.is_valid() {
                Ok(Some(coordinates))
            } else {
                Err(RequestError::CoordinatesOutOfRange {
                    id: id.to_string(),
                    latitude: *latitude,
                    longitude: *longitude,
                })
            }
        }
        _ => Err(RequestError::MalformedCoordinates {
            id: id.to_string(),
            len: values.len(),
        }),
    }
}
