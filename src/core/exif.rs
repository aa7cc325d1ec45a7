use chrono::{DateTime, NaiveDateTime, Utc};
use exif::{Exif, In, Reader, Tag, Value};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use thiserror::Error;

use crate::core::photo::Coordinates;

#[derive(Debug, Error)]
pub enum ExifError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("EXIF parsing error: {0}")]
    Parse(#[from] exif::Error),
}

/// Capture metadata the analysis cares about.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureMetadata {
    pub captured_at: Option<DateTime<Utc>>,
    pub coordinates: Option<Coordinates>,
}

impl CaptureMetadata {
    fn is_empty(&self) -> bool {
        self.captured_at.is_none() && self.coordinates.is_none()
    }
}

/// Service for extracting capture time and GPS position from image files
pub struct ExifService;

impl ExifService {
    pub fn new() -> Self {
        Self
    }

    /// Extract capture metadata from an image file.
    ///
    /// Unreadable files and files without EXIF yield `None`; the caller falls
    /// back to file timestamps.
    pub fn extract(&self, file_path: &Path) -> Option<CaptureMetadata> {
        let exif = match Self::read_exif(file_path) {
            Ok(exif) => exif,
            Err(e) => {
                log::debug!("No EXIF for {}: {}", file_path.display(), e);
                return None;
            }
        };

        let captured_at = [Tag::DateTimeOriginal, Tag::DateTime]
            .into_iter()
            .find_map(|tag| {
                exif.get_field(tag, In::PRIMARY)
                    .and_then(|field| field_to_string(&field.value))
            })
            .and_then(|value| parse_exif_datetime(&value));

        let metadata = CaptureMetadata {
            captured_at,
            coordinates: gps_coordinates(&exif),
        };

        if metadata.is_empty() {
            None
        } else {
            Some(metadata)
        }
    }

    fn read_exif(file_path: &Path) -> Result<Exif, ExifError> {
        let file = File::open(file_path)?;
        let mut buf_reader = BufReader::new(file);
        Ok(Reader::new().read_from_container(&mut buf_reader)?)
    }
}

impl Default for ExifService {
    fn default() -> Self {
        Self::new()
    }
}

fn gps_coordinates(exif: &Exif) -> Option<Coordinates> {
    let latitude = gps_axis(exif, Tag::GPSLatitude, Tag::GPSLatitudeRef)?;
    let longitude = gps_axis(exif, Tag::GPSLongitude, Tag::GPSLongitudeRef)?;
    let coordinates = Coordinates::new(latitude, longitude);

    if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
        Some(coordinates)
    } else {
        log::warn!("Ignoring out-of-range GPS position ({}, {})", latitude, longitude);
        None
    }
}

fn gps_axis(exif: &Exif, value_tag: Tag, ref_tag: Tag) -> Option<f64> {
    let field = exif.get_field(value_tag, In::PRIMARY)?;
    let Value::Rational(parts) = &field.value else {
        return None;
    };
    let dms: Vec<f64> = parts
        .iter()
        .filter(|rational| rational.denom != 0)
        .map(|rational| rational.num as f64 / rational.denom as f64)
        .collect();
    if dms.len() != parts.len() || dms.is_empty() {
        return None;
    }

    let reference = exif
        .get_field(ref_tag, In::PRIMARY)
        .and_then(|field| field_to_string(&field.value))
        .unwrap_or_default();

    dms_to_degrees(&dms, &reference)
}

/// Degrees/minutes/seconds to signed decimal degrees. South and west are
/// negative. Missing minutes or seconds count as zero.
pub fn dms_to_degrees(dms: &[f64], reference: &str) -> Option<f64> {
    let degrees = *dms.first()?;
    let minutes = dms.get(1).copied().unwrap_or(0.0);
    let seconds = dms.get(2).copied().unwrap_or(0.0);
    let value = degrees + minutes / 60.0 + seconds / 3600.0;

    if !value.is_finite() {
        return None;
    }

    match reference.trim().to_ascii_uppercase().as_str() {
        "S" | "W" => Some(-value),
        _ => Some(value),
    }
}

fn field_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Ascii(vec) => vec.first().map(|ascii_val| {
            String::from_utf8_lossy(ascii_val)
                .trim_end_matches('\0')
                .to_string()
        }),
        Value::Undefined(data, _) => Some(
            String::from_utf8_lossy(data)
                .trim_end_matches('\0')
                .to_string(),
        ),
        _ => None,
    }
}

/// EXIF datetime format: "YYYY:MM:DD HH:MM:SS", no zone. Read as UTC.
fn parse_exif_datetime(datetime_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = datetime_str.trim();
    match NaiveDateTime::parse_from_str(trimmed, "%Y:%m:%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
    {
        Ok(dt) => Some(dt.and_utc()),
        Err(_) => {
            log::warn!("Failed to parse EXIF datetime: {}", datetime_str);
            None
        }
    }
}
