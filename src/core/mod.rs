// Photo classification core:
// - request validation and batch records
// - perceptual fingerprints (difference hash)
// - temporal candidate selection
// - metadata heuristics used when no visual judgement is available
// - quality scoring and duplicate/burst grouping

pub mod analysis;
pub mod candidates;
pub mod exif;
pub mod fingerprint;
pub mod grouping;
pub mod heuristic;
pub mod photo;
pub mod quality;
