pub mod classifier;
pub mod image_source;
pub mod pipeline;
pub mod rate_limit;
pub mod scanner;
pub mod vision;
