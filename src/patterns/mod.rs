pub mod custom;
pub mod detector;
pub mod library;

pub use detector::{build_signals, detect, DetectedPattern, PatternDetectorConfig};
