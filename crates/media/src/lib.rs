//! Client-side media analysis and processing.
//!
//! Sits between payload loading and the upload engine: the analyzer
//! recommends handling for a payload, the processor rewrites image
//! payloads to fit dimension and size targets.

mod analyzer;
mod processor;

pub use analyzer::{Analysis, AnalyzerConfig, Recommendation, analyze};
pub use processor::{EncodeFormat, FileMetadata, ProcessOptions, Processed, process_image};
