use std::io::Cursor;

use image::ImageReader;
use serde::{Deserialize, Serialize};

use stevedore_protocol::FileKind;
use stevedore_transfer::FilePayload;

/// Size thresholds steering analysis recommendations.
#[derive(Debug, Clone)]
pub struct AnalyzerConfig {
    /// Images above this size get a compression recommendation (2 MiB).
    pub image_compression_threshold: u64,
    /// Files above this size should take the chunked path (50 MiB).
    pub chunking_threshold: u64,
    /// Videos above this size get flagged for server-side optimization (100 MiB).
    pub video_optimization_threshold: u64,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            image_compression_threshold: 2 * 1024 * 1024,
            chunking_threshold: 50 * 1024 * 1024,
            video_optimization_threshold: 100 * 1024 * 1024,
        }
    }
}

/// Suggested handling derived from a payload's kind and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    CompressImage,
    ChunkedTransfer,
    DirectTransfer,
    OptimizeVideoServerSide,
}

/// What the analyzer learned about a payload.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub kind: FileKind,
    /// Pixel width, when the payload decodes as an image.
    pub width: Option<u32>,
    /// Pixel height, when the payload decodes as an image.
    pub height: Option<u32>,
    pub recommendations: Vec<Recommendation>,
    /// Rough client-side processing estimate, present only when processing
    /// is recommended.
    pub estimated_processing_ms: Option<u64>,
}

impl Analysis {
    pub fn recommends(&self, r: Recommendation) -> bool {
        self.recommendations.contains(&r)
    }
}

/// Inspects a payload without mutating it.
///
/// Dimension probing decodes only the image header. A payload that fails
/// to probe simply reports no dimensions; analysis never fails.
pub fn analyze(payload: &FilePayload, config: &AnalyzerConfig) -> Analysis {
    let kind = FileKind::from_mime(payload.mime_type());
    let file_size = payload.len();

    let (width, height) = if kind == FileKind::Image {
        probe_dimensions(payload.bytes())
    } else {
        (None, None)
    };

    let mut recommendations = Vec::new();
    if kind == FileKind::Image && file_size > config.image_compression_threshold {
        recommendations.push(Recommendation::CompressImage);
    }
    if kind == FileKind::Video && file_size > config.video_optimization_threshold {
        recommendations.push(Recommendation::OptimizeVideoServerSide);
    }
    recommendations.push(if file_size > config.chunking_threshold {
        Recommendation::ChunkedTransfer
    } else {
        Recommendation::DirectTransfer
    });

    let estimated_processing_ms = recommendations
        .contains(&Recommendation::CompressImage)
        .then(|| estimate_processing_ms(file_size));

    Analysis {
        file_name: payload.file_name().to_string(),
        file_size,
        mime_type: payload.mime_type().to_string(),
        kind,
        width,
        height,
        recommendations,
        estimated_processing_ms,
    }
}

/// Assumes roughly 25 MB/s for a decode plus re-encode pass.
fn estimate_processing_ms(file_size: u64) -> u64 {
    const BYTES_PER_MS: u64 = 25 * 1024 * 1024 / 1000;
    (file_size / BYTES_PER_MS).max(50)
}

fn probe_dimensions(bytes: &[u8]) -> (Option<u32>, Option<u32>) {
    let dims = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()
        .and_then(|reader| reader.into_dimensions().ok());
    match dims {
        Some((w, h)) => (Some(w), Some(h)),
        None => (None, None),
    }
}
