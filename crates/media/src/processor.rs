use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tokio::task;
use tracing::{debug, warn};

use stevedore_transfer::{ErrorKind, FilePayload, UploadError, checksum_bytes, crc32_digest};

/// Output encoding for processed images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeFormat {
    Jpeg,
    Png,
    WebP,
}

impl EncodeFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
        }
    }

    fn matches_mime(&self, mime: &str) -> bool {
        mime.eq_ignore_ascii_case(self.mime())
    }
}

/// Controls for image resizing and re-encoding.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// Widest the output may be, in pixels.
    pub max_width: u32,
    /// Tallest the output may be, in pixels.
    pub max_height: u32,
    /// Encoder quality in `0.0..=1.0` (lossy formats only).
    pub quality: f32,
    pub format: EncodeFormat,
    /// Scale uniformly instead of clamping each axis on its own.
    pub maintain_aspect_ratio: bool,
    /// Payloads at or below this size skip re-encoding when no resize is
    /// needed and the format already matches.
    pub compression_threshold: u64,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            max_width: 1920,
            max_height: 1080,
            quality: 0.8,
            format: EncodeFormat::Jpeg,
            maintain_aspect_ratio: true,
            compression_threshold: 2 * 1024 * 1024,
        }
    }
}

/// Description of a processed payload, attached to the upload receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub file_name: String,
    pub original_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processed_size: Option<u64>,
    /// Whole-percent size reduction; absent when nothing was re-encoded.
    /// Negative when a forced format conversion grew the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression_ratio: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Outcome of [`process_image`].
#[derive(Debug, Clone)]
pub struct Processed {
    pub payload: FilePayload,
    pub metadata: FileMetadata,
    /// True when pixel dimensions were reduced.
    pub resized: bool,
}

/// Resizes and re-encodes an image payload according to `options`.
///
/// The pipeline short-circuits when nothing would change: dimensions
/// already within bounds, target format already current and the payload
/// at or below the compression threshold. The original payload then comes
/// back untouched, with metadata describing it.
///
/// Decode, resize and encode run on the blocking pool. Checksumming runs
/// there too; if that worker fails, the digest degrades to an inline CRC32
/// instead of failing the upload.
///
/// The output keeps the source modification timestamp, so re-processing
/// the same source yields the same resume signature.
pub async fn process_image(
    payload: &FilePayload,
    options: &ProcessOptions,
) -> Result<Processed, UploadError> {
    if !payload.is_image() {
        return Err(UploadError::new(
            ErrorKind::InvalidFileType,
            format!("not an image: {}", payload.mime_type()),
        ));
    }

    let original_size = payload.len();
    let input = payload.clone();
    let opts = options.clone();
    let outcome = task::spawn_blocking(move || encode_pipeline(&input, &opts))
        .await
        .map_err(|e| {
            UploadError::new(ErrorKind::ProcessingFailed, "image worker failed")
                .with_details(e.to_string())
        })??;

    let (result, processed_size, compression_ratio) = match outcome.bytes {
        Some(bytes) => {
            let processed_size = bytes.len() as u64;
            let ratio =
                (100.0 * (1.0 - processed_size as f64 / original_size as f64)).round() as i32;
            debug!(
                file = %payload.file_name(),
                from = original_size,
                to = processed_size,
                "image re-encoded"
            );
            let file_name = renamed(payload.file_name(), options.format);
            let processed = FilePayload::from_bytes(file_name, options.format.mime(), bytes)
                .with_last_modified(payload.last_modified());
            (processed, Some(processed_size), Some(ratio))
        }
        None => (payload.clone(), None, None),
    };

    let shared = result.share_bytes();
    let checksum = match task::spawn_blocking(move || checksum_bytes(&shared)).await {
        Ok(digest) => Some(digest),
        Err(err) => {
            warn!(error = %err, "checksum worker failed, falling back to crc32");
            Some(crc32_digest(result.bytes()))
        }
    };

    let metadata = FileMetadata {
        file_name: result.file_name().to_string(),
        original_size,
        processed_size,
        compression_ratio,
        width: Some(outcome.width),
        height: Some(outcome.height),
        mime_type: result.mime_type().to_string(),
        checksum,
    };

    Ok(Processed {
        payload: result,
        metadata,
        resized: outcome.resized,
    })
}

struct PipelineOutcome {
    /// Re-encoded bytes, or `None` when the original should be kept.
    bytes: Option<Vec<u8>>,
    width: u32,
    height: u32,
    resized: bool,
}

fn encode_pipeline(
    payload: &FilePayload,
    options: &ProcessOptions,
) -> Result<PipelineOutcome, UploadError> {
    let img = ImageReader::new(Cursor::new(payload.bytes()))
        .with_guessed_format()
        .map_err(|e| {
            UploadError::new(ErrorKind::CorruptedFile, "unreadable image header")
                .with_details(e.to_string())
        })?
        .decode()
        .map_err(|e| {
            UploadError::new(ErrorKind::CorruptedFile, "image failed to decode")
                .with_details(e.to_string())
        })?;

    let (width, height) = (img.width(), img.height());
    let needs_resize = width > options.max_width || height > options.max_height;
    let format_matches = options.format.matches_mime(payload.mime_type());
    let small_enough = payload.len() <= options.compression_threshold;

    if !needs_resize && format_matches && small_enough {
        return Ok(PipelineOutcome {
            bytes: None,
            width,
            height,
            resized: false,
        });
    }

    let (img, out_w, out_h) = if needs_resize {
        let (tw, th) = target_dimensions(width, height, options);
        (
            img.resize_exact(tw, th, image::imageops::FilterType::Triangle),
            tw,
            th,
        )
    } else {
        (img, width, height)
    };

    let bytes = encode(&img, options)?;

    // Recompression that grew the file is discarded; a format conversion
    // or resize keeps its output regardless.
    if !needs_resize && format_matches && bytes.len() as u64 >= payload.len() {
        return Ok(PipelineOutcome {
            bytes: None,
            width,
            height,
            resized: false,
        });
    }

    Ok(PipelineOutcome {
        bytes: Some(bytes),
        width: out_w,
        height: out_h,
        resized: needs_resize,
    })
}

/// Uniform scale that respects both bounds, or per-axis clamping when
/// aspect ratio is not maintained.
fn target_dimensions(width: u32, height: u32, options: &ProcessOptions) -> (u32, u32) {
    if !options.maintain_aspect_ratio {
        return (
            width.min(options.max_width),
            height.min(options.max_height),
        );
    }

    let scale_w = f64::from(options.max_width) / f64::from(width);
    let scale_h = f64::from(options.max_height) / f64::from(height);
    let scale = scale_w.min(scale_h).min(1.0);

    let tw = (f64::from(width) * scale).round().max(1.0) as u32;
    let th = (f64::from(height) * scale).round().max(1.0) as u32;
    (tw, th)
}

fn encode(img: &DynamicImage, options: &ProcessOptions) -> Result<Vec<u8>, UploadError> {
    let mut buffer = Vec::new();
    match options.format {
        EncodeFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = img.to_rgb8();
            let quality = ((options.quality * 100.0) as u8).clamp(1, 100);
            let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            encoder
                .encode(
                    rgb.as_raw(),
                    rgb.width(),
                    rgb.height(),
                    image::ExtendedColorType::Rgb8,
                )
                .map_err(encode_error)?;
        }
        EncodeFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
                .map_err(encode_error)?;
        }
        EncodeFormat::WebP => {
            let rgba = img.to_rgba8();
            WebPEncoder::new_lossless(&mut buffer)
                .encode(
                    rgba.as_raw(),
                    rgba.width(),
                    rgba.height(),
                    image::ExtendedColorType::Rgba8,
                )
                .map_err(encode_error)?;
        }
    }
    Ok(buffer)
}

fn encode_error(err: image::ImageError) -> UploadError {
    UploadError::new(ErrorKind::ProcessingFailed, "image encoding failed")
        .with_details(err.to_string())
}

fn renamed(file_name: &str, format: EncodeFormat) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    format!("{stem}.{}", format.extension())
}
