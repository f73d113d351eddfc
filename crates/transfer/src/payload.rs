use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::TransferError;

/// An in-memory file staged for upload.
///
/// The byte buffer lives behind an `Arc`, so chunk tasks slice into the
/// same allocation instead of copying it.
#[derive(Debug, Clone)]
pub struct FilePayload {
    data: Arc<Vec<u8>>,
    file_name: String,
    mime_type: String,
    last_modified: u64,
}

impl FilePayload {
    /// Wraps raw bytes with an explicit name and MIME type.
    pub fn from_bytes(
        file_name: impl Into<String>,
        mime_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            data: Arc::new(data),
            file_name: file_name.into(),
            mime_type: mime_type.into(),
            last_modified: unix_now(),
        }
    }

    /// Reads a file from disk, detecting the MIME type from its extension.
    pub fn from_path(path: &Path) -> Result<Self, TransferError> {
        let data = std::fs::read(path)?;
        let last_modified = std::fs::metadata(path)?
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
            .unwrap_or_else(unix_now);
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unnamed")
            .to_string();
        let mime_type = detect_mime(path)
            .unwrap_or("application/octet-stream")
            .to_string();
        Ok(Self {
            data: Arc::new(data),
            file_name,
            mime_type,
            last_modified,
        })
    }

    /// Overrides the modification timestamp (unix seconds).
    pub fn with_last_modified(mut self, secs: u64) -> Self {
        self.last_modified = secs;
        self
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Shares the underlying buffer without copying.
    pub fn share_bytes(&self) -> Arc<Vec<u8>> {
        Arc::clone(&self.data)
    }

    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    pub fn is_image(&self) -> bool {
        self.mime_type.starts_with("image/")
    }

    /// Identity used for resume lookups.
    pub fn signature(&self) -> FileSignature {
        FileSignature {
            file_name: self.file_name.clone(),
            file_size: self.len(),
            last_modified: self.last_modified,
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Identity of a file's content for resume purposes.
///
/// Two payloads with the same name, size and modification time are assumed
/// to carry the same content. Checksums are deliberately not part of the
/// signature; hashing a large file just to look up a session would cost
/// more than re-sending a chunk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileSignature {
    pub file_name: String,
    pub file_size: u64,
    pub last_modified: u64,
}

impl fmt::Display for FileSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.file_name, self.file_size, self.last_modified
        )
    }
}

/// Maps a file extension to its MIME type.
///
/// Returns `None` for unknown extensions; callers fall back to
/// `application/octet-stream`.
pub fn detect_mime(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());

    match ext.as_deref() {
        Some("png") => Some("image/png"),
        Some("jpg" | "jpeg") => Some("image/jpeg"),
        Some("webp") => Some("image/webp"),
        Some("gif") => Some("image/gif"),
        Some("bmp") => Some("image/bmp"),
        Some("svg") => Some("image/svg+xml"),
        Some("mp4") => Some("video/mp4"),
        Some("webm") => Some("video/webm"),
        Some("mov") => Some("video/quicktime"),
        Some("mkv") => Some("video/x-matroska"),
        Some("mp3") => Some("audio/mpeg"),
        Some("wav") => Some("audio/wav"),
        Some("ogg") => Some("audio/ogg"),
        Some("flac") => Some("audio/flac"),
        Some("pdf") => Some("application/pdf"),
        Some("txt") => Some("text/plain"),
        Some("json") => Some("application/json"),
        Some("zip") => Some("application/zip"),
        _ => None,
    }
}
