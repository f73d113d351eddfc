//! Engine configuration, per-upload options and event types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use stevedore_media::{FileMetadata, ProcessOptions};
use stevedore_protocol::FileKind;
use stevedore_transfer::{DEFAULT_CHUNK_SIZE, ErrorKind, ProgressSample, UploadError};

use crate::retry::RetryPolicy;

/// Engine-wide tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bytes per chunk. The server may renegotiate this per session.
    pub chunk_size: u64,
    /// Payloads above this size take the chunked path (50 MiB).
    pub chunking_threshold: u64,
    /// In-flight chunk cap within a single transfer.
    pub max_concurrent_chunks: usize,
    /// Retry cap per chunk. Per-kind ceilings may lower it further.
    pub max_chunk_retries: u32,
    /// Retry cap for whole-transfer requests (direct upload, finalize).
    pub max_retries: u32,
    /// Parallel uploads in [`upload_many`](crate::UploadOrchestrator::upload_many).
    pub batch_parallelism: usize,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunking_threshold: 50 * 1024 * 1024,
            max_concurrent_chunks: 3,
            max_chunk_retries: 3,
            max_retries: 3,
            batch_parallelism: 3,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-upload options.
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// Overrides MIME-derived kind detection.
    pub kind: Option<FileKind>,
    /// Accepted MIME types. Entries like `image/*` match the whole prefix.
    /// `None` accepts everything.
    pub allowed_mime: Option<Vec<String>>,
    /// Reject payloads larger than this many bytes.
    pub max_size: Option<u64>,
    /// Re-encode oversized images before uploading.
    pub process_images: bool,
    pub process: ProcessOptions,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            kind: None,
            allowed_mime: None,
            max_size: None,
            process_images: true,
            process: ProcessOptions::default(),
        }
    }
}

/// Successful upload result handed back to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    /// Identifier correlating this receipt with the emitted events.
    pub upload_id: String,
    pub file_url: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    /// Processing details, present when the payload was re-encoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<FileMetadata>,
}

/// Progress and lifecycle notifications emitted while uploads run.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Bytes-level progress update.
    Progress {
        upload_id: String,
        sample: ProgressSample,
    },
    /// A retryable failure; the engine sleeps `delay` and tries again.
    Retrying {
        upload_id: String,
        /// Set for chunk retries, `None` for whole-transfer retries.
        chunk_index: Option<u32>,
        attempt: u32,
        delay: Duration,
        kind: ErrorKind,
    },
    /// Upload finished and the file is addressable.
    Completed { upload_id: String, file_url: String },
    /// Upload gave up.
    Failed {
        upload_id: String,
        error: UploadError,
    },
    /// Upload was cancelled by the caller.
    Cancelled { upload_id: String },
}
