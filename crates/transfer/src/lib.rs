//! File payloads, chunk planning and transfer session bookkeeping.
//!
//! Pure data layer shared by the upload engine; nothing in here performs
//! network I/O.

mod chunk;
mod error;
mod payload;
mod progress;
mod session;
mod validation;

pub use chunk::{
    ChunkSpan, checksum_bytes, chunk_count, crc32_digest, effective_chunk_size, plan_chunks,
};
pub use error::{ErrorKind, UploadError};
pub use payload::{FilePayload, FileSignature, detect_mime};
pub use progress::{ProgressSample, SpeedCalculator};
pub use session::{MemorySessionStore, SessionStore, StoredSession, TransferSession};
pub use validation::{MAX_FILE_NAME_LEN, validate_file_name};

/// Default chunk size: 1 MiB.
///
/// The server may negotiate a different size via `SessionSnapshot.chunk_size`;
/// planning always follows the negotiated value.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file name: {0}")]
    InvalidName(String),
}
