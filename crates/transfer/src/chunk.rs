use sha2::{Digest, Sha256};

use crate::DEFAULT_CHUNK_SIZE;

/// A planned byte range within a payload.
///
/// Half-open `[start, end)`. Spans are contiguous and non-overlapping, and
/// only the final span may be shorter than the chunk size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    /// Zero-based position within the plan.
    pub index: u32,
    /// First byte covered by this span.
    pub start: u64,
    /// One past the last byte covered by this span.
    pub end: u64,
}

impl ChunkSpan {
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Slice range into an in-memory payload.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// Number of chunks needed to cover `file_size` bytes.
pub fn chunk_count(file_size: u64, chunk_size: u64) -> u32 {
    file_size.div_ceil(effective_chunk_size(chunk_size)) as u32
}

/// Plans the byte ranges for a file of `file_size` bytes.
///
/// A `chunk_size` of 0 falls back to [`DEFAULT_CHUNK_SIZE`]. An empty file
/// produces an empty plan.
pub fn plan_chunks(file_size: u64, chunk_size: u64) -> Vec<ChunkSpan> {
    let chunk_size = effective_chunk_size(chunk_size);
    let mut spans = Vec::with_capacity(file_size.div_ceil(chunk_size) as usize);
    let mut start = 0u64;
    let mut index = 0u32;
    while start < file_size {
        let end = (start + chunk_size).min(file_size);
        spans.push(ChunkSpan { index, start, end });
        start = end;
        index += 1;
    }
    spans
}

/// `chunk_size` with the zero fallback applied.
pub fn effective_chunk_size(chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

// ---------------------------------------------------------------------------
// Checksums
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// CRC32 of `data`, prefixed so it can never be mistaken for a SHA-256
/// hex digest. Used when the hashing worker is unavailable.
pub fn crc32_digest(data: &[u8]) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    format!("crc32:{:08x}", hasher.finalize())
}
