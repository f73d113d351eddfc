use serde::{Deserialize, Serialize};

use crate::types::FileKind;

// ---------------------------------------------------------------------------
// Session payloads
// ---------------------------------------------------------------------------

/// Opens (or re-opens) a chunked upload session.
///
/// Idempotent per `file_id`: re-sending the same request returns the
/// existing session, including any chunks the server already stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitSessionRequest {
    pub file_id: String,
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub chunk_size: u64,
    pub total_chunks: u32,
    /// Content identity used for resume lookups, see `FileSignature`.
    pub signature: String,
}

/// Server view of a chunked session.
///
/// Returned by session creation and by the signature status probe. The
/// `acknowledged_chunks` list is the authoritative record of what the
/// server holds; clients resume from it, never from local bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub file_id: String,
    pub file_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mime_type: String,
    pub file_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub acknowledged_chunks: Vec<u32>,
}

// ---------------------------------------------------------------------------
// Chunk payloads
// ---------------------------------------------------------------------------

/// Metadata accompanying one chunk body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkUploadRequest {
    pub file_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Acknowledges one stored chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    pub file_id: String,
    pub chunk_index: u32,
    #[serde(default, skip_serializing_if = "is_zero_u32")]
    pub acknowledged_count: u32,
}

// ---------------------------------------------------------------------------
// Finalize payloads
// ---------------------------------------------------------------------------

/// Asks the server to assemble a fully-transferred file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    pub file_id: String,
    pub file_name: String,
    pub total_chunks: u32,
}

/// Location of an assembled file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub file_url: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,
}

/// Discards a session and any chunks stored under it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortRequest {
    pub file_id: String,
}

// ---------------------------------------------------------------------------
// Direct payloads
// ---------------------------------------------------------------------------

/// Single-shot upload for files below the chunking threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadRequest {
    pub upload_id: String,
    pub file_name: String,
    pub mime_type: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
}

/// Location of a directly-uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectUploadResponse {
    pub url: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}
