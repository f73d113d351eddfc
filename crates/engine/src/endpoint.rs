//! Storage endpoint trait and transport-level errors.
//!
//! `StorageEndpoint` is implemented by the application to bridge the
//! engine to an actual transport (HTTP client, WebSocket, test double).

use std::future::Future;
use std::pin::Pin;

use stevedore_protocol::{
    AbortRequest, ChunkAck, ChunkUploadRequest, DirectUploadRequest, DirectUploadResponse,
    FinalizeRequest, FinalizeResponse, InitSessionRequest, SessionSnapshot,
};

/// Boxed future returned by [`StorageEndpoint`] methods.
pub type EndpointFuture<'a, T> =
    Pin<Box<dyn Future<Output = Result<T, EndpointError>> + Send + 'a>>;

/// Abstract connection to the storage backend.
///
/// Using a trait keeps the engine decoupled from transport and testable
/// with mocks. Methods borrow their request payloads for the duration of
/// the returned future, so implementations can serialize in place.
pub trait StorageEndpoint: Send + Sync {
    /// Opens a chunked session, or re-opens the existing one for this
    /// `file_id`. The returned snapshot may already list stored chunks.
    fn init_session<'a>(&'a self, req: &'a InitSessionRequest)
    -> EndpointFuture<'a, SessionSnapshot>;

    /// Looks up an open session by file signature. `None` means the server
    /// holds nothing for this content.
    fn fetch_session<'a>(&'a self, signature: &'a str)
    -> EndpointFuture<'a, Option<SessionSnapshot>>;

    /// Sends one chunk body with its metadata.
    fn upload_chunk<'a>(
        &'a self,
        req: &'a ChunkUploadRequest,
        data: &'a [u8],
    ) -> EndpointFuture<'a, ChunkAck>;

    /// Asks the server to assemble a fully-transferred file.
    fn finalize<'a>(&'a self, req: &'a FinalizeRequest) -> EndpointFuture<'a, FinalizeResponse>;

    /// Discards a session and its stored chunks.
    fn abort<'a>(&'a self, req: &'a AbortRequest) -> EndpointFuture<'a, ()>;

    /// Single-shot upload for payloads below the chunking threshold.
    fn upload_direct<'a>(
        &'a self,
        req: &'a DirectUploadRequest,
        data: &'a [u8],
    ) -> EndpointFuture<'a, DirectUploadResponse>;
}

/// Errors surfaced by a [`StorageEndpoint`] implementation.
///
/// These are transport-shaped; [`classify`](crate::retry::classify) maps
/// them onto the user-facing taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("request timed out")]
    Timeout,

    #[error("network unreachable")]
    Offline,

    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl EndpointError {
    /// Shorthand for HTTP-status failures.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }
}
