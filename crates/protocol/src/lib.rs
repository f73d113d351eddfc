pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use messages::{
    AbortRequest, ChunkAck, ChunkUploadRequest, DirectUploadRequest, DirectUploadResponse,
    FinalizeRequest, FinalizeResponse, InitSessionRequest, SessionSnapshot,
};
pub use types::FileKind;
