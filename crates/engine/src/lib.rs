//! Resumable chunked upload engine.
//!
//! This crate implements the client-side upload flow: validate, analyze,
//! process, then transfer either directly or in resumable chunks. It is a
//! library crate with no HTTP dependency; callers provide a
//! `StorageEndpoint` implementation that bridges to the actual transport.
//!
//! # Pipeline
//!
//! 1. **Validate**: reject empty, misnamed, oversized or disallowed payloads
//! 2. **Analyze**: probe the payload and collect handling recommendations
//! 3. **Process**: re-encode oversized images client-side
//! 4. **Transfer**: direct for small payloads, resumable sessions for large ones
//! 5. **Finalize**: assemble chunks server-side and report the file URL

pub mod chunked;
pub mod endpoint;
pub mod limiter;
pub mod orchestrator;
pub mod retry;
pub mod types;

// Re-export primary types for convenience.
pub use chunked::ChunkedUploadEngine;
pub use endpoint::{EndpointError, EndpointFuture, StorageEndpoint};
pub use limiter::{ConcurrencyLimiter, LimiterPermit};
pub use orchestrator::UploadOrchestrator;
pub use retry::{RetryPolicy, Verdict, classify, is_recoverable, retry_budget};
pub use types::{EngineConfig, TransferEvent, UploadOptions, UploadReceipt};
