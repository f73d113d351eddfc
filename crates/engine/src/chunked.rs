//! Resumable chunked upload engine.
//!
//! Drives one payload through the chunked protocol: resume lookup,
//! session init, parallel chunk transfer, finalize. Progress and retry
//! events are sent via the shared event channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stevedore_protocol::{
    AbortRequest, ChunkAck, ChunkUploadRequest, FinalizeRequest, FinalizeResponse,
    InitSessionRequest, SessionSnapshot,
};
use stevedore_transfer::{
    ChunkSpan, ErrorKind, FilePayload, ProgressSample, SessionStore, SpeedCalculator,
    StoredSession, TransferSession, UploadError, checksum_bytes, chunk_count,
    effective_chunk_size, plan_chunks,
};

use crate::endpoint::StorageEndpoint;
use crate::limiter::ConcurrencyLimiter;
use crate::retry::{RetryPolicy, Verdict, classify};
use crate::types::{EngineConfig, TransferEvent};

/// Engine for payloads above the chunking threshold.
pub struct ChunkedUploadEngine {
    endpoint: Arc<dyn StorageEndpoint>,
    store: Arc<dyn SessionStore>,
    config: EngineConfig,
    events_tx: mpsc::Sender<TransferEvent>,
}

impl ChunkedUploadEngine {
    pub fn new(
        endpoint: Arc<dyn StorageEndpoint>,
        store: Arc<dyn SessionStore>,
        config: EngineConfig,
        events_tx: mpsc::Sender<TransferEvent>,
    ) -> Self {
        Self {
            endpoint,
            store,
            config,
            events_tx,
        }
    }

    /// Uploads `payload` in chunks, resuming a server-side session when one
    /// exists for the payload's signature.
    ///
    /// Payloads at or below twice the configured chunk size are rejected
    /// with [`ErrorKind::FileTooSmall`]; callers route those to the direct
    /// path instead.
    pub async fn upload_in_chunks(
        &self,
        upload_id: &str,
        payload: &FilePayload,
        cancel: &CancellationToken,
    ) -> Result<FinalizeResponse, UploadError> {
        let chunk_size = effective_chunk_size(self.config.chunk_size);
        if payload.len() <= 2 * chunk_size {
            return Err(UploadError::new(
                ErrorKind::FileTooSmall,
                format!(
                    "{} bytes, chunked transfer needs more than {}",
                    payload.len(),
                    2 * chunk_size
                ),
            ));
        }

        let signature = payload.signature().to_string();
        let mut session = self
            .open_session(payload, &signature, chunk_size, cancel)
            .await?;

        info!(
            file = %payload.file_name(),
            file_id = %session.file_id(),
            mime = %session.mime_type(),
            chunks = session.total_chunks(),
            pending = session.pending().len(),
            "chunked upload started"
        );

        let speed = SpeedCalculator::new();
        let total = session.file_size();
        self.emit_progress(upload_id, session.bytes_acknowledged(), total, &speed)
            .await;

        self.transfer_chunks(upload_id, payload, &mut session, cancel, &speed)
            .await?;

        let response = self.finalize(upload_id, &session, cancel).await?;

        // The server assembled the file; the session is gone on both ends.
        self.store.remove(&signature);
        self.emit_progress(upload_id, total, total, &speed).await;

        info!(
            file = %payload.file_name(),
            url = %response.file_url,
            "chunked upload complete"
        );
        Ok(response)
    }

    /// Tells the server to drop any session stored for this payload, then
    /// forgets the local entry. A payload without a stored session is a
    /// no-op.
    pub async fn abort_session(&self, payload: &FilePayload) -> Result<(), UploadError> {
        let signature = payload.signature().to_string();
        let Some(stored) = self.store.load(&signature) else {
            return Ok(());
        };

        let req = AbortRequest {
            file_id: stored.file_id,
        };
        self.endpoint.abort(&req).await.map_err(|e| classify(&e))?;
        self.store.remove(&signature);
        Ok(())
    }

    /// Resumes the server's session for `signature` when it still matches
    /// the payload, otherwise opens a fresh one at `chunk_size`.
    async fn open_session(
        &self,
        payload: &FilePayload,
        signature: &str,
        chunk_size: u64,
        cancel: &CancellationToken,
    ) -> Result<TransferSession, UploadError> {
        match self.fetch_snapshot(signature, cancel).await {
            Ok(Some(snapshot)) if snapshot_matches(payload, &snapshot) => {
                info!(
                    file = %payload.file_name(),
                    acknowledged = snapshot.acknowledged_chunks.len(),
                    total = snapshot.total_chunks,
                    "resuming chunked session"
                );
                let session = TransferSession::from_snapshot(&snapshot);
                self.remember(signature, &session);
                return Ok(session);
            }
            Ok(Some(_)) => {
                // Same signature, different geometry: the content changed.
                debug!(
                    file = %payload.file_name(),
                    "server snapshot does not match payload, starting fresh"
                );
            }
            Ok(None) => {}
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!(error = %e, "session lookup failed, starting fresh");
            }
        }

        // Session creation is idempotent per file_id; reusing a stored id
        // re-opens the earlier session instead of orphaning it.
        let file_id = self
            .store
            .load(signature)
            .map(|s| s.file_id)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let req = InitSessionRequest {
            file_id,
            file_name: payload.file_name().to_string(),
            file_size: payload.len(),
            mime_type: payload.mime_type().to_string(),
            chunk_size,
            total_chunks: chunk_count(payload.len(), chunk_size),
            signature: signature.to_string(),
        };

        let snapshot = tokio::select! {
            _ = cancel.cancelled() => return Err(UploadError::cancelled()),
            result = self.endpoint.init_session(&req) => result.map_err(|e| classify(&e))?,
        };

        // The server may renegotiate the chunk size.
        let chunk_size = if snapshot.chunk_size > 0 {
            snapshot.chunk_size
        } else {
            chunk_size
        };
        let mut session = TransferSession::new(
            req.file_id,
            payload.file_name(),
            payload.mime_type(),
            payload.len(),
            chunk_size,
            chunk_count(payload.len(), chunk_size),
        );
        session.adopt(&snapshot.acknowledged_chunks);

        self.remember(signature, &session);
        Ok(session)
    }

    fn remember(&self, signature: &str, session: &TransferSession) {
        self.store.save(
            signature,
            StoredSession {
                file_id: session.file_id().to_string(),
                chunk_size: session.chunk_size(),
                total_chunks: session.total_chunks(),
            },
        );
    }

    async fn fetch_snapshot(
        &self,
        signature: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<SessionSnapshot>, UploadError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(UploadError::cancelled()),
            result = self.endpoint.fetch_session(signature) => result.map_err(|e| classify(&e)),
        }
    }

    /// Sends every pending chunk, at most `max_concurrent_chunks` in flight.
    ///
    /// On the first exhausted chunk no further chunks are started; chunks
    /// already in flight drain so their acknowledgments still land in the
    /// session. Cancellation aborts in-flight sends immediately.
    async fn transfer_chunks(
        &self,
        upload_id: &str,
        payload: &FilePayload,
        session: &mut TransferSession,
        cancel: &CancellationToken,
        speed: &SpeedCalculator,
    ) -> Result<(), UploadError> {
        let spans = plan_chunks(session.file_size(), session.chunk_size());
        let mut queue = session.pending().into_iter();
        let mut upcoming = queue.next();
        if upcoming.is_none() {
            return Ok(());
        }

        let limiter = ConcurrencyLimiter::new(self.config.max_concurrent_chunks);
        let data = payload.share_bytes();
        let total_bytes = session.file_size();

        let mut tasks: JoinSet<(u32, Result<ChunkAck, UploadError>)> = JoinSet::new();
        let mut failure: Option<UploadError> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tasks.abort_all();
                    return Err(UploadError::cancelled());
                }
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    match joined {
                        Ok((index, Ok(_ack))) => {
                            if session.acknowledge(index) {
                                speed.record(spans[index as usize].len());
                                self.emit_progress(
                                    upload_id,
                                    session.bytes_acknowledged(),
                                    total_bytes,
                                    speed,
                                )
                                .await;
                            }
                        }
                        Ok((index, Err(err))) => {
                            debug!(chunk = index, error = %err, "chunk gave up");
                            if failure.is_none() {
                                failure = Some(err);
                            }
                        }
                        Err(join_err) => {
                            if failure.is_none() {
                                failure = Some(
                                    UploadError::new(
                                        ErrorKind::UnknownError,
                                        "chunk task failed to run",
                                    )
                                    .with_details(join_err.to_string()),
                                );
                            }
                        }
                    }
                }
                permit = limiter.acquire(), if failure.is_none() && upcoming.is_some() => {
                    if let Some(index) = upcoming.take() {
                        let span = spans[index as usize];
                        let task = ChunkTask {
                            endpoint: Arc::clone(&self.endpoint),
                            data: Arc::clone(&data),
                            span,
                            file_id: session.file_id().to_string(),
                            total_chunks: session.total_chunks(),
                            policy: self.config.retry.clone(),
                            retry_cap: self.config.max_chunk_retries,
                            cancel: cancel.clone(),
                            events_tx: self.events_tx.clone(),
                            upload_id: upload_id.to_string(),
                        };
                        tasks.spawn(async move {
                            let _permit = permit;
                            let result = task.run().await;
                            (span.index, result)
                        });
                        upcoming = queue.next();
                    }
                }
            }

            if tasks.is_empty() {
                if let Some(err) = failure.take() {
                    return Err(err);
                }
                if upcoming.is_none() {
                    return Ok(());
                }
            }
        }
    }

    /// Asks the server to assemble the file, retrying transient failures
    /// within the whole-transfer budget.
    async fn finalize(
        &self,
        upload_id: &str,
        session: &TransferSession,
        cancel: &CancellationToken,
    ) -> Result<FinalizeResponse, UploadError> {
        debug_assert!(session.is_complete());

        let req = FinalizeRequest {
            file_id: session.file_id().to_string(),
            file_name: session.file_name().to_string(),
            total_chunks: session.total_chunks(),
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::cancelled()),
                r = self.endpoint.finalize(&req) => r,
            };

            let err = match result {
                Ok(response) => return Ok(response),
                Err(e) => classify(&e),
            };
            match self.config.retry.verdict(err, attempt, self.config.max_retries) {
                Verdict::GiveUp(err) => return Err(err),
                Verdict::Retry { delay, err } => {
                    warn!(file_id = %req.file_id, attempt, error = %err, "finalize failed, retrying");
                    let _ = self
                        .events_tx
                        .send(TransferEvent::Retrying {
                            upload_id: upload_id.to_string(),
                            chunk_index: None,
                            attempt,
                            delay,
                            kind: err.kind,
                        })
                        .await;

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(UploadError::cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn emit_progress(&self, upload_id: &str, loaded: u64, total: u64, speed: &SpeedCalculator) {
        let sample = ProgressSample::new(loaded, total).with_speed(speed.bytes_per_second());
        let _ = self
            .events_tx
            .send(TransferEvent::Progress {
                upload_id: upload_id.to_string(),
                sample,
            })
            .await;
    }
}

/// A resumable snapshot must describe the same bytes the payload holds.
fn snapshot_matches(payload: &FilePayload, snapshot: &SessionSnapshot) -> bool {
    snapshot.file_size == payload.len()
        && snapshot.chunk_size > 0
        && snapshot.total_chunks == chunk_count(payload.len(), snapshot.chunk_size)
}

// ---------------------------------------------------------------------------
// Chunk task
// ---------------------------------------------------------------------------

/// Everything one spawned chunk transfer needs. Avoids threading ten
/// separate parameters through `spawn`.
struct ChunkTask {
    endpoint: Arc<dyn StorageEndpoint>,
    data: Arc<Vec<u8>>,
    span: ChunkSpan,
    file_id: String,
    total_chunks: u32,
    policy: RetryPolicy,
    retry_cap: u32,
    cancel: CancellationToken,
    events_tx: mpsc::Sender<TransferEvent>,
    upload_id: String,
}

impl ChunkTask {
    /// Sends one chunk, retrying transient failures with backoff until the
    /// per-chunk budget runs out.
    async fn run(self) -> Result<ChunkAck, UploadError> {
        let body = &self.data[self.span.range()];
        let req = ChunkUploadRequest {
            file_id: self.file_id.clone(),
            chunk_index: self.span.index,
            total_chunks: self.total_chunks,
            checksum: checksum_bytes(body),
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(UploadError::cancelled()),
                r = self.endpoint.upload_chunk(&req, body) => r,
            };

            let err = match result {
                Ok(ack) => return Ok(ack),
                Err(e) => classify(&e),
            };
            match self.policy.verdict(err, attempt, self.retry_cap) {
                Verdict::GiveUp(err) => return Err(err),
                Verdict::Retry { delay, err } => {
                    warn!(
                        chunk = self.span.index,
                        attempt,
                        error = %err,
                        "chunk failed, retrying"
                    );
                    let _ = self
                        .events_tx
                        .send(TransferEvent::Retrying {
                            upload_id: self.upload_id.clone(),
                            chunk_index: Some(self.span.index),
                            attempt,
                            delay,
                            kind: err.kind,
                        })
                        .await;

                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(UploadError::cancelled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
