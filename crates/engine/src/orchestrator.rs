//! Upload orchestration: validation, analysis, processing and routing.
//!
//! Coordinates the full pipeline for one or many payloads, aggregates
//! progress events, and supports per-upload cancellation.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use stevedore_media::{AnalyzerConfig, Recommendation, analyze, process_image};
use stevedore_protocol::{DirectUploadRequest, FileKind};
use stevedore_transfer::{
    ErrorKind, FilePayload, ProgressSample, SessionStore, UploadError, validate_file_name,
};

use crate::chunked::ChunkedUploadEngine;
use crate::endpoint::StorageEndpoint;
use crate::limiter::ConcurrencyLimiter;
use crate::retry::{Verdict, classify};
use crate::types::{EngineConfig, TransferEvent, UploadOptions, UploadReceipt};

/// Front door for uploads.
///
/// Validates and analyzes payloads, re-encodes oversized images, routes
/// between the direct and chunked paths, and retries whole transfers
/// within the configured budget.
pub struct UploadOrchestrator {
    endpoint: Arc<dyn StorageEndpoint>,
    config: EngineConfig,
    analyzer: AnalyzerConfig,
    chunked: ChunkedUploadEngine,
    events_tx: mpsc::Sender<TransferEvent>,
    events_rx: Option<mpsc::Receiver<TransferEvent>>,
    active: std::sync::Mutex<HashMap<String, CancellationToken>>,
}

impl UploadOrchestrator {
    /// Creates an orchestrator with default configuration.
    pub fn new(endpoint: Arc<dyn StorageEndpoint>, store: Arc<dyn SessionStore>) -> Self {
        Self::with_config(endpoint, store, EngineConfig::default())
    }

    pub fn with_config(
        endpoint: Arc<dyn StorageEndpoint>,
        store: Arc<dyn SessionStore>,
        config: EngineConfig,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(256);
        let chunked = ChunkedUploadEngine::new(
            Arc::clone(&endpoint),
            store,
            config.clone(),
            events_tx.clone(),
        );
        Self {
            endpoint,
            config,
            analyzer: AnalyzerConfig::default(),
            chunked,
            events_tx,
            events_rx: Some(events_rx),
            active: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Overrides the analysis thresholds.
    pub fn with_analyzer(mut self, analyzer: AnalyzerConfig) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.events_rx.take()
    }

    /// Cancels one running upload. Returns whether the id was known.
    pub fn cancel(&self, upload_id: &str) -> bool {
        match self.active.lock().unwrap().get(upload_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancels every running upload.
    pub fn cancel_all(&self) {
        for token in self.active.lock().unwrap().values() {
            token.cancel();
        }
    }

    /// IDs of uploads currently in flight.
    pub fn active_uploads(&self) -> Vec<String> {
        self.active.lock().unwrap().keys().cloned().collect()
    }

    /// Discards any resumable session stored for `payload`, on the server
    /// and locally.
    pub async fn discard_session(&self, payload: &FilePayload) -> Result<(), UploadError> {
        self.chunked.abort_session(payload).await
    }

    /// Runs the full pipeline for one payload.
    ///
    /// Progress and retry events stream while the upload runs; exactly one
    /// terminal event (Completed, Failed or Cancelled) follows. The
    /// upload's id is carried by every event and by the receipt.
    pub async fn upload(
        &self,
        payload: &FilePayload,
        options: &UploadOptions,
    ) -> Result<UploadReceipt, UploadError> {
        let upload_id = Uuid::new_v4().to_string();
        let cancel = CancellationToken::new();
        self.active
            .lock()
            .unwrap()
            .insert(upload_id.clone(), cancel.clone());

        let result = self.run(&upload_id, payload, options, &cancel).await;

        self.active.lock().unwrap().remove(&upload_id);

        match &result {
            Ok(receipt) => {
                info!(
                    upload = %upload_id,
                    file = %receipt.file_name,
                    url = %receipt.file_url,
                    "upload completed"
                );
                let _ = self
                    .events_tx
                    .send(TransferEvent::Completed {
                        upload_id: upload_id.clone(),
                        file_url: receipt.file_url.clone(),
                    })
                    .await;
            }
            Err(err) if err.is_cancelled() => {
                info!(upload = %upload_id, file = %payload.file_name(), "upload cancelled");
                let _ = self
                    .events_tx
                    .send(TransferEvent::Cancelled {
                        upload_id: upload_id.clone(),
                    })
                    .await;
            }
            Err(err) => {
                warn!(upload = %upload_id, file = %payload.file_name(), error = %err, "upload failed");
                let _ = self
                    .events_tx
                    .send(TransferEvent::Failed {
                        upload_id: upload_id.clone(),
                        error: err.clone(),
                    })
                    .await;
            }
        }

        result
    }

    /// Uploads several payloads with bounded parallelism.
    ///
    /// Results come back in input order. One failed upload does not stop
    /// the others.
    pub async fn upload_many(
        &self,
        payloads: &[FilePayload],
        options: &UploadOptions,
    ) -> Vec<Result<UploadReceipt, UploadError>> {
        let limiter = ConcurrencyLimiter::new(self.config.batch_parallelism);
        let uploads = payloads.iter().map(|payload| {
            let limiter = limiter.clone();
            async move {
                let _permit = limiter.acquire().await;
                self.upload(payload, options).await
            }
        });
        futures_util::future::join_all(uploads).await
    }

    async fn run(
        &self,
        upload_id: &str,
        payload: &FilePayload,
        options: &UploadOptions,
        cancel: &CancellationToken,
    ) -> Result<UploadReceipt, UploadError> {
        validate(payload, options)?;

        let kind = options
            .kind
            .unwrap_or_else(|| FileKind::from_mime(payload.mime_type()));

        let analysis = analyze(payload, &self.analyzer);
        debug!(
            file = %payload.file_name(),
            size = analysis.file_size,
            kind = kind.as_str(),
            recommendations = ?analysis.recommendations,
            "payload analyzed"
        );

        // Client-side image processing, with the original as fallback.
        let (payload, metadata) = if options.process_images
            && analysis.recommends(Recommendation::CompressImage)
        {
            match process_image(payload, &options.process).await {
                Ok(processed) => (processed.payload, Some(processed.metadata)),
                Err(err) => {
                    warn!(
                        file = %payload.file_name(),
                        error = %err,
                        "image processing failed, uploading original"
                    );
                    (payload.clone(), None)
                }
            }
        } else {
            (payload.clone(), None)
        };

        if cancel.is_cancelled() {
            return Err(UploadError::cancelled());
        }

        // Route by size. A chunked attempt that turns out too small after
        // processing falls back to the direct path.
        let file_url = if payload.len() > self.config.chunking_threshold {
            match self.chunked_with_retry(upload_id, &payload, cancel).await {
                Ok(url) => url,
                Err(err) if err.kind == ErrorKind::FileTooSmall => {
                    self.direct_with_retry(upload_id, &payload, kind, cancel)
                        .await?
                }
                Err(err) => return Err(err),
            }
        } else {
            self.direct_with_retry(upload_id, &payload, kind, cancel)
                .await?
        };

        Ok(UploadReceipt {
            upload_id: upload_id.to_string(),
            file_url,
            file_name: payload.file_name().to_string(),
            file_size: payload.len(),
            mime_type: payload.mime_type().to_string(),
            metadata,
        })
    }

    /// Chunked transfer with whole-transfer retries. Re-running after a
    /// transient failure resumes the session instead of restarting.
    async fn chunked_with_retry(
        &self,
        upload_id: &str,
        payload: &FilePayload,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match self
                .chunked
                .upload_in_chunks(upload_id, payload, cancel)
                .await
            {
                Ok(response) => return Ok(response.file_url),
                Err(e) => e,
            };
            // Too-small payloads are rerouted by the caller, not retried.
            if err.kind == ErrorKind::FileTooSmall {
                return Err(err);
            }

            match self.config.retry.verdict(err, attempt, self.config.max_retries) {
                Verdict::GiveUp(err) => return Err(err),
                Verdict::Retry { delay, err } => {
                    warn!(
                        upload = %upload_id,
                        attempt,
                        error = %err,
                        "chunked transfer failed, retrying"
                    );
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

    /// Single-shot upload with whole-transfer retries.
    async fn direct_with_retry(
        &self,
        upload_id: &str,
        payload: &FilePayload,
        kind: FileKind,
        cancel: &CancellationToken,
    ) -> Result<String, UploadError> {
        let req = DirectUploadRequest {
            upload_id: upload_id.to_string(),
            file_name: payload.file_name().to_string(),
            mime_type: payload.mime_type().to_string(),
            kind,
        };
        let total = payload.len();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(UploadError::cancelled()),
                r = self.endpoint.upload_direct(&req, payload.bytes()) => r,
            };

            let err = match result {
                Ok(response) => {
                    let sample = ProgressSample::new(total, total);
                    let _ = self
                        .events_tx
                        .send(TransferEvent::Progress {
                            upload_id: upload_id.to_string(),
                            sample,
                        })
                        .await;
                    return Ok(response.url);
                }
                Err(e) => classify(&e),
            };
            match self.config.retry.verdict(err, attempt, self.config.max_retries) {
                Verdict::GiveUp(err) => return Err(err),
                Verdict::Retry { delay, err } => {
                    warn!(
                        upload = %upload_id,
                        attempt,
                        error = %err,
                        "direct upload failed, retrying"
                    );
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
}

/// Rejects payloads the server would refuse anyway: empty files, unsafe
/// names, oversized or disallowed content.
fn validate(payload: &FilePayload, options: &UploadOptions) -> Result<(), UploadError> {
    if payload.is_empty() {
        return Err(UploadError::new(ErrorKind::EmptyFile, "file is empty"));
    }
    if let Err(e) = validate_file_name(payload.file_name()) {
        return Err(UploadError::new(ErrorKind::InvalidFileName, e.to_string()));
    }
    if let Some(max) = options.max_size
        && payload.len() > max
    {
        return Err(UploadError::new(
            ErrorKind::FileTooLarge,
            format!("{} bytes exceeds the {max} byte limit", payload.len()),
        ));
    }
    if let Some(ref allowed) = options.allowed_mime
        && !allowed
            .iter()
            .any(|pattern| mime_matches(pattern, payload.mime_type()))
    {
        return Err(UploadError::new(
            ErrorKind::InvalidFileType,
            format!("{} is not an accepted type", payload.mime_type()),
        ));
    }
    Ok(())
}

/// `image/*` style patterns match the type prefix; anything else must
/// match exactly. Comparison is case-insensitive.
fn mime_matches(pattern: &str, mime: &str) -> bool {
    match pattern.strip_suffix("/*") {
        Some(prefix) => {
            let mime = mime.to_ascii_lowercase();
            mime.starts_with(&format!("{}/", prefix.to_ascii_lowercase()))
        }
        None => pattern.eq_ignore_ascii_case(mime),
    }
}
