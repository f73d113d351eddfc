//! Backoff schedule and transport error classification.

use std::time::Duration;

use stevedore_transfer::{ErrorKind, UploadError};

use crate::endpoint::EndpointError;

/// Exponential backoff schedule for retryable failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling for the exponential part of the delay.
    pub max_delay: Duration,
    /// Upper bound of the random spread added on top.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff for a given attempt (1-based) without jitter:
    /// `base_delay * 2^(attempt-1)`, capped at `max_delay`.
    pub fn deterministic_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.base_delay.as_secs_f64() * 2f64.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Backoff with up to `jitter` of spread so parallel clients do not
    /// retry in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.deterministic_delay(attempt);
        // Spread fraction from the clock's nanosecond field, [0.0, 1.0).
        let frac = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64;
        base + Duration::from_secs_f64(self.jitter.as_secs_f64() * frac)
    }

    /// Decides what a retry loop does with `err` after `attempt` failed
    /// tries, under the engine's retry cap.
    pub fn verdict(&self, err: UploadError, attempt: u32, cap: u32) -> Verdict {
        if err.is_cancelled() {
            return Verdict::GiveUp(err);
        }
        let budget = retry_budget(&err, cap);
        if attempt > budget {
            return Verdict::GiveUp(if budget == 0 {
                err
            } else {
                UploadError::retries_exhausted(attempt, &err)
            });
        }
        Verdict::Retry {
            delay: self.delay_for_attempt(attempt),
            err,
        }
    }
}

/// Outcome of [`RetryPolicy::verdict`].
#[derive(Debug)]
pub enum Verdict {
    /// Stop and surface this error. Exhausted budgets come back wrapped
    /// as [`ErrorKind::MaxRetriesExceeded`]; non-retryable errors come
    /// back unchanged.
    GiveUp(UploadError),
    /// Sleep `delay`, then try again. `err` is the failure being retried.
    Retry { delay: Duration, err: UploadError },
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Maps a transport failure onto the upload error taxonomy.
pub fn classify(err: &EndpointError) -> UploadError {
    match err {
        EndpointError::Timeout => UploadError::new(ErrorKind::Timeout, "request timed out"),
        EndpointError::Offline => UploadError::new(ErrorKind::NetworkError, "network unreachable"),
        EndpointError::ConnectionReset(detail) => {
            UploadError::new(ErrorKind::ConnectionLost, "connection lost").with_details(detail)
        }
        EndpointError::Cancelled => UploadError::cancelled(),
        EndpointError::Io(e) => UploadError::new(ErrorKind::NetworkError, "transport I/O failure")
            .with_details(e.to_string()),
        EndpointError::Json(e) => {
            UploadError::new(ErrorKind::UnknownError, "malformed server response")
                .with_details(e.to_string())
        }
        EndpointError::Protocol(detail) => {
            UploadError::new(ErrorKind::UnknownError, "protocol violation").with_details(detail)
        }
        EndpointError::Http { status, message } => classify_http(*status, message),
    }
}

fn classify_http(status: u16, message: &str) -> UploadError {
    let kind = match status {
        400 => ErrorKind::CorruptedFile,
        401 | 403 => ErrorKind::PermissionDenied,
        408 => ErrorKind::Timeout,
        413 => ErrorKind::FileTooLarge,
        415 => ErrorKind::InvalidFileType,
        // 422 carries a scanner verdict in the message body.
        422 if message.to_ascii_lowercase().contains("virus") => ErrorKind::VirusDetected,
        422 => ErrorKind::ContentRejected,
        429 => ErrorKind::QuotaExceeded,
        507 => ErrorKind::StorageFull,
        500..=599 => ErrorKind::ServerError,
        _ => ErrorKind::UnknownError,
    };
    let text = if message.is_empty() {
        format!("HTTP {status}")
    } else {
        message.to_string()
    };
    UploadError::new(kind, text).with_details(format!("HTTP {status}"))
}

/// Whether `err` is worth retrying at all: the error is flagged retryable
/// and its kind is in the transient set. The two can disagree on errors
/// rebuilt from the wire, so both must hold before a retry is spent.
pub fn is_recoverable(err: &UploadError) -> bool {
    err.retryable && err.kind.retryable()
}

/// Attempts allowed for this error: the kind's own ceiling, capped by the
/// engine configuration. Unrecoverable errors get zero.
pub fn retry_budget(err: &UploadError, cap: u32) -> u32 {
    if !is_recoverable(err) {
        return 0;
    }
    err.max_retries.min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps() {
        let policy = RetryPolicy::default();
        let expected = [1.0, 2.0, 4.0, 8.0, 16.0, 30.0, 30.0, 30.0];
        for (i, &want) in expected.iter().enumerate() {
            let got = policy.deterministic_delay((i + 1) as u32).as_secs_f64();
            assert!(
                (got - want).abs() < 1e-9,
                "attempt {}: {got}s, want {want}s",
                i + 1
            );
        }
    }

    #[test]
    fn backoff_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.deterministic_delay(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn jittered_delay_stays_in_band() {
        let policy = RetryPolicy::default();
        for attempt in 1..=8 {
            let floor = policy.deterministic_delay(attempt).as_secs_f64();
            let ceiling = floor + policy.jitter.as_secs_f64();
            let got = policy.delay_for_attempt(attempt).as_secs_f64();
            assert!(
                got >= floor && got <= ceiling + 1e-9,
                "attempt {attempt}: {got:.3}s not in [{floor:.3}, {ceiling:.3}]"
            );
        }
    }

    #[test]
    fn classify_transport_failures() {
        assert_eq!(classify(&EndpointError::Timeout).kind, ErrorKind::Timeout);
        assert_eq!(
            classify(&EndpointError::Offline).kind,
            ErrorKind::NetworkError
        );
        let reset = classify(&EndpointError::ConnectionReset("peer closed".into()));
        assert_eq!(reset.kind, ErrorKind::ConnectionLost);
        assert_eq!(reset.details.as_deref(), Some("peer closed"));
        assert!(classify(&EndpointError::Cancelled).is_cancelled());
    }

    #[test]
    fn classify_io_and_protocol() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        assert_eq!(
            classify(&EndpointError::Io(io)).kind,
            ErrorKind::NetworkError
        );

        let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(
            classify(&EndpointError::Json(json)).kind,
            ErrorKind::UnknownError
        );

        assert_eq!(
            classify(&EndpointError::Protocol("unexpected frame".into())).kind,
            ErrorKind::UnknownError
        );
    }

    #[test]
    fn classify_http_statuses() {
        let cases = [
            (400, ErrorKind::CorruptedFile),
            (401, ErrorKind::PermissionDenied),
            (403, ErrorKind::PermissionDenied),
            (408, ErrorKind::Timeout),
            (413, ErrorKind::FileTooLarge),
            (415, ErrorKind::InvalidFileType),
            (429, ErrorKind::QuotaExceeded),
            (500, ErrorKind::ServerError),
            (503, ErrorKind::ServerError),
            (507, ErrorKind::StorageFull),
            (418, ErrorKind::UnknownError),
        ];
        for (status, kind) in cases {
            let err = classify(&EndpointError::http(status, "nope"));
            assert_eq!(err.kind, kind, "status {status}");
            assert_eq!(err.details.as_deref(), Some(format!("HTTP {status}").as_str()));
        }
    }

    #[test]
    fn classify_422_reads_scanner_verdict() {
        let err = classify(&EndpointError::http(422, "Virus signature matched"));
        assert_eq!(err.kind, ErrorKind::VirusDetected);

        let err = classify(&EndpointError::http(422, "content not allowed"));
        assert_eq!(err.kind, ErrorKind::ContentRejected);
    }

    #[test]
    fn classify_http_empty_message_gets_status_text() {
        let err = classify(&EndpointError::http(500, ""));
        assert_eq!(err.message, "HTTP 500");
    }

    #[test]
    fn classified_server_error_keeps_retry_fields() {
        let err = classify(&EndpointError::http(500, "boom"));
        assert!(err.retryable);
        assert_eq!(err.max_retries, 5);
    }

    #[test]
    fn recoverable_needs_flag_and_kind_agreement() {
        assert!(is_recoverable(&UploadError::new(ErrorKind::Timeout, "x")));
        assert!(!is_recoverable(&UploadError::new(ErrorKind::EmptyFile, "x")));

        // A wire-decoded error may carry a flag its kind does not back up.
        let mut conflicted = UploadError::new(ErrorKind::VirusDetected, "x");
        conflicted.retryable = true;
        assert!(!is_recoverable(&conflicted));

        let mut pinned = UploadError::new(ErrorKind::Timeout, "x");
        pinned.retryable = false;
        assert!(!is_recoverable(&pinned));
    }

    #[test]
    fn retry_budget_caps_at_config() {
        let network = UploadError::new(ErrorKind::NetworkError, "x");
        assert_eq!(retry_budget(&network, 3), 3);

        let server = UploadError::new(ErrorKind::ServerError, "x");
        assert_eq!(retry_budget(&server, 8), 5);

        let fatal = UploadError::new(ErrorKind::VirusDetected, "x");
        assert_eq!(retry_budget(&fatal, 3), 0);
    }

    #[test]
    fn verdict_retries_within_budget() {
        let policy = RetryPolicy {
            jitter: Duration::ZERO,
            ..RetryPolicy::default()
        };
        let err = UploadError::new(ErrorKind::Timeout, "slow");
        match policy.verdict(err, 2, 3) {
            Verdict::Retry { delay, err } => {
                assert_eq!(delay, Duration::from_secs(2));
                assert_eq!(err.kind, ErrorKind::Timeout);
            }
            Verdict::GiveUp(err) => panic!("gave up early: {err}"),
        }
    }

    #[test]
    fn verdict_wraps_exhausted_budget() {
        let policy = RetryPolicy::default();
        let err = UploadError::new(ErrorKind::Timeout, "slow");
        match policy.verdict(err, 4, 3) {
            Verdict::GiveUp(err) => {
                assert_eq!(err.kind, ErrorKind::MaxRetriesExceeded);
                assert_eq!(err.details.as_deref(), Some("TIMEOUT"));
            }
            Verdict::Retry { .. } => panic!("should have given up"),
        }
    }

    #[test]
    fn verdict_passes_non_retryable_through() {
        let policy = RetryPolicy::default();
        let err = UploadError::new(ErrorKind::PermissionDenied, "no");
        match policy.verdict(err, 1, 3) {
            Verdict::GiveUp(err) => assert_eq!(err.kind, ErrorKind::PermissionDenied),
            Verdict::Retry { .. } => panic!("retried a fatal error"),
        }
    }

    #[test]
    fn verdict_never_retries_cancellation() {
        let policy = RetryPolicy::default();
        match policy.verdict(UploadError::cancelled(), 1, 3) {
            Verdict::GiveUp(err) => assert!(err.is_cancelled()),
            Verdict::Retry { .. } => panic!("retried a cancellation"),
        }
    }
}
