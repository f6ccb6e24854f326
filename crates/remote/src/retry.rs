//! Retry logic with exponential backoff for remote operations

use crate::config::RetryConfig;
use crate::error::{RemoteError, Result};
use backoff::{Error as BackoffError, ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;
use tracing::{debug, warn};

/// Retry a fallible operation with exponential backoff.
///
/// Only transport-level failures are retried; protocol errors and
/// corrupt payloads fail immediately. The caller's thread sleeps
/// between attempts (the whole remote path is synchronous).
pub fn retry_with_backoff<T>(
    config: &RetryConfig,
    operation_name: &str,
    mut f: impl FnMut() -> Result<T>,
) -> Result<T> {
    let mut attempts = 0usize;
    let outcome = backoff::retry(create_backoff(config), || {
        attempts += 1;
        f().map_err(|err| {
            if !is_retryable(&err) {
                debug!(
                    operation = operation_name,
                    error = %err,
                    "Error is not retryable, failing immediately"
                );
                return BackoffError::permanent(err);
            }
            if attempts >= config.max_attempts {
                warn!(
                    operation = operation_name,
                    attempts,
                    error = %err,
                    "Operation failed after maximum retries"
                );
                return BackoffError::permanent(err);
            }
            warn!(
                operation = operation_name,
                attempts,
                error = %err,
                "Operation failed, retrying"
            );
            BackoffError::transient(err)
        })
    });

    match outcome {
        Ok(value) => {
            if attempts > 1 {
                debug!(
                    operation = operation_name,
                    attempts, "Operation succeeded after retry"
                );
            }
            Ok(value)
        }
        Err(BackoffError::Permanent(err)) | Err(BackoffError::Transient { err, .. }) => Err(err),
    }
}

fn create_backoff(config: &RetryConfig) -> ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(config.initial_backoff_ms))
        .with_max_interval(Duration::from_millis(config.max_backoff_ms))
        .with_multiplier(config.backoff_multiplier)
        // Attempts are bounded by max_attempts, not wall clock.
        .with_max_elapsed_time(None)
        .build()
}

/// Determine if an error is retryable
fn is_retryable(err: &RemoteError) -> bool {
    match err {
        // Transport failures may be transient
        RemoteError::Unreachable { .. } => true,

        // The server answered; asking again will not change the answer
        RemoteError::Protocol { .. } => false,

        // Local I/O during upload/download is retryable; a corrupt
        // payload is not
        RemoteError::Core(core) => matches!(core, recache_core::Error::Io { .. }),
    }
}
