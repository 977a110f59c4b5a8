//! Retry loop around remote calls.

use std::future::Future;
use std::time::Duration;

use objxfer_protocol::ObjectId;
use objxfer_transfer::RetryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{EngineError, RemoteError, TransferTarget};

/// Why a retried operation gave up.
#[derive(Debug)]
pub(crate) enum RetryError {
    Cancelled,
    Failed { attempts: u32, error: RemoteError },
}

impl RetryError {
    pub(crate) fn into_engine(self, object: &ObjectId, target: TransferTarget) -> EngineError {
        match self {
            Self::Cancelled => EngineError::Cancelled,
            Self::Failed { attempts, error } => {
                EngineError::from_remote(object, target, attempts, error)
            }
        }
    }
}

/// Runs `fut` with a deadline; an elapsed deadline is a [`RemoteError::Timeout`].
pub(crate) async fn timed<T, F>(timeout: Duration, fut: F) -> Result<T, RemoteError>
where
    F: Future<Output = Result<T, RemoteError>>,
{
    tokio::time::timeout(timeout, fut)
        .await
        .unwrap_or(Err(RemoteError::Timeout))
}

/// Re-resolves allowed per operation after an expired download location,
/// on top of the retry budget.
pub(crate) const MAX_LOCATION_REFRESHES: u32 = 3;

/// Calls `op` until it succeeds, fails with a non-retryable error, or runs
/// out of attempts. `op` receives the 1-based attempt number.
///
/// An expired download location is retried at once with the same attempt
/// number, up to [`MAX_LOCATION_REFRESHES`] times; after that it counts
/// against the budget like any other transient failure.
pub(crate) async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let max_attempts = policy.max_attempts();
    let mut attempt: u32 = 0;
    let mut refreshes: u32 = 0;

    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            result = op(attempt) => result,
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(RemoteError::LocationExpired) if refreshes < MAX_LOCATION_REFRESHES => {
                refreshes += 1;
                attempt -= 1;
                debug!(what, refreshes, "download location expired, resolving again");
                continue;
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => e,
            Err(error) => {
                debug!(what, attempt, error = %error, "giving up");
                return Err(RetryError::Failed {
                    attempts: attempt,
                    error,
                });
            }
        };

        let delay = policy.delay_for_retry(attempt);
        warn!(
            what,
            attempt,
            max_attempts,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
