use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_DOWNLOAD_REQUEST, TransferError,
};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const DEFAULT_CLOSE_POLL_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(600);

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Exponential backoff policy for retrying transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = try once).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_BACKOFF,
            max_delay: DEFAULT_MAX_BACKOFF,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    /// Total attempts allowed, including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculates the delay before retry number `retry` (1-based),
    /// with ±25% jitter so concurrent parts do not retry in lockstep.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / u32::MAX as f64)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        Duration::from_secs_f64((capped + jitter * offset).max(0.0))
    }
}

// ---------------------------------------------------------------------------
// TransferSettings (draft)
// ---------------------------------------------------------------------------

/// Unvalidated transfer settings, as read from a config file or assembled
/// in code. Unset fields take their defaults in [`build`](Self::build).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransferSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_backoff_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_backoff_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_factor: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_poll_interval_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_download_request: Option<usize>,
}

impl TransferSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = Some(bytes);
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = Some(n);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    pub fn backoff(mut self, initial: Duration, max: Duration, factor: f64) -> Self {
        self.initial_backoff_ms = Some(initial.as_millis() as u64);
        self.max_backoff_ms = Some(max.as_millis() as u64);
        self.backoff_factor = Some(factor);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn close_polling(mut self, interval: Duration, timeout: Duration) -> Self {
        self.close_poll_interval_ms = Some(interval.as_millis() as u64);
        self.close_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn max_download_request(mut self, bytes: usize) -> Self {
        self.max_download_request = Some(bytes);
        self
    }

    /// Validates the settings and produces an immutable [`TransferConfig`].
    pub fn build(&self) -> Result<TransferConfig, TransferError> {
        let chunk_size = self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size == 0 {
            return Err(invalid("chunk size must be greater than zero"));
        }

        let max_concurrency = self.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY);
        if max_concurrency == 0 {
            return Err(invalid("concurrency limit must be at least 1"));
        }

        let max_download_request = self
            .max_download_request
            .unwrap_or(DEFAULT_MAX_DOWNLOAD_REQUEST);
        if max_download_request == 0 {
            return Err(invalid("max download request size must be greater than zero"));
        }

        let backoff_factor = self.backoff_factor.unwrap_or(DEFAULT_BACKOFF_FACTOR);
        if !backoff_factor.is_finite() || backoff_factor < 1.0 {
            return Err(invalid("backoff factor must be a finite number >= 1.0"));
        }

        let initial_delay = ms_or(self.initial_backoff_ms, DEFAULT_INITIAL_BACKOFF);
        let max_delay = ms_or(self.max_backoff_ms, DEFAULT_MAX_BACKOFF);
        if max_delay < initial_delay {
            return Err(invalid("max backoff must not be below initial backoff"));
        }

        let request_timeout = ms_or(self.request_timeout_ms, DEFAULT_REQUEST_TIMEOUT);
        let close_poll_interval = ms_or(self.close_poll_interval_ms, DEFAULT_CLOSE_POLL_INTERVAL);
        let close_timeout = ms_or(self.close_timeout_ms, DEFAULT_CLOSE_TIMEOUT);
        if request_timeout.is_zero() || close_poll_interval.is_zero() || close_timeout.is_zero() {
            return Err(invalid("timeouts and poll interval must be non-zero"));
        }

        Ok(TransferConfig {
            chunk_size,
            max_concurrency,
            retry: RetryPolicy {
                max_retries: self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
                initial_delay,
                max_delay,
                backoff_factor,
            },
            request_timeout,
            close_poll_interval,
            close_timeout,
            max_download_request,
        })
    }
}

fn ms_or(ms: Option<u64>, default: Duration) -> Duration {
    ms.map(Duration::from_millis).unwrap_or(default)
}

fn invalid(msg: &str) -> TransferError {
    TransferError::InvalidConfig(msg.into())
}

// ---------------------------------------------------------------------------
// TransferConfig
// ---------------------------------------------------------------------------

/// Validated, immutable transfer configuration.
///
/// Passed explicitly to every component that needs it; there is no global
/// configuration state.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferConfig {
    chunk_size: usize,
    max_concurrency: usize,
    retry: RetryPolicy,
    request_timeout: Duration,
    close_poll_interval: Duration,
    close_timeout: Duration,
    max_download_request: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            close_poll_interval: DEFAULT_CLOSE_POLL_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            max_download_request: DEFAULT_MAX_DOWNLOAD_REQUEST,
        }
    }
}

impl TransferConfig {
    /// Starts a new settings draft.
    pub fn builder() -> TransferSettings {
        TransferSettings::default()
    }

    /// Loads settings from a JSON file and validates them.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, TransferError> {
        let settings = match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str::<TransferSettings>(&data)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => TransferSettings::default(),
            Err(e) => return Err(e.into()),
        };
        settings.build()
    }

    /// Maximum length of one upload part in bytes.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Maximum number of parts or ranges in flight at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Timeout for each individual network operation.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Delay between state polls while waiting for an object to close.
    pub fn close_poll_interval(&self) -> Duration {
        self.close_poll_interval
    }

    /// Overall limit on waiting for an object to close.
    pub fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Maximum length of a single download range request.
    pub fn max_download_request(&self) -> usize {
        self.max_download_request
    }
}
