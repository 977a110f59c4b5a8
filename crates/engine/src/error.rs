//! Engine error types.

use std::fmt;
use std::time::Duration;

use objxfer_protocol::{ByteRange, ObjectId};
use objxfer_transfer::TransferError;

/// Failure reported by a [`RemoteObjectClient`](crate::RemoteObjectClient).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("download location expired")]
    LocationExpired,

    #[error("checksum mismatch on part {0}")]
    ChecksumMismatch(u32),

    /// The service refused the operation for the object's lifecycle state.
    #[error("lifecycle violation: {0}")]
    Lifecycle(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RemoteError {
    /// Returns `true` for failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::LocationExpired | Self::ChecksumMismatch(_)
        )
    }
}

/// Category of an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input caught before any network call.
    Validation,
    /// Operation invalid for the object's lifecycle state.
    State,
    /// Network or timeout failure that exhausted its retries.
    Transient,
    /// Non-retryable failure reported by the service.
    Permanent,
    /// Local I/O failure.
    Io,
    Cancelled,
}

/// What a failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferTarget {
    Part(u32),
    Range(ByteRange),
    Object,
}

impl fmt::Display for TransferTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Part(index) => write!(f, "part {index}"),
            Self::Range(range) => write!(f, "range {range}"),
            Self::Object => f.write_str("object"),
        }
    }
}

/// Errors produced by the transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{object}: invalid state: {reason}")]
    State { object: ObjectId, reason: String },

    #[error("{object} {target}: failed after {attempts} attempts: {source}")]
    Transient {
        object: ObjectId,
        target: TransferTarget,
        attempts: u32,
        #[source]
        source: RemoteError,
    },

    #[error("{object} {target}: {source}")]
    Permanent {
        object: ObjectId,
        target: TransferTarget,
        #[source]
        source: RemoteError,
    },

    #[error("{object}: not closed after {waited:?}")]
    CloseTimeout { object: ObjectId, waited: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    pub(crate) fn state(object: &ObjectId, reason: impl Into<String>) -> Self {
        Self::State {
            object: object.clone(),
            reason: reason.into(),
        }
    }

    /// Classifies a remote failure that will not be retried any further.
    pub(crate) fn from_remote(
        object: &ObjectId,
        target: TransferTarget,
        attempts: u32,
        source: RemoteError,
    ) -> Self {
        let object = object.clone();
        match source {
            RemoteError::Lifecycle(reason) => Self::State { object, reason },
            source if source.is_retryable() => Self::Transient {
                object,
                target,
                attempts,
                source,
            },
            source => Self::Permanent {
                object,
                target,
                source,
            },
        }
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::State { .. } => ErrorKind::State,
            Self::Transient { .. } | Self::CloseTimeout { .. } => ErrorKind::Transient,
            Self::Permanent { .. } | Self::Worker(_) => ErrorKind::Permanent,
            Self::Io(_) => ErrorKind::Io,
            Self::Transfer(e) => match e {
                TransferError::InvalidConfig(_) | TransferError::InvalidPath(_) => {
                    ErrorKind::Validation
                }
                TransferError::Io(_) => ErrorKind::Io,
                _ => ErrorKind::Permanent,
            },
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Object the error refers to, when known.
    pub fn object(&self) -> Option<&ObjectId> {
        match self {
            Self::State { object, .. }
            | Self::Transient { object, .. }
            | Self::Permanent { object, .. }
            | Self::CloseTimeout { object, .. } => Some(object),
            _ => None,
        }
    }

    /// Part or range the error refers to, when known.
    pub fn target(&self) -> Option<TransferTarget> {
        match self {
            Self::Transient { target, .. } | Self::Permanent { target, .. } => Some(*target),
            Self::CloseTimeout { .. } => Some(TransferTarget::Object),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj() -> ObjectId {
        ObjectId::new("file-1")
    }

    #[test]
    fn retryable_remote_errors() {
        assert!(RemoteError::Network("reset".into()).is_retryable());
        assert!(RemoteError::Timeout.is_retryable());
        assert!(RemoteError::LocationExpired.is_retryable());
        assert!(!RemoteError::Lifecycle("closed".into()).is_retryable());
        assert!(!RemoteError::NotFound("file-1".into()).is_retryable());
        assert!(!RemoteError::PermissionDenied("ro".into()).is_retryable());
    }

    #[test]
    fn lifecycle_becomes_state_error() {
        let err = EngineError::from_remote(
            &obj(),
            TransferTarget::Part(2),
            1,
            RemoteError::Lifecycle("object is closed".into()),
        );
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(err.object(), Some(&obj()));
    }

    #[test]
    fn exhausted_network_error_is_transient_with_part() {
        let err = EngineError::from_remote(
            &obj(),
            TransferTarget::Part(7),
            4,
            RemoteError::Network("connection reset".into()),
        );
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert_eq!(err.target(), Some(TransferTarget::Part(7)));
        let msg = err.to_string();
        assert!(msg.contains("file-1"));
        assert!(msg.contains("part 7"));
        assert!(msg.contains("4 attempts"));
    }

    #[test]
    fn not_found_is_permanent() {
        let range = ByteRange::new(0, 10);
        let err = EngineError::from_remote(
            &obj(),
            TransferTarget::Range(range),
            1,
            RemoteError::NotFound("file-1".into()),
        );
        assert_eq!(err.kind(), ErrorKind::Permanent);
        assert!(err.to_string().contains("range 0-10"));
    }

    #[test]
    fn transfer_error_kinds() {
        let invalid: EngineError = TransferError::InvalidPath("..".into()).into();
        assert_eq!(invalid.kind(), ErrorKind::Validation);
        let assembly: EngineError = TransferError::Assembly("gap".into()).into();
        assert_eq!(assembly.kind(), ErrorKind::Permanent);
    }
}
