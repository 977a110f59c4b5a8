use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::ObjectState;

// ---------------------------------------------------------------------------
// Upload
// ---------------------------------------------------------------------------

/// Authorization to upload the bytes of a single part.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTarget {
    pub url: String,
    /// Extra headers the service requires on the upload request.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    /// Unix time in milliseconds after which the URL is no longer valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

/// Acknowledgement that a part was durably received under its index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartAck {
    pub index: u32,
    pub size: u64,
    pub checksum: String,
}

// ---------------------------------------------------------------------------
// Close
// ---------------------------------------------------------------------------

/// Answer to a close request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum CloseOutcome {
    Accepted,
    Rejected { reason: String },
}

/// Observable state of a remote object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectStatus {
    pub state: ObjectState,
    /// Number of parts the service has committed so far.
    pub committed_parts: u32,
    /// Total content length; only known once the object is closed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

// ---------------------------------------------------------------------------
// Download
// ---------------------------------------------------------------------------

/// Resolved location to read a closed object's content from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadLocation {
    pub url: String,
    /// Total length of the object's content in bytes.
    pub length: u64,
    /// Unix time in milliseconds after which the URL is no longer valid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_ms: Option<u64>,
}

impl DownloadLocation {
    /// Returns `true` if the location has expired at `now_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_some_and(|exp| now_ms >= exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_outcome_tagged_json() {
        let json = serde_json::to_string(&CloseOutcome::Accepted).unwrap();
        assert_eq!(json, r#"{"outcome":"accepted"}"#);

        let rejected: CloseOutcome =
            serde_json::from_str(r#"{"outcome":"rejected","reason":"no parts"}"#).unwrap();
        assert_eq!(
            rejected,
            CloseOutcome::Rejected {
                reason: "no parts".into()
            }
        );
    }

    #[test]
    fn object_status_omits_unknown_size() {
        let status = ObjectStatus {
            state: ObjectState::Open,
            committed_parts: 2,
            size: None,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("committedParts"));
        assert!(!json.contains("size"));
    }

    #[test]
    fn upload_target_defaults() {
        let target: UploadTarget = serde_json::from_str(r#"{"url":"https://x/1"}"#).unwrap();
        assert!(target.headers.is_empty());
        assert!(target.expires_at_ms.is_none());
    }

    #[test]
    fn download_location_expiry() {
        let loc = DownloadLocation {
            url: "https://x/data".into(),
            length: 10,
            expires_at_ms: Some(1_000),
        };
        assert!(!loc.is_expired_at(999));
        assert!(loc.is_expired_at(1_000));

        let forever = DownloadLocation {
            expires_at_ms: None,
            ..loc
        };
        assert!(!forever.is_expired_at(u64::MAX));
    }
}
