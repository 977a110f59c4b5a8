use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of a remote file object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Reference to the container (project) that owns an object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(String);

impl ContainerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContainerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle state of a remote file object as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectState {
    Open,
    Closing,
    Closed,
}

impl fmt::Display for ObjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A remote file object as seen by the transfer engine.
///
/// The container is fixed at creation time; the engine only reads and
/// advances `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileObject {
    pub id: ObjectId,
    pub container: ContainerId,
    pub state: ObjectState,
}

/// Half-open byte range `[start, end)` within an object's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Creates a range; `end` is clamped so it is never below `start`.
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Range of `len` bytes starting at `start`.
    pub fn with_len(start: u64, len: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(len),
        }
    }

    /// Length in bytes; an inverted range is empty.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Returns `true` if `start` is after `end`, which only a range built
    /// from its fields directly can be.
    pub fn is_inverted(&self) -> bool {
        self.start > self.end
    }

    /// Returns `true` if the range is well formed and lies entirely
    /// within `[0, total)`.
    pub fn fits_within(&self, total: u64) -> bool {
        !self.is_inverted() && self.end <= total
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_state_wire_names() {
        assert_eq!(serde_json::to_string(&ObjectState::Open).unwrap(), r#""open""#);
        assert_eq!(
            serde_json::to_string(&ObjectState::Closing).unwrap(),
            r#""closing""#
        );
        let parsed: ObjectState = serde_json::from_str(r#""closed""#).unwrap();
        assert_eq!(parsed, ObjectState::Closed);
    }

    #[test]
    fn remote_file_object_field_names() {
        let json = r#"{"id":"file-1","container":"project-9","state":"open"}"#;
        let obj: RemoteFileObject = serde_json::from_str(json).unwrap();
        assert_eq!(obj.id.as_str(), "file-1");
        assert_eq!(obj.container.as_str(), "project-9");
        assert_eq!(obj.state, ObjectState::Open);
    }

    #[test]
    fn object_id_is_transparent() {
        let id = ObjectId::new("file-abc");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""file-abc""#);
        assert_eq!(id.to_string(), "file-abc");
    }

    #[test]
    fn byte_range_len_and_display() {
        let r = ByteRange::with_len(10, 5);
        assert_eq!(r.len(), 5);
        assert_eq!(r.end, 15);
        assert_eq!(r.to_string(), "10-15");
        assert!(!r.is_empty());
        assert!(r.fits_within(15));
        assert!(!r.fits_within(14));
    }

    #[test]
    fn byte_range_new_clamps_end() {
        let r = ByteRange::new(8, 3);
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
    }

    #[test]
    fn byte_range_built_inverted_is_empty_and_never_fits() {
        let r = ByteRange { start: 9, end: 3 };
        assert!(r.is_inverted());
        assert!(r.is_empty());
        assert_eq!(r.len(), 0);
        assert!(!r.fits_within(10));
        assert!(!ByteRange::new(9, 3).is_inverted());
    }
}
