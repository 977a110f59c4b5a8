//! Data types for upload sources, results and progress events.

use std::fmt;

use bytes::Bytes;
use objxfer_protocol::{ByteRange, ObjectId};
use tokio::io::AsyncRead;

use crate::context::TransferContext;
use crate::error::EngineError;

/// Bytes to upload into an open object.
pub enum UploadSource {
    /// In-memory buffer; parts are zero-copy slices of it.
    Bytes(Bytes),
    /// Readable stream consumed in chunk-size reads.
    Reader(Box<dyn AsyncRead + Send + Unpin>),
}

impl UploadSource {
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Bytes(data.into())
    }

    pub fn from_reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self::Reader(Box::new(reader))
    }

    /// Opens the local file `relative` (resolved against `ctx`) as a stream.
    pub async fn from_path(ctx: &TransferContext, relative: &str) -> Result<Self, EngineError> {
        let path = ctx.resolve(relative)?;
        let file = tokio::fs::File::open(&path).await?;
        Ok(Self::from_reader(file))
    }
}

impl fmt::Debug for UploadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<Bytes> for UploadSource {
    fn from(data: Bytes) -> Self {
        Self::Bytes(data)
    }
}

impl From<Vec<u8>> for UploadSource {
    fn from(data: Vec<u8>) -> Self {
        Self::Bytes(data.into())
    }
}

/// Result of one upload call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSummary {
    pub object: ObjectId,
    /// Indices committed by this call, ascending.
    pub part_indices: Vec<u32>,
    /// Bytes committed by this call.
    pub bytes: u64,
    /// Committed parts on the object after this call.
    pub committed_total: u32,
}

impl UploadSummary {
    pub fn part_count(&self) -> u32 {
        self.part_indices.len() as u32
    }
}

/// Progress event emitted while transferring.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A part was committed by the service.
    PartCommitted {
        object: ObjectId,
        index: u32,
        size: u64,
    },
    /// Upload progress update.
    Progress {
        object: ObjectId,
        transferred_bytes: u64,
        /// Total bytes of the upload, unknown for streams.
        total_bytes: Option<u64>,
        bytes_per_second: f64,
    },
    /// A byte range was fetched from a closed object.
    RangeFetched { object: ObjectId, range: ByteRange },
    /// The object reached the closed state.
    Closed { object: ObjectId, size: u64 },
    /// An upload, close or download failed.
    Failed { object: ObjectId, error: String },
}
