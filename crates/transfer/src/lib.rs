//! Chunked transfer building blocks: part planning, stream chunking,
//! checksums, part bookkeeping and the transfer configuration.

mod chunked;
mod config;
mod progress;
mod types;
mod validation;

pub use chunked::{ChunkPlanner, ChunkReader, PartAssembler, PartPlan, PartSpec, checksum_bytes};
pub use config::{RetryPolicy, TransferConfig, TransferSettings};
pub use progress::SpeedCalculator;
pub use types::{PartLedger, PartRecord, PartStatus, UploadPart};
pub use validation::validate_relative_path;

/// Default chunk size: 5 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Default number of parts or ranges transferred at once.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default upper bound on the size of a single download request: 5 MiB.
pub const DEFAULT_MAX_DOWNLOAD_REQUEST: usize = 5 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("checksum mismatch on part {0}")]
    ChecksumMismatch(u32),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("reassembly failed: {0}")]
    Assembly(String),
}
