//! Transfer engine for remote file objects.
//!
//! Files are written as independently committed parts into an open object,
//! the object is closed, and the closed object is read back in ranges.
//!
//! ```text
//! OpenFile::attach ─► upload (parts in parallel) ─► close_and_wait ─► ClosedFile
//!                                                                       │
//!                                  download_bytes / stream / read_range ◄┘
//! ```

pub mod close;
pub mod context;
pub mod coordinator;
pub mod download;
pub mod error;
pub mod handle;
pub mod memory;
pub mod remote;
mod retry;
pub mod session;
pub mod types;
pub mod uploader;

pub use close::{CloseState, CloseStateMachine, UploadGuard};
pub use context::TransferContext;
pub use coordinator::UploadCoordinator;
pub use download::DownloadEngine;
pub use error::{EngineError, ErrorKind, RemoteError, TransferTarget};
pub use handle::{ClosedFile, OpenFile};
pub use memory::{CallCounts, Fault, MemoryObjectStore};
pub use remote::{RemoteFuture, RemoteObjectClient};
pub use session::FileSession;
pub use types::{TransferEvent, UploadSource, UploadSummary};
pub use uploader::PartUploader;
