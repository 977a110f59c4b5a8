//! Interface to the remote object service.
//!
//! The engine never talks HTTP itself. Callers provide an implementation of
//! [`RemoteObjectClient`] on top of their service client; using a trait keeps
//! the transfer logic decoupled from transport and testable with
//! [`MemoryObjectStore`](crate::memory::MemoryObjectStore).

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use objxfer_protocol::{
    ByteRange, CloseOutcome, DownloadLocation, ObjectId, ObjectStatus, PartAck, UploadTarget,
};

use crate::error::RemoteError;

/// Boxed future returned by [`RemoteObjectClient`] methods.
pub type RemoteFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, RemoteError>> + Send + 'a>>;

/// Operations the engine needs from the remote object service.
pub trait RemoteObjectClient: Send + Sync {
    /// Requests an upload slot for part `index` (1-based) of `object`.
    fn request_part_slot<'a>(
        &'a self,
        object: &'a ObjectId,
        index: u32,
    ) -> RemoteFuture<'a, UploadTarget>;

    /// Transmits a part's bytes to a previously issued upload slot.
    fn upload_part<'a>(&'a self, target: &'a UploadTarget, data: Bytes) -> RemoteFuture<'a, ()>;

    /// Confirms that part `index` was received with the given checksum.
    ///
    /// Committing an index that is already committed overwrites it.
    fn commit_part<'a>(
        &'a self,
        object: &'a ObjectId,
        index: u32,
        checksum: &'a str,
    ) -> RemoteFuture<'a, PartAck>;

    /// Asks the service to close `object`.
    fn request_close<'a>(&'a self, object: &'a ObjectId) -> RemoteFuture<'a, CloseOutcome>;

    /// Reports the current lifecycle state of `object`.
    fn poll_state<'a>(&'a self, object: &'a ObjectId) -> RemoteFuture<'a, ObjectStatus>;

    /// Resolves where the content of a closed object can be read from.
    fn resolve_download_location<'a>(
        &'a self,
        object: &'a ObjectId,
        range: Option<ByteRange>,
    ) -> RemoteFuture<'a, DownloadLocation>;

    /// Reads `range` of the content behind `location`.
    fn fetch_range<'a>(
        &'a self,
        location: &'a DownloadLocation,
        range: ByteRange,
    ) -> RemoteFuture<'a, Bytes>;
}
