//! Data model shared between the transfer engine and the remote object
//! service: object identity and lifecycle state, upload targets, part
//! acknowledgements and download locations.

pub mod messages;
pub mod types;

pub use messages::{CloseOutcome, DownloadLocation, ObjectStatus, PartAck, UploadTarget};
pub use types::{ByteRange, ContainerId, ObjectId, ObjectState, RemoteFileObject};
