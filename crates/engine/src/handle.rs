//! Typed handles for file objects.
//!
//! An [`OpenFile`] accepts parts and can be closed. Closing yields a
//! [`ClosedFile`], the only handle that can read content, so reading an
//! object that is still open cannot be expressed through these handles.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::BoxStream;
use objxfer_protocol::{ByteRange, ContainerId, ObjectId, ObjectState, RemoteFileObject};
use objxfer_transfer::TransferConfig;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::close::CloseState;
use crate::context::TransferContext;
use crate::coordinator::UploadCoordinator;
use crate::download::DownloadEngine;
use crate::error::{EngineError, TransferTarget};
use crate::remote::RemoteObjectClient;
use crate::retry::{timed, with_retry};
use crate::session::FileSession;
use crate::types::{TransferEvent, UploadSource, UploadSummary};

async fn fetch_status(
    client: &dyn RemoteObjectClient,
    config: &TransferConfig,
    object: &ObjectId,
) -> Result<objxfer_protocol::ObjectStatus, EngineError> {
    let timeout = config.request_timeout();
    with_retry(config.retry(), &CancellationToken::new(), "poll state", move |_| {
        timed(timeout, client.poll_state(object))
    })
    .await
    .map_err(|e| e.into_engine(object, TransferTarget::Object))
}

/// Handle to an object that is still accepting parts.
pub struct OpenFile {
    session: Arc<FileSession>,
    client: Arc<dyn RemoteObjectClient>,
    config: TransferConfig,
    uploads: UploadCoordinator,
    events: Option<mpsc::Sender<TransferEvent>>,
}

impl OpenFile {
    /// Attaches to `object`, asking the service for its current state.
    ///
    /// Fails with a state error unless the object is open. Parts already
    /// committed are kept; new uploads continue after them.
    pub async fn attach(
        client: Arc<dyn RemoteObjectClient>,
        config: TransferConfig,
        object: RemoteFileObject,
    ) -> Result<Self, EngineError> {
        let status = fetch_status(client.as_ref(), &config, &object.id).await?;
        if status.state != ObjectState::Open {
            return Err(EngineError::state(
                &object.id,
                format!("expected an open object, found {}", status.state),
            ));
        }
        let object = RemoteFileObject {
            state: status.state,
            ..object
        };
        let session = Arc::new(FileSession::new(&object, status.committed_parts));
        info!(
            object = %object.id,
            container = %object.container,
            committed = status.committed_parts,
            "attached to open object"
        );
        Ok(Self {
            uploads: UploadCoordinator::new(Arc::clone(&client), config.clone()),
            session,
            client,
            config,
            events: None,
        })
    }

    pub fn with_events(mut self, tx: mpsc::Sender<TransferEvent>) -> Self {
        self.uploads = UploadCoordinator::new(Arc::clone(&self.client), self.config.clone())
            .with_events(tx.clone());
        self.events = Some(tx);
        self
    }

    pub fn id(&self) -> &ObjectId {
        self.session.id()
    }

    pub fn container(&self) -> &ContainerId {
        self.session.container()
    }

    pub fn state(&self) -> CloseState {
        self.session.state()
    }

    /// Parts committed so far, including those present before attaching.
    pub fn committed_parts(&self) -> u32 {
        self.session.committed_parts()
    }

    /// Token that cancels uploads and the close wait of this handle.
    pub fn cancel_token(&self) -> CancellationToken {
        self.uploads.cancel_token()
    }

    /// Uploads `source` into the object. `None` is a validation error.
    pub async fn upload(&self, source: Option<UploadSource>) -> Result<UploadSummary, EngineError> {
        self.uploads.upload(&self.session, source).await
    }

    pub async fn upload_bytes(&self, data: impl Into<Bytes>) -> Result<UploadSummary, EngineError> {
        self.upload(Some(UploadSource::from_bytes(data))).await
    }

    pub async fn upload_reader(
        &self,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Result<UploadSummary, EngineError> {
        self.upload(Some(UploadSource::from_reader(reader))).await
    }

    /// Closes the object and waits until the service reports it closed.
    ///
    /// On failure the handle stays usable: more parts can be uploaded and
    /// the close retried.
    pub async fn close_and_wait(&self) -> Result<ClosedFile, EngineError> {
        let object = self.session.id();
        let result = self
            .session
            .machine()
            .close_and_wait(
                self.client.as_ref(),
                object,
                self.session.committed_parts(),
                &self.config,
                &self.cancel_token(),
            )
            .await;

        let status = match result {
            Ok(status) => status,
            Err(e) => {
                self.emit(TransferEvent::Failed {
                    object: object.clone(),
                    error: e.to_string(),
                });
                return Err(e);
            }
        };
        let size = match status.size {
            Some(size) => size,
            None => resolve_size(self.client.as_ref(), &self.config, object).await?,
        };
        self.emit(TransferEvent::Closed {
            object: object.clone(),
            size,
        });

        Ok(ClosedFile {
            id: object.clone(),
            container: self.session.container().clone(),
            size,
            parts: status.committed_parts,
            client: Arc::clone(&self.client),
            config: self.config.clone(),
        })
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

async fn resolve_size(
    client: &dyn RemoteObjectClient,
    config: &TransferConfig,
    object: &ObjectId,
) -> Result<u64, EngineError> {
    let timeout = config.request_timeout();
    let location = with_retry(
        config.retry(),
        &CancellationToken::new(),
        "resolve download location",
        move |_| timed(timeout, client.resolve_download_location(object, None)),
    )
    .await
    .map_err(|e| e.into_engine(object, TransferTarget::Object))?;
    Ok(location.length)
}

/// Handle to a closed object whose content can be read.
#[derive(Clone)]
pub struct ClosedFile {
    id: ObjectId,
    container: ContainerId,
    size: u64,
    parts: u32,
    client: Arc<dyn RemoteObjectClient>,
    config: TransferConfig,
}

impl std::fmt::Debug for ClosedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClosedFile")
            .field("id", &self.id)
            .field("container", &self.container)
            .field("size", &self.size)
            .field("parts", &self.parts)
            .finish()
    }
}

impl ClosedFile {
    /// Attaches to `object`, which the service must report as closed.
    pub async fn attach(
        client: Arc<dyn RemoteObjectClient>,
        config: TransferConfig,
        object: RemoteFileObject,
    ) -> Result<Self, EngineError> {
        let status = fetch_status(client.as_ref(), &config, &object.id).await?;
        if status.state != ObjectState::Closed {
            return Err(EngineError::state(
                &object.id,
                format!(
                    "object is {}; content is only served once closed",
                    status.state
                ),
            ));
        }
        let size = match status.size {
            Some(size) => size,
            None => resolve_size(client.as_ref(), &config, &object.id).await?,
        };
        Ok(Self {
            id: object.id,
            container: object.container,
            size,
            parts: status.committed_parts,
            client,
            config,
        })
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn container(&self) -> &ContainerId {
        &self.container
    }

    /// Content length in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn part_count(&self) -> u32 {
        self.parts
    }

    /// New download engine for this object.
    pub fn downloader(&self) -> DownloadEngine {
        DownloadEngine::new(
            Arc::clone(&self.client),
            &self.config,
            self.id.clone(),
            self.size,
        )
    }

    /// Downloads the whole content. Every call fetches it again.
    pub async fn download_bytes(&self) -> Result<Bytes, EngineError> {
        self.downloader().read_all().await
    }

    /// Streams the content in order.
    pub fn download_stream(&self) -> BoxStream<'static, Result<Bytes, EngineError>> {
        self.downloader().stream()
    }

    pub async fn read_range(&self, range: ByteRange) -> Result<Bytes, EngineError> {
        self.downloader().read_range(range).await
    }

    pub async fn download_to_writer<W>(&self, writer: &mut W) -> Result<u64, EngineError>
    where
        W: AsyncWrite + Unpin,
    {
        self.downloader().copy_to(writer).await
    }

    /// Writes the content to `relative` under the context's base directory,
    /// creating parent directories as needed.
    pub async fn download_to_path(
        &self,
        ctx: &TransferContext,
        relative: &str,
    ) -> Result<PathBuf, EngineError> {
        let path = ctx.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&path).await?;
        let written = self.download_to_writer(&mut file).await?;
        info!(object = %self.id, path = %path.display(), bytes = written, "content written");
        Ok(path)
    }
}
