//! Concurrent upload of an entire source into an open object.
//!
//! The source is split into parts that a bounded pool of tasks uploads
//! and commits in any order. The first part that fails for good cancels
//! the rest of the upload.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use objxfer_transfer::{ChunkPlanner, ChunkReader, SpeedCalculator, TransferConfig, UploadPart};
use tokio::io::AsyncRead;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::remote::RemoteObjectClient;
use crate::session::FileSession;
use crate::types::{TransferEvent, UploadSource, UploadSummary};
use crate::uploader::PartUploader;

/// Uploads sources into open objects with bounded part concurrency.
pub struct UploadCoordinator {
    client: Arc<dyn RemoteObjectClient>,
    config: TransferConfig,
    events: Option<mpsc::Sender<TransferEvent>>,
    cancel: CancellationToken,
}

impl UploadCoordinator {
    pub fn new(client: Arc<dyn RemoteObjectClient>, config: TransferConfig) -> Self {
        Self {
            client,
            config,
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Sends progress events to `tx`. Events are dropped when the channel is full.
    pub fn with_events(mut self, tx: mpsc::Sender<TransferEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Token that cancels every upload started by this coordinator.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Uploads `source` into the object tracked by `session`.
    ///
    /// Parts get the next free indices of the object, so uploading into an
    /// object that already has parts appends to it. A missing source fails
    /// before any network call.
    pub async fn upload(
        &self,
        session: &Arc<FileSession>,
        source: Option<UploadSource>,
    ) -> Result<UploadSummary, EngineError> {
        let Some(source) = source else {
            return Err(EngineError::Validation("no upload source provided".into()));
        };
        let object = session.id().clone();
        let _guard = session.machine().begin_upload(&object)?;

        let cancel = self.cancel.child_token();
        let total_bytes = match &source {
            UploadSource::Bytes(data) => Some(data.len() as u64),
            UploadSource::Reader(_) => None,
        };
        let worker = Arc::new(PartWorker {
            uploader: PartUploader::new(Arc::clone(&self.client), object.clone(), &self.config),
            session: Arc::clone(session),
            events: self.events.clone(),
            speed: SpeedCalculator::default(),
            transferred: AtomicU64::new(0),
            total_bytes,
            cancel: cancel.clone(),
        });
        let mut pool = PartPool::new(self.config.max_concurrency());

        debug!(object = %object, source = ?source, "upload started");
        let result = match source {
            UploadSource::Bytes(data) => {
                self.upload_bytes(&worker, &mut pool, data, &cancel).await
            }
            UploadSource::Reader(reader) => {
                self.upload_stream(&worker, &mut pool, reader, &cancel)
                    .await
            }
        };
        let result = match result {
            Ok(()) => pool.drain().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                let mut part_indices = pool.committed;
                part_indices.sort_unstable();
                let summary = UploadSummary {
                    object: object.clone(),
                    part_indices,
                    bytes: pool.bytes,
                    committed_total: session.committed_parts(),
                };
                info!(
                    object = %object,
                    parts = summary.part_count(),
                    bytes = summary.bytes,
                    committed_total = summary.committed_total,
                    "upload complete"
                );
                Ok(summary)
            }
            Err(e) => {
                cancel.cancel();
                pool.abort();
                warn!(object = %object, error = %e, "upload failed");
                worker.emit(TransferEvent::Failed {
                    object,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn upload_bytes(
        &self,
        worker: &Arc<PartWorker>,
        pool: &mut PartPool,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let planner = ChunkPlanner::new(data.len() as u64, self.config.chunk_size())?;
        for spec in planner {
            let permit = pool.acquire(cancel).await?;
            // Indices are taken only for dispatched parts, so a failed
            // upload leaves no gap for the next append.
            let index = worker.session.ledger().reserve_index();
            let start = spec.offset as usize;
            let slice = data.slice(start..start + spec.len);
            let part = UploadPart::new(spec, slice).renumbered(index);
            pool.spawn(Arc::clone(worker), part, permit);
        }
        Ok(())
    }

    async fn upload_stream(
        &self,
        worker: &Arc<PartWorker>,
        pool: &mut PartPool,
        reader: Box<dyn AsyncRead + Send + Unpin>,
        cancel: &CancellationToken,
    ) -> Result<(), EngineError> {
        let mut reader = ChunkReader::new(reader, self.config.chunk_size());
        loop {
            // Read only once a slot is free so buffered parts stay bounded.
            let permit = pool.acquire(cancel).await?;
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                next = reader.next_part() => next?,
            };
            let Some(part) = next else {
                break;
            };
            let index = worker.session.ledger().reserve_index();
            pool.spawn(Arc::clone(worker), part.renumbered(index), permit);
        }
        Ok(())
    }
}

/// Shared state of the tasks uploading one source.
struct PartWorker {
    uploader: PartUploader,
    session: Arc<FileSession>,
    events: Option<mpsc::Sender<TransferEvent>>,
    speed: SpeedCalculator,
    transferred: AtomicU64,
    total_bytes: Option<u64>,
    cancel: CancellationToken,
}

impl PartWorker {
    async fn run(&self, part: UploadPart) -> Result<(u32, u64), EngineError> {
        let index = part.index();
        let size = part.data.len() as u64;
        let ledger = self.session.ledger();
        ledger.register(&part);
        ledger.mark_in_flight(index);

        if let Err(e) = self.uploader.upload(&part, &self.cancel).await {
            ledger.mark_failed(index);
            return Err(e);
        }
        ledger.mark_committed(index);

        self.speed.add_sample(size);
        let transferred = self.transferred.fetch_add(size, Ordering::Relaxed) + size;
        let object = self.session.id().clone();
        self.emit(TransferEvent::PartCommitted {
            object: object.clone(),
            index,
            size,
        });
        self.emit(TransferEvent::Progress {
            object,
            transferred_bytes: transferred,
            total_bytes: self.total_bytes,
            bytes_per_second: self.speed.bytes_per_second(),
        });
        Ok((index, size))
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}

/// Bounded set of in-flight part tasks.
struct PartPool {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Result<(u32, u64), EngineError>>,
    committed: Vec<u32>,
    bytes: u64,
}

impl PartPool {
    fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            tasks: JoinSet::new(),
            committed: Vec::new(),
            bytes: 0,
        }
    }

    /// Waits for a free slot, collecting finished tasks meanwhile so a
    /// failure surfaces without waiting for the rest.
    async fn acquire(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<OwnedSemaphorePermit, EngineError> {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                Some(done) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    self.record(done)?;
                }
                permit = Arc::clone(&self.semaphore).acquire_owned() => {
                    return permit.map_err(|_| EngineError::Worker("part pool closed".into()));
                }
            }
        }
    }

    fn spawn(&mut self, worker: Arc<PartWorker>, part: UploadPart, permit: OwnedSemaphorePermit) {
        self.tasks.spawn(async move {
            let result = worker.run(part).await;
            drop(permit);
            result
        });
    }

    async fn drain(&mut self) -> Result<(), EngineError> {
        while let Some(done) = self.tasks.join_next().await {
            self.record(done)?;
        }
        Ok(())
    }

    fn record(
        &mut self,
        done: Result<Result<(u32, u64), EngineError>, JoinError>,
    ) -> Result<(), EngineError> {
        let (index, size) = done.map_err(|e| EngineError::Worker(e.to_string()))??;
        self.committed.push(index);
        self.bytes += size;
        Ok(())
    }

    fn abort(&mut self) {
        self.tasks.abort_all();
    }
}
