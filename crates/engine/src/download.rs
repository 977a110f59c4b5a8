//! Ranged download from closed objects.
//!
//! Content is fetched in ranges of at most `max_download_request` bytes.
//! The download location is resolved lazily and cached; a location the
//! service reports as expired is dropped and resolved again on retry.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt, TryStreamExt};
use objxfer_protocol::{ByteRange, DownloadLocation, ObjectId};
use objxfer_transfer::{ChunkPlanner, PartAssembler, RetryPolicy, TransferConfig};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{EngineError, RemoteError, TransferTarget};
use crate::remote::RemoteObjectClient;
use crate::retry::{timed, with_retry};
use crate::types::TransferEvent;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Cached download location of one object.
#[derive(Default)]
struct LocationCache {
    current: Mutex<Option<DownloadLocation>>,
}

impl LocationCache {
    /// Returns the cached location, resolving a new one when there is none
    /// or the cached one has passed its expiry time.
    async fn get(
        &self,
        client: &dyn RemoteObjectClient,
        object: &ObjectId,
        timeout: Duration,
    ) -> Result<DownloadLocation, RemoteError> {
        let mut current = self.current.lock().await;
        if let Some(location) = current.as_ref().filter(|l| !l.is_expired_at(now_ms())) {
            return Ok(location.clone());
        }
        let location = timed(timeout, client.resolve_download_location(object, None)).await?;
        debug!(object = %object, length = location.length, "download location resolved");
        *current = Some(location.clone());
        Ok(location)
    }

    /// Drops `stale` from the cache unless it was already replaced.
    async fn invalidate(&self, stale: &DownloadLocation) {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|c| c.url == stale.url) {
            *current = None;
        }
    }
}

/// Reads the content of one closed object.
///
/// Cloning is cheap; clones share the cached download location.
#[derive(Clone)]
pub struct DownloadEngine {
    inner: Arc<Inner>,
    events: Option<mpsc::Sender<TransferEvent>>,
    cancel: CancellationToken,
}

struct Inner {
    client: Arc<dyn RemoteObjectClient>,
    object: ObjectId,
    size: u64,
    retry: RetryPolicy,
    request_timeout: Duration,
    max_request: usize,
    max_concurrency: usize,
    locations: LocationCache,
}

impl DownloadEngine {
    /// Creates a reader for `object`, whose content is `size` bytes long.
    pub fn new(
        client: Arc<dyn RemoteObjectClient>,
        config: &TransferConfig,
        object: ObjectId,
        size: u64,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                object,
                size,
                retry: config.retry().clone(),
                request_timeout: config.request_timeout(),
                max_request: config.max_download_request(),
                max_concurrency: config.max_concurrency(),
                locations: LocationCache::default(),
            }),
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_events(mut self, tx: mpsc::Sender<TransferEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    /// Token that cancels every read started by this engine.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn object(&self) -> &ObjectId {
        &self.inner.object
    }

    pub fn size(&self) -> u64 {
        self.inner.size
    }

    /// Downloads the whole content with concurrent range requests.
    pub async fn read_all(&self) -> Result<Bytes, EngineError> {
        let bytes = self.fetch_concurrent(ByteRange::new(0, self.inner.size)).await?;
        info!(object = %self.inner.object, bytes = bytes.len(), "download complete");
        Ok(bytes)
    }

    /// Downloads `range` of the content.
    pub async fn read_range(&self, range: ByteRange) -> Result<Bytes, EngineError> {
        if range.is_inverted() {
            return Err(EngineError::Validation(format!(
                "range start {} is past its end {}",
                range.start, range.end
            )));
        }
        if !range.fits_within(self.inner.size) {
            return Err(EngineError::Validation(format!(
                "range {range} exceeds object size {}",
                self.inner.size
            )));
        }
        self.fetch_concurrent(range).await
    }

    /// Streams the content in order, one range request at a time.
    ///
    /// Every call starts again from the first byte.
    pub fn stream(&self) -> BoxStream<'static, Result<Bytes, EngineError>> {
        let engine = self.clone();
        let cancel = self.cancel.child_token();
        stream::try_unfold(0u64, move |offset| {
            let engine = engine.clone();
            let cancel = cancel.clone();
            async move {
                let size = engine.inner.size;
                if offset >= size {
                    return Ok(None);
                }
                let len = (engine.inner.max_request as u64).min(size - offset);
                let range = ByteRange::with_len(offset, len);
                let chunk = engine.fetch_range(range, &cancel).await?;
                Ok(Some((chunk, range.end)))
            }
        })
        .boxed()
    }

    /// Writes the content to `writer` in order and returns the byte count.
    pub async fn copy_to<W>(&self, writer: &mut W) -> Result<u64, EngineError>
    where
        W: AsyncWrite + Unpin,
    {
        let mut chunks = self.stream();
        let mut written = 0u64;
        while let Some(chunk) = chunks.try_next().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    async fn fetch_concurrent(&self, range: ByteRange) -> Result<Bytes, EngineError> {
        if range.is_empty() {
            return Ok(Bytes::new());
        }
        let planner = ChunkPlanner::new(range.len(), self.inner.max_request)?;
        if planner.part_count() == 1 {
            return self.fetch_range(range, &self.cancel).await;
        }

        let cancel = self.cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.inner.max_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for spec in planner {
            let sub = ByteRange::with_len(range.start + spec.offset, spec.len as u64);
            let engine = self.clone();
            let cancel = cancel.clone();
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| EngineError::Worker("download pool closed".into()))?;
                let data = engine.fetch_range(sub, &cancel).await?;
                Ok::<_, EngineError>((spec.index, data))
            });
        }

        let mut assembler = PartAssembler::new(planner.part_count(), range.len());
        while let Some(done) = tasks.join_next().await {
            let result = done
                .map_err(|e| EngineError::Worker(e.to_string()))
                .and_then(|r| r);
            match result {
                Ok((index, data)) => assembler.insert(index, data)?,
                Err(e) => {
                    cancel.cancel();
                    tasks.abort_all();
                    self.emit(TransferEvent::Failed {
                        object: self.inner.object.clone(),
                        error: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
        Ok(assembler.finish()?)
    }

    async fn fetch_range(
        &self,
        range: ByteRange,
        cancel: &CancellationToken,
    ) -> Result<Bytes, EngineError> {
        let what = format!("range {range}");
        let data = with_retry(&self.inner.retry, cancel, &what, move |_| {
            self.fetch_attempt(range)
        })
        .await
        .map_err(|e| e.into_engine(&self.inner.object, TransferTarget::Range(range)))?;
        self.emit(TransferEvent::RangeFetched {
            object: self.inner.object.clone(),
            range,
        });
        Ok(data)
    }

    async fn fetch_attempt(&self, range: ByteRange) -> Result<Bytes, RemoteError> {
        let inner = &*self.inner;
        let location = inner
            .locations
            .get(inner.client.as_ref(), &inner.object, inner.request_timeout)
            .await?;

        match timed(inner.request_timeout, inner.client.fetch_range(&location, range)).await {
            Ok(data) if data.len() as u64 == range.len() => Ok(data),
            Ok(data) => Err(RemoteError::Network(format!(
                "short read for range {range}: {} of {} bytes",
                data.len(),
                range.len()
            ))),
            Err(RemoteError::LocationExpired) => {
                inner.locations.invalidate(&location).await;
                Err(RemoteError::LocationExpired)
            }
            Err(e) => Err(e),
        }
    }

    fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.try_send(event);
        }
    }
}
