//! In-memory object service.
//!
//! [`MemoryObjectStore`] implements [`RemoteObjectClient`] entirely in
//! process. It keeps staged and committed parts per object, follows the
//! same lifecycle rules as a real service and can inject failures and
//! latency, which makes it suitable for tests and local demos.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use objxfer_protocol::{
    ByteRange, CloseOutcome, ContainerId, DownloadLocation, ObjectId, ObjectState, ObjectStatus,
    PartAck, RemoteFileObject, UploadTarget,
};
use objxfer_transfer::checksum_bytes;
use rand::Rng;

use crate::error::RemoteError;
use crate::remote::{RemoteFuture, RemoteObjectClient};

/// A failure to inject into [`MemoryObjectStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Slot requests for part `index` fail with a network error `times` times.
    RequestSlot { index: u32, times: u32 },
    /// Byte uploads for part `index` fail with a network error `times` times.
    UploadPart { index: u32, times: u32 },
    /// Commits of part `index` fail with a network error `times` times.
    CommitPart { index: u32, times: u32 },
    /// Commits of part `index` are always denied.
    DenyPart { index: u32 },
    /// State polls time out `times` times.
    PollState { times: u32 },
    /// Range fetches fail with a network error `times` times.
    FetchRange { times: u32 },
}

/// Number of calls received per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub request_part_slot: u32,
    pub upload_part: u32,
    pub commit_part: u32,
    pub request_close: u32,
    pub poll_state: u32,
    pub resolve_download_location: u32,
    pub fetch_range: u32,
    /// Highest number of byte uploads in progress at the same time.
    pub peak_uploads: u32,
}

struct StoredFile {
    container: ContainerId,
    state: ObjectState,
    staged: HashMap<u32, Bytes>,
    parts: BTreeMap<u32, Bytes>,
    commit_log: Vec<u32>,
    polls_until_closed: u32,
    /// Joined content, set once the object is closed.
    sealed: Option<Bytes>,
}

impl StoredFile {
    fn content(&self) -> Bytes {
        let mut out = BytesMut::new();
        for data in self.parts.values() {
            out.extend_from_slice(data);
        }
        out.freeze()
    }

    fn size(&self) -> u64 {
        self.parts.values().map(|p| p.len() as u64).sum()
    }

    fn status(&self) -> ObjectStatus {
        ObjectStatus {
            state: self.state,
            committed_parts: self.parts.len() as u32,
            size: (self.state == ObjectState::Closed).then(|| self.size()),
        }
    }
}

#[derive(Default)]
struct StoreInner {
    files: HashMap<ObjectId, StoredFile>,
    /// Upload URL → (object, part index), until the part is committed.
    slots: HashMap<String, (ObjectId, u32)>,
    next_id: u64,
    next_slot: u64,
    generation: u64,
    faults: Vec<Fault>,
    calls: CallCounts,
    uploads_in_progress: u32,
}

impl StoreInner {
    fn file(&self, object: &ObjectId) -> Result<&StoredFile, RemoteError> {
        self.files
            .get(object)
            .ok_or_else(|| RemoteError::NotFound(object.to_string()))
    }

    fn file_mut(&mut self, object: &ObjectId) -> Result<&mut StoredFile, RemoteError> {
        self.files
            .get_mut(object)
            .ok_or_else(|| RemoteError::NotFound(object.to_string()))
    }

    /// Consumes one matching fault, if any is armed.
    fn trip(&mut self, matches: impl Fn(&Fault) -> bool) -> Option<RemoteError> {
        let pos = self.faults.iter().position(|f| matches(f))?;
        let fault = &mut self.faults[pos];
        let error = match fault {
            Fault::DenyPart { index } => {
                return Some(RemoteError::PermissionDenied(format!(
                    "part {index} rejected"
                )));
            }
            Fault::PollState { .. } => RemoteError::Timeout,
            _ => RemoteError::Network("injected failure".into()),
        };
        let remaining = match fault {
            Fault::RequestSlot { times, .. }
            | Fault::UploadPart { times, .. }
            | Fault::CommitPart { times, .. }
            | Fault::PollState { times }
            | Fault::FetchRange { times } => {
                *times = times.saturating_sub(1);
                *times
            }
            Fault::DenyPart { .. } => 1,
        };
        if remaining == 0 {
            self.faults.remove(pos);
        }
        Some(error)
    }
}

/// Object service held in memory.
pub struct MemoryObjectStore {
    inner: Mutex<StoreInner>,
    close_delay: u32,
    latency: Duration,
    jitter: Duration,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            close_delay: 0,
            latency: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Number of state polls that still report `closing` after a close
    /// was accepted.
    pub fn with_close_delay(mut self, polls: u32) -> Self {
        self.close_delay = polls;
        self
    }

    /// Fixed delay added to every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Random extra delay of up to `max` added to every call.
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.jitter = max;
        self
    }

    /// Creates an open, empty file object in `container`.
    pub fn create_file(&self, container: impl Into<ContainerId>) -> RemoteFileObject {
        let container = container.into();
        let mut s = self.lock();
        s.next_id += 1;
        let id = ObjectId::new(format!("file-{}", s.next_id));
        s.files.insert(
            id.clone(),
            StoredFile {
                container: container.clone(),
                state: ObjectState::Open,
                staged: HashMap::new(),
                parts: BTreeMap::new(),
                commit_log: Vec::new(),
                polls_until_closed: 0,
                sealed: None,
            },
        );
        RemoteFileObject {
            id,
            container,
            state: ObjectState::Open,
        }
    }

    /// Describes an existing object as the service would.
    pub fn describe(&self, object: &ObjectId) -> Option<RemoteFileObject> {
        let s = self.lock();
        let file = s.files.get(object)?;
        Some(RemoteFileObject {
            id: object.clone(),
            container: file.container.clone(),
            state: file.state,
        })
    }

    /// Committed content of `object`, parts joined in index order.
    pub fn content(&self, object: &ObjectId) -> Option<Bytes> {
        self.lock().files.get(object).map(StoredFile::content)
    }

    /// Part indices of `object` in the order their commits arrived.
    pub fn commit_log(&self, object: &ObjectId) -> Vec<u32> {
        self.lock()
            .files
            .get(object)
            .map(|f| f.commit_log.clone())
            .unwrap_or_default()
    }

    pub fn inject(&self, fault: Fault) {
        self.lock().faults.push(fault);
    }

    /// Invalidates every download location issued so far.
    pub fn expire_locations(&self) {
        self.lock().generation += 1;
    }

    /// Upload slots handed out and not yet used by a commit.
    pub fn open_slots(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    fn delay(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.latency;
        }
        let max_ms = self.jitter.as_millis() as u64;
        self.latency + Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
    }

    async fn pause(&self) {
        let delay = self.delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

const CONTENT_MARKER: &str = "/content?gen=";

fn location_url(object: &ObjectId, generation: u64) -> String {
    format!("memory://{object}{CONTENT_MARKER}{generation}")
}

/// Object and generation a download URL was issued for.
fn parse_location(url: &str) -> Option<(ObjectId, u64)> {
    let (object, generation) = url.strip_prefix("memory://")?.rsplit_once(CONTENT_MARKER)?;
    Some((ObjectId::new(object), generation.parse().ok()?))
}

/// Counts a byte upload as in progress until dropped.
struct UploadSlot<'a> {
    store: &'a MemoryObjectStore,
}

impl<'a> UploadSlot<'a> {
    fn enter(store: &'a MemoryObjectStore) -> Self {
        let mut s = store.lock();
        s.uploads_in_progress += 1;
        s.calls.peak_uploads = s.calls.peak_uploads.max(s.uploads_in_progress);
        Self { store }
    }
}

impl Drop for UploadSlot<'_> {
    fn drop(&mut self) {
        let mut s = self.store.lock();
        s.uploads_in_progress = s.uploads_in_progress.saturating_sub(1);
    }
}

impl RemoteObjectClient for MemoryObjectStore {
    fn request_part_slot<'a>(
        &'a self,
        object: &'a ObjectId,
        index: u32,
    ) -> RemoteFuture<'a, UploadTarget> {
        Box::pin(async move {
            self.lock().calls.request_part_slot += 1;
            self.pause().await;

            let mut s = self.lock();
            if let Some(e) =
                s.trip(|f| matches!(f, Fault::RequestSlot { index: i, .. } if *i == index))
            {
                return Err(e);
            }
            if index == 0 {
                return Err(RemoteError::Protocol("part indices start at 1".into()));
            }
            let state = s.file(object)?.state;
            if state != ObjectState::Open {
                return Err(RemoteError::Lifecycle(format!("object is {state}")));
            }
            s.next_slot += 1;
            let url = format!("memory://{object}/parts/{index}?slot={}", s.next_slot);
            s.slots.insert(url.clone(), (object.clone(), index));
            Ok(UploadTarget {
                url,
                headers: HashMap::new(),
                expires_at_ms: None,
            })
        })
    }

    fn upload_part<'a>(&'a self, target: &'a UploadTarget, data: Bytes) -> RemoteFuture<'a, ()> {
        Box::pin(async move {
            self.lock().calls.upload_part += 1;
            let _slot = UploadSlot::enter(self);
            self.pause().await;

            let mut s = self.lock();
            let (object, index) = s
                .slots
                .get(&target.url)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(target.url.clone()))?;
            if let Some(e) =
                s.trip(|f| matches!(f, Fault::UploadPart { index: i, .. } if *i == index))
            {
                return Err(e);
            }
            let file = s.file_mut(&object)?;
            if file.state != ObjectState::Open {
                return Err(RemoteError::Lifecycle(format!("object is {}", file.state)));
            }
            file.staged.insert(index, data);
            Ok(())
        })
    }

    fn commit_part<'a>(
        &'a self,
        object: &'a ObjectId,
        index: u32,
        checksum: &'a str,
    ) -> RemoteFuture<'a, PartAck> {
        Box::pin(async move {
            self.lock().calls.commit_part += 1;
            self.pause().await;

            let mut s = self.lock();
            if let Some(e) = s.trip(|f| match f {
                Fault::CommitPart { index: i, .. } | Fault::DenyPart { index: i } => *i == index,
                _ => false,
            }) {
                return Err(e);
            }
            let file = s.file_mut(object)?;
            if file.state != ObjectState::Open {
                return Err(RemoteError::Lifecycle(format!("object is {}", file.state)));
            }
            let data = file
                .staged
                .remove(&index)
                .ok_or_else(|| RemoteError::Protocol(format!("part {index} was not uploaded")))?;
            let actual = checksum_bytes(&data);
            if actual != checksum {
                return Err(RemoteError::ChecksumMismatch(index));
            }
            let size = data.len() as u64;
            file.parts.insert(index, data);
            file.commit_log.push(index);
            s.slots.retain(|_, (slot_object, slot_index)| {
                !(slot_object == object && *slot_index == index)
            });
            Ok(PartAck {
                index,
                size,
                checksum: actual,
            })
        })
    }

    fn request_close<'a>(&'a self, object: &'a ObjectId) -> RemoteFuture<'a, CloseOutcome> {
        Box::pin(async move {
            self.lock().calls.request_close += 1;
            self.pause().await;

            let close_delay = self.close_delay;
            let mut s = self.lock();
            let file = s.file_mut(object)?;
            let state = file.state;
            match state {
                ObjectState::Open if file.parts.is_empty() => Ok(CloseOutcome::Rejected {
                    reason: "an object needs at least one part to be closed".into(),
                }),
                ObjectState::Open => {
                    file.state = ObjectState::Closing;
                    file.polls_until_closed = close_delay;
                    file.staged.clear();
                    s.slots.retain(|_, (slot_object, _)| slot_object != object);
                    Ok(CloseOutcome::Accepted)
                }
                ObjectState::Closing | ObjectState::Closed => Ok(CloseOutcome::Accepted),
            }
        })
    }

    fn poll_state<'a>(&'a self, object: &'a ObjectId) -> RemoteFuture<'a, ObjectStatus> {
        Box::pin(async move {
            self.lock().calls.poll_state += 1;
            self.pause().await;

            let mut s = self.lock();
            if let Some(e) = s.trip(|f| matches!(f, Fault::PollState { .. })) {
                return Err(e);
            }
            let file = s.file_mut(object)?;
            if file.state == ObjectState::Closing {
                if file.polls_until_closed == 0 {
                    file.state = ObjectState::Closed;
                    file.sealed = Some(file.content());
                } else {
                    file.polls_until_closed -= 1;
                }
            }
            Ok(file.status())
        })
    }

    fn resolve_download_location<'a>(
        &'a self,
        object: &'a ObjectId,
        range: Option<ByteRange>,
    ) -> RemoteFuture<'a, DownloadLocation> {
        Box::pin(async move {
            self.lock().calls.resolve_download_location += 1;
            self.pause().await;

            let s = self.lock();
            let file = s.file(object)?;
            if file.state != ObjectState::Closed {
                return Err(RemoteError::Lifecycle(format!(
                    "object is {}, content is served only once closed",
                    file.state
                )));
            }
            let size = file.size();
            let length = match range {
                Some(r) if !r.fits_within(size) => {
                    return Err(RemoteError::Protocol(format!(
                        "range {r} past end of {size} bytes"
                    )));
                }
                Some(r) => r.len(),
                None => size,
            };
            Ok(DownloadLocation {
                url: location_url(object, s.generation),
                length,
                expires_at_ms: None,
            })
        })
    }

    fn fetch_range<'a>(
        &'a self,
        location: &'a DownloadLocation,
        range: ByteRange,
    ) -> RemoteFuture<'a, Bytes> {
        Box::pin(async move {
            self.lock().calls.fetch_range += 1;
            self.pause().await;

            let mut s = self.lock();
            if let Some(e) = s.trip(|f| matches!(f, Fault::FetchRange { .. })) {
                return Err(e);
            }
            let (object, generation) = parse_location(&location.url)
                .ok_or_else(|| RemoteError::NotFound(location.url.clone()))?;
            if generation != s.generation {
                return Err(RemoteError::LocationExpired);
            }
            let file = s.file(&object)?;
            let content = file.sealed.clone().ok_or_else(|| {
                RemoteError::Lifecycle(format!("object is {}, content is not sealed", file.state))
            })?;
            if !range.fits_within(content.len() as u64) {
                return Err(RemoteError::Protocol(format!(
                    "range {range} past end of {} bytes",
                    content.len()
                )));
            }
            Ok(content.slice(range.start as usize..range.end as usize))
        })
    }
}
