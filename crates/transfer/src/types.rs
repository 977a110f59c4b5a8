use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;

use crate::chunked::{PartSpec, checksum_bytes};

/// One part's content ready for transfer.
#[derive(Debug, Clone)]
pub struct UploadPart {
    pub spec: PartSpec,
    /// Raw part data.
    pub data: Bytes,
    /// SHA-256 hex checksum of `data`.
    pub checksum: String,
}

impl UploadPart {
    /// Wraps `data` as part `spec`, computing its checksum.
    pub fn new(spec: PartSpec, data: Bytes) -> Self {
        let checksum = checksum_bytes(&data);
        Self {
            spec,
            data,
            checksum,
        }
    }

    pub fn index(&self) -> u32 {
        self.spec.index
    }

    /// Same content under a different part index.
    pub fn renumbered(self, index: u32) -> Self {
        Self {
            spec: self.spec.renumbered(index),
            ..self
        }
    }
}

/// Transfer status of a single part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartStatus {
    Pending,
    InFlight,
    Committed,
    Failed,
}

/// Bookkeeping entry for one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartRecord {
    pub index: u32,
    pub size: u64,
    pub checksum: String,
    pub status: PartStatus,
}

/// Tracks the parts of one remote object (thread-safe).
///
/// Indices are handed out in increasing order, so a second upload into the
/// same object appends after the parts of the first one.
pub struct PartLedger {
    inner: RwLock<LedgerInner>,
}

struct LedgerInner {
    /// Parts committed before this ledger started tracking the object.
    existing_committed: u32,
    next_index: u32,
    records: BTreeMap<u32, PartRecord>,
    transferred_bytes: u64,
}

impl Default for PartLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl PartLedger {
    /// Creates a ledger for an object with no parts.
    pub fn new() -> Self {
        Self::with_existing(0)
    }

    /// Creates a ledger for an object that already has `committed` parts.
    pub fn with_existing(committed: u32) -> Self {
        Self {
            inner: RwLock::new(LedgerInner {
                existing_committed: committed,
                next_index: committed + 1,
                records: BTreeMap::new(),
                transferred_bytes: 0,
            }),
        }
    }

    /// Reserves the next free part index.
    pub fn reserve_index(&self) -> u32 {
        let mut s = self.write();
        let index = s.next_index;
        s.next_index += 1;
        index
    }

    /// Records a part as pending.
    pub fn register(&self, part: &UploadPart) {
        let mut s = self.write();
        s.records.insert(
            part.index(),
            PartRecord {
                index: part.index(),
                size: part.data.len() as u64,
                checksum: part.checksum.clone(),
                status: PartStatus::Pending,
            },
        );
    }

    pub fn mark_in_flight(&self, index: u32) {
        self.set_status(index, PartStatus::InFlight);
    }

    /// Marks a part committed and counts its bytes as transferred.
    pub fn mark_committed(&self, index: u32) {
        let mut s = self.write();
        let Some(record) = s.records.get_mut(&index) else {
            return;
        };
        if record.status == PartStatus::Committed {
            return;
        }
        record.status = PartStatus::Committed;
        let size = record.size;
        s.transferred_bytes += size;
    }

    pub fn mark_failed(&self, index: u32) {
        self.set_status(index, PartStatus::Failed);
    }

    /// Returns the status of part `index`, if it is tracked.
    pub fn status(&self, index: u32) -> Option<PartStatus> {
        self.read().records.get(&index).map(|r| r.status)
    }

    /// Committed parts, including those that existed before tracking began.
    pub fn committed_count(&self) -> u32 {
        let s = self.read();
        let tracked = s
            .records
            .values()
            .filter(|r| r.status == PartStatus::Committed)
            .count() as u32;
        s.existing_committed + tracked
    }

    /// Next index that would be reserved.
    pub fn next_index(&self) -> u32 {
        self.read().next_index
    }

    /// Bytes of committed parts tracked by this ledger.
    pub fn transferred_bytes(&self) -> u64 {
        self.read().transferred_bytes
    }

    /// Snapshot of all tracked parts in index order.
    pub fn records(&self) -> Vec<PartRecord> {
        self.read().records.values().cloned().collect()
    }

    fn set_status(&self, index: u32, status: PartStatus) {
        if let Some(record) = self.write().records.get_mut(&index) {
            record.status = status;
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, LedgerInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LedgerInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
