use std::collections::BTreeMap;
use std::fmt;
use std::iter::FusedIterator;

use bytes::{Bytes, BytesMut};
use objxfer_protocol::ByteRange;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::types::UploadPart;
use crate::{DEFAULT_CHUNK_SIZE, TransferError};

// ---------------------------------------------------------------------------
// Checksum helpers
// ---------------------------------------------------------------------------

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// ChunkPlanner
// ---------------------------------------------------------------------------

/// Descriptor of one planned part: 1-based index and its byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    pub index: u32,
    pub offset: u64,
    pub len: usize,
}

impl PartSpec {
    /// Byte range covered by this part within the logical source.
    pub fn range(&self) -> ByteRange {
        ByteRange::with_len(self.offset, self.len as u64)
    }

    /// Same byte range, renumbered to `index`.
    pub fn renumbered(self, index: u32) -> Self {
        Self { index, ..self }
    }
}

impl fmt::Display for PartSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "part {} [{}]", self.index, self.range())
    }
}

/// Splits a source of known length into ordered, non-overlapping parts.
///
/// Planning is pure: the planner can be iterated any number of times and
/// each iteration starts again from part 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlanner {
    total_len: u64,
    chunk_size: u64,
    part_count: u32,
}

impl ChunkPlanner {
    /// Plans `total_len` bytes in chunks of `chunk_size` bytes.
    pub fn new(total_len: u64, chunk_size: usize) -> Result<Self, TransferError> {
        if chunk_size == 0 {
            return Err(TransferError::InvalidConfig(
                "chunk size must be greater than zero".into(),
            ));
        }
        let chunk_size = chunk_size as u64;
        let part_count = u32::try_from(total_len.div_ceil(chunk_size)).map_err(|_| {
            TransferError::InvalidConfig(format!(
                "{total_len} bytes in chunks of {chunk_size} exceeds the part limit"
            ))
        })?;
        Ok(Self {
            total_len,
            chunk_size,
            part_count,
        })
    }

    /// Number of parts, `ceil(total_len / chunk_size)`.
    pub fn part_count(&self) -> u32 {
        self.part_count
    }

    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size as usize
    }

    /// Returns the descriptor of part `index` (1-based), if it exists.
    pub fn part(&self, index: u32) -> Option<PartSpec> {
        if index == 0 || index > self.part_count {
            return None;
        }
        let offset = u64::from(index - 1) * self.chunk_size;
        let len = self.chunk_size.min(self.total_len - offset);
        Some(PartSpec {
            index,
            offset,
            len: len as usize,
        })
    }

    /// Lazily yields every part in index order.
    pub fn parts(&self) -> PartPlan {
        PartPlan {
            planner: *self,
            next: 1,
        }
    }
}

impl IntoIterator for ChunkPlanner {
    type Item = PartSpec;
    type IntoIter = PartPlan;

    fn into_iter(self) -> PartPlan {
        self.parts()
    }
}

/// Iterator over the parts of a [`ChunkPlanner`].
#[derive(Debug, Clone)]
pub struct PartPlan {
    planner: ChunkPlanner,
    next: u32,
}

impl Iterator for PartPlan {
    type Item = PartSpec;

    fn next(&mut self) -> Option<PartSpec> {
        let spec = self.planner.part(self.next)?;
        self.next += 1;
        Some(spec)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.planner.part_count + 1).saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PartPlan {}

impl FusedIterator for PartPlan {}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads an async byte stream in fixed-size parts with SHA-256 checksums.
///
/// Every part is exactly `chunk_size` bytes except the last one, which
/// holds whatever remains before end of stream.
pub struct ChunkReader<R> {
    reader: R,
    chunk_size: usize,
    offset: u64,
    next_index: u32,
    eof: bool,
}

impl<R: AsyncRead + Unpin> ChunkReader<R> {
    /// Wraps `reader` for chunked reading.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used.
    pub fn new(reader: R, chunk_size: usize) -> Self {
        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Self {
            reader,
            chunk_size,
            offset: 0,
            next_index: 1,
            eof: false,
        }
    }

    /// Reads the next part. Returns `None` at end of stream.
    pub async fn next_part(&mut self) -> Result<Option<UploadPart>, TransferError> {
        if self.eof {
            return Ok(None);
        }

        let mut buf = BytesMut::zeroed(self.chunk_size);
        let mut filled = 0;
        while filled < self.chunk_size {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                self.eof = true;
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);

        let spec = PartSpec {
            index: self.next_index,
            offset: self.offset,
            len: filled,
        };
        self.next_index += 1;
        self.offset += filled as u64;
        Ok(Some(UploadPart::new(spec, buf.freeze())))
    }

    /// Bytes consumed from the stream so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

// ---------------------------------------------------------------------------
// PartAssembler
// ---------------------------------------------------------------------------

/// Collects parts that arrive in any order and joins them in index order.
#[derive(Debug)]
pub struct PartAssembler {
    expected_parts: u32,
    expected_len: u64,
    parts: BTreeMap<u32, Bytes>,
}

impl PartAssembler {
    /// Expects parts `1..=expected_parts` totalling `expected_len` bytes.
    pub fn new(expected_parts: u32, expected_len: u64) -> Self {
        Self {
            expected_parts,
            expected_len,
            parts: BTreeMap::new(),
        }
    }

    /// Stores the bytes of part `index`.
    pub fn insert(&mut self, index: u32, data: Bytes) -> Result<(), TransferError> {
        if index == 0 || index > self.expected_parts {
            return Err(TransferError::Assembly(format!(
                "part {index} outside 1..={}",
                self.expected_parts
            )));
        }
        if self.parts.insert(index, data).is_some() {
            return Err(TransferError::Assembly(format!("duplicate part {index}")));
        }
        Ok(())
    }

    /// Number of parts received so far.
    pub fn received(&self) -> u32 {
        self.parts.len() as u32
    }

    /// Concatenates all parts in index order.
    pub fn finish(self) -> Result<Bytes, TransferError> {
        if let Some(missing) = (1..=self.expected_parts).find(|i| !self.parts.contains_key(i)) {
            return Err(TransferError::Assembly(format!("missing part {missing}")));
        }
        let expected_len = self.expected_len;
        let assembled = if self.parts.len() == 1 {
            self.parts.into_values().next().unwrap_or_default()
        } else {
            let mut out = BytesMut::with_capacity(expected_len as usize);
            for data in self.parts.values() {
                out.extend_from_slice(data);
            }
            out.freeze()
        };
        if assembled.len() as u64 != expected_len {
            return Err(TransferError::Assembly(format!(
                "assembled {} bytes, expected {expected_len}",
                assembled.len()
            )));
        }
        Ok(assembled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: usize = 1024 * 1024;

    #[test]
    fn checksum_bytes_deterministic() {
        let c1 = checksum_bytes(b"hello world");
        let c2 = checksum_bytes(b"hello world");
        assert_eq!(c1, c2);
        assert_eq!(c1.len(), 64); // SHA-256 = 64 hex chars.
    }

    #[test]
    fn checksum_bytes_different_data() {
        assert_ne!(checksum_bytes(b"hello"), checksum_bytes(b"world"));
    }

    #[test]
    fn planner_rejects_zero_chunk_size() {
        let result = ChunkPlanner::new(10, 0);
        assert!(matches!(result, Err(TransferError::InvalidConfig(_))));
    }

    #[test]
    fn planner_empty_source_has_no_parts() {
        let planner = ChunkPlanner::new(0, 4).unwrap();
        assert_eq!(planner.part_count(), 0);
        assert_eq!(planner.parts().count(), 0);
        assert!(planner.part(1).is_none());
    }

    #[test]
    fn planner_boundary_lengths() {
        for (len, parts, last) in [
            (1u64, 1u32, 1usize),
            (3, 1, 3),
            (4, 1, 4),
            (5, 2, 1),
            (8, 2, 4),
            (12, 3, 4),
            (13, 4, 1),
        ] {
            let planner = ChunkPlanner::new(len, 4).unwrap();
            assert_eq!(planner.part_count(), parts, "len {len}");
            let specs: Vec<_> = planner.parts().collect();
            assert_eq!(specs.len() as u32, parts);
            assert_eq!(specs.last().unwrap().len, last, "len {len}");
        }
    }

    #[test]
    fn planner_offsets_are_contiguous() {
        let planner = ChunkPlanner::new(12 * MIB as u64, 5 * MIB).unwrap();
        let specs: Vec<_> = planner.parts().collect();
        assert_eq!(specs.len(), 3);
        let mut expected_offset = 0u64;
        for (i, spec) in specs.iter().enumerate() {
            assert_eq!(spec.index, i as u32 + 1);
            assert_eq!(spec.offset, expected_offset);
            expected_offset += spec.len as u64;
        }
        assert_eq!(expected_offset, 12 * MIB as u64);
        assert_eq!(specs[2].len, 2 * MIB);
    }

    #[test]
    fn planner_is_restartable() {
        let planner = ChunkPlanner::new(10, 3).unwrap();
        let first: Vec<_> = planner.parts().collect();
        let second: Vec<_> = planner.into_iter().collect();
        assert_eq!(first, second);
        assert_eq!(planner.parts().len(), 4);
    }

    #[test]
    fn part_spec_display() {
        let spec = PartSpec {
            index: 2,
            offset: 4,
            len: 4,
        };
        assert_eq!(spec.to_string(), "part 2 [4-8]");
        assert_eq!(spec.renumbered(7).index, 7);
    }

    #[tokio::test]
    async fn chunk_reader_reads_exact_chunks() {
        let data: &[u8] = b"AABBCCDDEE"; // 10 bytes.
        let mut reader = ChunkReader::new(data, 4);

        let p1 = reader.next_part().await.unwrap().unwrap();
        assert_eq!(p1.spec.index, 1);
        assert_eq!(p1.spec.offset, 0);
        assert_eq!(&p1.data[..], b"AABB");
        assert_eq!(p1.checksum, checksum_bytes(b"AABB"));

        let p2 = reader.next_part().await.unwrap().unwrap();
        assert_eq!(p2.spec.index, 2);
        assert_eq!(p2.spec.offset, 4);
        assert_eq!(&p2.data[..], b"CCDD");

        let p3 = reader.next_part().await.unwrap().unwrap();
        assert_eq!(p3.spec.offset, 8);
        assert_eq!(&p3.data[..], b"EE");

        assert!(reader.next_part().await.unwrap().is_none());
        assert_eq!(reader.offset(), 10);
    }

    #[tokio::test]
    async fn chunk_reader_exact_multiple_has_no_empty_tail() {
        let data: &[u8] = b"01234567";
        let mut reader = ChunkReader::new(data, 4);
        assert!(reader.next_part().await.unwrap().is_some());
        assert!(reader.next_part().await.unwrap().is_some());
        assert!(reader.next_part().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chunk_reader_fills_parts_from_short_reads() {
        // A duplex pipe delivers data in whatever pieces the writer used.
        let (mut tx, rx) = tokio::io::duplex(3);
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            for piece in [&b"ab"[..], b"c", b"defg", b"h"] {
                tx.write_all(piece).await.unwrap();
            }
        });

        let mut reader = ChunkReader::new(rx, 5);
        let p1 = reader.next_part().await.unwrap().unwrap();
        assert_eq!(&p1.data[..], b"abcde");
        let p2 = reader.next_part().await.unwrap().unwrap();
        assert_eq!(&p2.data[..], b"fgh");
        assert!(reader.next_part().await.unwrap().is_none());
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn chunk_reader_empty_stream() {
        let data: &[u8] = b"";
        let mut reader = ChunkReader::new(data, 4);
        assert!(reader.next_part().await.unwrap().is_none());
    }

    #[test]
    fn chunk_reader_default_chunk_size() {
        let data: &[u8] = b"x";
        let reader = ChunkReader::new(data, 0);
        assert_eq!(reader.chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn assembler_orders_by_index() {
        let mut asm = PartAssembler::new(3, 6);
        asm.insert(3, Bytes::from_static(b"ef")).unwrap();
        asm.insert(1, Bytes::from_static(b"ab")).unwrap();
        asm.insert(2, Bytes::from_static(b"cd")).unwrap();
        assert_eq!(asm.received(), 3);
        assert_eq!(&asm.finish().unwrap()[..], b"abcdef");
    }

    #[test]
    fn assembler_rejects_duplicates_and_gaps() {
        let mut asm = PartAssembler::new(2, 4);
        asm.insert(1, Bytes::from_static(b"ab")).unwrap();
        assert!(asm.insert(1, Bytes::from_static(b"ab")).is_err());
        assert!(asm.insert(3, Bytes::from_static(b"zz")).is_err());
        let err = asm.finish().unwrap_err();
        assert!(err.to_string().contains("missing part 2"));
    }

    #[test]
    fn assembler_checks_total_length() {
        let mut asm = PartAssembler::new(1, 5);
        asm.insert(1, Bytes::from_static(b"abc")).unwrap();
        assert!(matches!(asm.finish(), Err(TransferError::Assembly(_))));
    }

    #[test]
    fn assembler_zero_parts() {
        let asm = PartAssembler::new(0, 0);
        assert!(asm.finish().unwrap().is_empty());
    }
}
