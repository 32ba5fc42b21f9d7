//! The head index: a packed array of fixed-size record headers.
//!
//! `head.req.log` is the authoritative directory of committed records. Each
//! entry is exactly 20 bytes, little-endian, no padding, in field order
//! `inc_id, reqtype, req_data_offset, req_data_len, req_data_crc`. The file
//! layout is part of the on-disk contract.
//!
//! Entry ids are strictly increasing but may have gaps (an abandoned prepare
//! leaves its id unused forever), so position arithmetic alone cannot locate
//! an id; [`HeadIndex::first_at_least`] binary-searches instead.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Error;
use crate::types::{ReqLogKind, SEGMENT_RECORD_CAPACITY};

/// Size of one head-index entry in bytes.
pub const HEAD_ENTRY_SIZE: usize = 20;

/// File name of the head index under the log's base directory.
pub const HEAD_FILE_NAME: &str = "head.req.log";

/// One fixed-size header describing a committed record body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReqLogHead {
    /// Id of the record this header describes.
    pub inc_id: u32,
    /// Raw kind tag of the record.
    pub reqtype: u32,
    /// Byte offset of the body within its owning segment.
    pub req_data_offset: u32,
    /// Byte length of the body.
    pub req_data_len: u32,
    /// CRC-32 of the body bytes.
    pub req_data_crc: u32,
}

impl ReqLogHead {
    /// Encode this header as a fixed 20-byte little-endian array.
    pub fn encode(&self) -> [u8; HEAD_ENTRY_SIZE] {
        let mut buf = [0u8; HEAD_ENTRY_SIZE];
        buf[0..4].copy_from_slice(&self.inc_id.to_le_bytes());
        buf[4..8].copy_from_slice(&self.reqtype.to_le_bytes());
        buf[8..12].copy_from_slice(&self.req_data_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.req_data_len.to_le_bytes());
        buf[16..20].copy_from_slice(&self.req_data_crc.to_le_bytes());
        buf
    }

    /// Decode a header from a fixed 20-byte little-endian array.
    pub fn decode(buf: &[u8; HEAD_ENTRY_SIZE]) -> ReqLogHead {
        ReqLogHead {
            inc_id: u32::from_le_bytes(buf[0..4].try_into().expect("4 bytes for u32")),
            reqtype: u32::from_le_bytes(buf[4..8].try_into().expect("4 bytes for u32")),
            req_data_offset: u32::from_le_bytes(buf[8..12].try_into().expect("4 bytes for u32")),
            req_data_len: u32::from_le_bytes(buf[12..16].try_into().expect("4 bytes for u32")),
            req_data_crc: u32::from_le_bytes(buf[16..20].try_into().expect("4 bytes for u32")),
        }
    }

    /// The record kind, if the stored tag is in the closed set.
    pub fn kind(&self) -> Option<ReqLogKind> {
        ReqLogKind::from_u32(self.reqtype)
    }

    /// Index of the data segment holding this header's body.
    pub fn segment_index(&self) -> u32 {
        segment_index_for(self.inc_id)
    }
}

/// Index of the data segment holding the body of record `inc_id` (1-based).
/// Saturates at id 0 so a corrupt header cannot underflow during recovery.
pub fn segment_index_for(inc_id: u32) -> u32 {
    inc_id.saturating_sub(1) / SEGMENT_RECORD_CAPACITY
}

/// Open handle over the head-index file.
///
/// Holds the single read/write handle the log keeps for its lifetime and the
/// entry count. All mutation goes through the owning log manager's mutex, so
/// methods take `&mut self` and use plain seek/read/write.
#[derive(Debug)]
pub struct HeadIndex {
    file: File,
    entries: u64,
}

impl HeadIndex {
    /// Open or create the head index at `path`.
    ///
    /// A trailing partial entry (file size not a multiple of 20) is the
    /// footprint of a crash mid-write; it is truncated away here, not
    /// errored. The number of dropped bytes is returned so the caller can
    /// log and count the repair.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the file cannot be opened or repaired.
    pub fn open(path: &Path) -> Result<(HeadIndex, u64), Error> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let len = file.metadata()?.len();
        let dropped = len % HEAD_ENTRY_SIZE as u64;
        if dropped != 0 {
            file.set_len(len - dropped)?;
            file.sync_all()?;
        }

        Ok((
            HeadIndex {
                file,
                entries: (len - dropped) / HEAD_ENTRY_SIZE as u64,
            },
            dropped,
        ))
    }

    /// Number of entries currently in the index.
    pub fn entry_count(&self) -> u64 {
        self.entries
    }

    /// Append one entry, durable before returning.
    ///
    /// # Returns
    ///
    /// The byte offset the entry was written at.
    pub fn append(&mut self, head: &ReqLogHead) -> Result<u64, Error> {
        let offset = self.entries * HEAD_ENTRY_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&head.encode())?;
        self.file.sync_all()?;
        self.entries += 1;
        Ok(offset)
    }

    /// Read the entry at a zero-based position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if `position` is past the end.
    pub fn read_at(&mut self, position: u64) -> Result<ReqLogHead, Error> {
        if position >= self.entries {
            return Err(Error::InvariantViolation(format!(
                "head entry {position} read past end ({} entries)",
                self.entries
            )));
        }
        self.file
            .seek(SeekFrom::Start(position * HEAD_ENTRY_SIZE as u64))?;
        let mut buf = [0u8; HEAD_ENTRY_SIZE];
        self.file.read_exact(&mut buf)?;
        Ok(ReqLogHead::decode(&buf))
    }

    /// The last entry, or `None` if the index is empty.
    pub fn last(&mut self) -> Result<Option<ReqLogHead>, Error> {
        if self.entries == 0 {
            return Ok(None);
        }
        Ok(Some(self.read_at(self.entries - 1)?))
    }

    /// Find the first entry with `inc_id >= inc_id`, if any.
    ///
    /// Entry ids are strictly increasing, so this is a binary search over
    /// positions. Returns the position and the entry.
    pub fn first_at_least(&mut self, inc_id: u32) -> Result<Option<(u64, ReqLogHead)>, Error> {
        let mut lo = 0u64;
        let mut hi = self.entries;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let head = self.read_at(mid)?;
            if head.inc_id < inc_id {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        if lo == self.entries {
            return Ok(None);
        }
        let head = self.read_at(lo)?;
        Ok(Some((lo, head)))
    }

    /// Truncate the index down to `entries` entries, durable before
    /// returning. Used by recovery to drop headers whose bodies are torn.
    pub fn truncate_to(&mut self, entries: u64) -> Result<(), Error> {
        self.file.set_len(entries * HEAD_ENTRY_SIZE as u64)?;
        self.file.sync_all()?;
        self.entries = entries;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(inc_id: u32, offset: u32, len: u32) -> ReqLogHead {
        ReqLogHead {
            inc_id,
            reqtype: ReqLogKind::NoAddition.as_u32(),
            req_data_offset: offset,
            req_data_len: len,
            req_data_crc: 0xDEAD_BEEF,
        }
    }

    #[test]
    fn encode_is_20_bytes_in_field_order() {
        let entry = ReqLogHead {
            inc_id: 0x0102_0304,
            reqtype: 7,
            req_data_offset: 40,
            req_data_len: 11,
            req_data_crc: 0xCAFE_F00D,
        };
        let buf = entry.encode();
        assert_eq!(buf.len(), HEAD_ENTRY_SIZE);
        assert_eq!(&buf[0..4], &0x0102_0304u32.to_le_bytes());
        assert_eq!(&buf[4..8], &7u32.to_le_bytes());
        assert_eq!(&buf[8..12], &40u32.to_le_bytes());
        assert_eq!(&buf[12..16], &11u32.to_le_bytes());
        assert_eq!(&buf[16..20], &0xCAFE_F00Du32.to_le_bytes());
        assert_eq!(ReqLogHead::decode(&buf), entry);
    }

    #[test]
    fn segment_index_mapping() {
        assert_eq!(segment_index_for(1), 0);
        assert_eq!(segment_index_for(1000), 0);
        assert_eq!(segment_index_for(1001), 1);
        assert_eq!(segment_index_for(2000), 1);
        assert_eq!(segment_index_for(2001), 2);
    }

    #[test]
    fn append_then_read_back() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join(HEAD_FILE_NAME);
        let (mut index, dropped) = HeadIndex::open(&path).expect("open should succeed");
        assert_eq!(dropped, 0);
        assert_eq!(index.entry_count(), 0);

        let offset_a = index.append(&head(1, 0, 10)).expect("append");
        let offset_b = index.append(&head(2, 10, 12)).expect("append");
        assert_eq!(offset_a, 0);
        assert_eq!(offset_b, 20);
        assert_eq!(index.entry_count(), 2);

        assert_eq!(index.read_at(0).expect("read").inc_id, 1);
        assert_eq!(index.read_at(1).expect("read").inc_id, 2);
        assert_eq!(index.last().expect("last").expect("non-empty").inc_id, 2);
    }

    #[test]
    fn open_truncates_partial_trailing_entry() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join(HEAD_FILE_NAME);
        {
            let (mut index, _) = HeadIndex::open(&path).expect("open");
            index.append(&head(1, 0, 10)).expect("append");
            index.append(&head(2, 10, 10)).expect("append");
        }
        // Simulate a crash mid-write of a third entry.
        {
            use std::io::Write;
            let mut file = OpenOptions::new()
                .append(true)
                .open(&path)
                .expect("open for append");
            file.write_all(&[0xAA; 10]).expect("write partial entry");
            file.sync_all().expect("sync");
        }

        let (mut index, dropped) = HeadIndex::open(&path).expect("reopen");
        assert_eq!(dropped, 10);
        assert_eq!(index.entry_count(), 2);
        assert_eq!(index.last().expect("last").expect("non-empty").inc_id, 2);
        assert_eq!(
            std::fs::metadata(&path).expect("metadata").len(),
            2 * HEAD_ENTRY_SIZE as u64
        );
    }

    #[test]
    fn first_at_least_handles_gaps() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join(HEAD_FILE_NAME);
        let (mut index, _) = HeadIndex::open(&path).expect("open");
        // Ids 1..4 then a gap at 5 (abandoned prepare), then 6.
        for (i, id) in [1u32, 2, 3, 4, 6].iter().enumerate() {
            index
                .append(&head(*id, i as u32 * 10, 10))
                .expect("append");
        }

        let (pos, entry) = index
            .first_at_least(5)
            .expect("search")
            .expect("id 6 satisfies the lookup");
        assert_eq!(pos, 4);
        assert_eq!(entry.inc_id, 6);

        let (pos, entry) = index
            .first_at_least(1)
            .expect("search")
            .expect("exact hit");
        assert_eq!(pos, 0);
        assert_eq!(entry.inc_id, 1);

        assert!(index.first_at_least(7).expect("search").is_none());
    }

    #[test]
    fn truncate_to_drops_tail_entries() {
        let dir = tempfile::tempdir().expect("failed to create tempdir");
        let path = dir.path().join(HEAD_FILE_NAME);
        let (mut index, _) = HeadIndex::open(&path).expect("open");
        for id in 1..=3u32 {
            index.append(&head(id, (id - 1) * 10, 10)).expect("append");
        }

        index.truncate_to(1).expect("truncate");
        assert_eq!(index.entry_count(), 1);
        assert_eq!(index.last().expect("last").expect("non-empty").inc_id, 1);
        assert_eq!(
            std::fs::metadata(&path).expect("metadata").len(),
            HEAD_ENTRY_SIZE as u64
        );
    }
}
