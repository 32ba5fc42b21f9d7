//! Data segments: the files holding packed record bodies.
//!
//! Bodies are appended contiguously to `<k>.req.log` under the log's base
//! directory, 1000 bodies per segment, with no framing of their own -- the
//! head index carries offset, length, and CRC. Segment files are opened on
//! demand; the owning log manager serializes all access.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::head::{ReqLogHead, segment_index_for};

/// Segment store rooted at the log's base directory.
#[derive(Debug)]
pub struct SegmentStore {
    base: PathBuf,
}

impl SegmentStore {
    /// Create a store rooted at `base`. The directory must already exist.
    pub fn new(base: impl Into<PathBuf>) -> SegmentStore {
        SegmentStore { base: base.into() }
    }

    /// Path of segment `index` under the base directory.
    pub fn segment_path(&self, index: u32) -> PathBuf {
        self.base.join(format!("{index}.req.log"))
    }

    /// Append a packed body for record `inc_id`, durable before returning.
    ///
    /// # Returns
    ///
    /// The byte offset the body was written at within its segment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the segment has outgrown the
    /// 32-bit offset the head entry stores, [`Error::Io`] on write failure.
    pub fn append_body(&self, inc_id: u32, body: &[u8]) -> Result<u32, Error> {
        let segment = segment_index_for(inc_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.segment_path(segment))?;

        let offset = file.metadata()?.len();
        let offset = u32::try_from(offset).map_err(|_| {
            Error::InvariantViolation(format!(
                "segment {segment} write offset {offset} exceeds the u32 head field"
            ))
        })?;

        file.write_all(body)?;
        file.sync_all()?;
        Ok(offset)
    }

    /// Read and verify the body a head entry describes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptRecord`] if the body extends past the end of
    /// its segment or its CRC-32 does not match the header.
    pub fn read_body(&self, head: &ReqLogHead) -> Result<Vec<u8>, Error> {
        let segment = head.segment_index();
        let path = self.segment_path(segment);
        let mut file = File::open(&path)?;

        let end = u64::from(head.req_data_offset) + u64::from(head.req_data_len);
        let len = file.metadata()?.len();
        if end > len {
            return Err(Error::CorruptRecord {
                inc_id: head.inc_id,
                detail: format!(
                    "body ends at {end} but segment {segment} holds {len} bytes"
                ),
            });
        }

        file.seek(SeekFrom::Start(u64::from(head.req_data_offset)))?;
        let mut body = vec![0u8; head.req_data_len as usize];
        file.read_exact(&mut body)?;

        let crc = crc32fast::hash(&body);
        if crc != head.req_data_crc {
            return Err(Error::CorruptRecord {
                inc_id: head.inc_id,
                detail: format!(
                    "CRC32 mismatch: stored {:#010X}, computed {crc:#010X}",
                    head.req_data_crc
                ),
            });
        }
        Ok(body)
    }

    /// Current byte length of segment `index`, or 0 if the file does not
    /// exist yet.
    pub fn segment_len(&self, index: u32) -> Result<u64, Error> {
        match std::fs::metadata(self.segment_path(index)) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Truncate segment `index` to `len` bytes, durable before returning.
    /// A no-op if the segment file does not exist. Used by recovery to drop
    /// orphan body bytes whose header never became durable.
    pub fn truncate_segment(&self, index: u32, len: u64) -> Result<(), Error> {
        let path = self.segment_path(index);
        if !path.exists() {
            return Ok(());
        }
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }

    /// The base directory this store writes under.
    pub fn base(&self) -> &Path {
        &self.base
    }
}
