//! The request log manager: id allocation, the prepare/append protocol,
//! recovery, and read access.
//!
//! Every mutating operation on a shard node becomes one record here before it
//! is applied. A handler asks the manager to *prepare* the next id for a
//! typed record, performs its side effects, then *appends* the record, which
//! makes the body durable in the current data segment and the header durable
//! in the head index. Replicas replay committed records to reach the same
//! state; a recovering primary replays its own log.
//!
//! Two hazards shape the protocol. During failover a new primary must not
//! reuse an id a former primary handed out but never persisted, and a
//! handler must be able to read back its assigned id before appending. Both
//! are solved by the prepared slot: at most one prepare is outstanding, its
//! id is observable, and abandoning it burns the id forever (the resulting
//! gap in the head index tells replicas the write was aborted).
//!
//! All public operations are serialized by one mutex. Appends are the
//! critical path and are already serialized by id allocation, so reads take
//! the same lock; callers needing read concurrency wrap the manager in their
//! own worker pool.

use std::collections::VecDeque;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;
use metrics::{counter, gauge, histogram};

use crate::codec;
use crate::config::ReqLogConfig;
use crate::error::Error;
use crate::head::{HEAD_ENTRY_SIZE, HEAD_FILE_NAME, HeadIndex, ReqLogHead, segment_index_for};
use crate::segment::SegmentStore;
use crate::types::{CommonReqData, INITIAL_REQ_ID, ReqLog};

struct Inner {
    head: HeadIndex,
    segments: SegmentStore,
    /// Next id to issue. Monotonic; never moves backwards while the process
    /// lives, even when a prepared record is abandoned.
    next_id: u32,
    /// Greatest id durably appended.
    last_writed_id: u32,
    /// Prepared-but-not-appended records. Holds at most one entry.
    prepared: VecDeque<CommonReqData>,
    /// Bounded cache of id to head-index byte offset. Misses fall back to a
    /// binary search over the head file.
    head_offsets: LruCache<u32, u64>,
}

/// Durable, append-only log of write requests for one shard node.
///
/// See the module documentation for the protocol. Construction runs
/// recovery: the head index tail is repaired, torn bodies are dropped with
/// their headers, and orphan body bytes in the active segment are truncated,
/// after which a second open of the same directory is a fixed point.
pub struct ReqLogMgr {
    base_path: PathBuf,
    inner: Mutex<Inner>,
}

impl ReqLogMgr {
    /// Open or create the request log under `config.base_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the directory or files cannot be created,
    /// opened, or repaired.
    pub fn open(config: ReqLogConfig) -> Result<ReqLogMgr, Error> {
        let base = config.base_dir;
        std::fs::create_dir_all(&base)?;
        let head_path = base.join(HEAD_FILE_NAME);
        let newly_created = !head_path.exists();

        let (mut head, dropped_bytes) = HeadIndex::open(&head_path)?;
        if newly_created {
            // Make the new file's directory entry durable as well.
            File::open(&base)?.sync_all()?;
        }
        if dropped_bytes != 0 {
            tracing::warn!(
                dropped_bytes,
                "truncated partial trailing entry from the head index"
            );
            counter!("shardlog_recovery_truncations_total").increment(1);
        }

        let segments = SegmentStore::new(&base);

        // A durable header implies a durable body (bodies are synced first),
        // but a torn header tail may have been dropped above while its body
        // bytes survive, and vice versa after partial writes. Drop trailing
        // headers whose bodies are incomplete.
        while let Some(last) = head.last()? {
            let end = u64::from(last.req_data_offset) + u64::from(last.req_data_len);
            if end <= segments.segment_len(last.segment_index())? {
                break;
            }
            tracing::warn!(inc_id = last.inc_id, "dropping head entry with torn body");
            counter!("shardlog_recovery_truncations_total").increment(1);
            head.truncate_to(head.entry_count() - 1)?;
        }

        let last_writed_id = match head.last()? {
            Some(entry) => entry.inc_id,
            None => 0,
        };
        let next_id = last_writed_id + 1;

        // Truncate orphan bytes in the segment the next append writes to:
        // bodies whose headers never became durable.
        let active = segment_index_for(next_id);
        let expected_end = match head.last()? {
            Some(entry) if entry.segment_index() == active => {
                u64::from(entry.req_data_offset) + u64::from(entry.req_data_len)
            }
            _ => 0,
        };
        let active_len = segments.segment_len(active)?;
        if active_len > expected_end {
            tracing::warn!(
                segment = active,
                orphan_bytes = active_len - expected_end,
                "truncating orphan body bytes in the active segment"
            );
            counter!("shardlog_recovery_truncations_total").increment(1);
            segments.truncate_segment(active, expected_end)?;
        }

        tracing::info!(
            headers = head.entry_count(),
            last_writed_id,
            base = %base.display(),
            "request log recovered"
        );
        gauge!("shardlog_last_written_id").set(f64::from(last_writed_id));

        Ok(ReqLogMgr {
            inner: Mutex::new(Inner {
                head,
                segments,
                next_id,
                last_writed_id,
                prepared: VecDeque::new(),
                head_offsets: LruCache::new(config.head_cache_capacity),
            }),
            base_path: base,
        })
    }

    /// The directory this log writes under.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Greatest id that has been durably appended, or 0 on an empty log.
    pub fn last_success_id(&self) -> u32 {
        self.lock().last_writed_id
    }

    /// Number of committed records (head-index entries). With abandoned ids
    /// this can be less than [`last_success_id`](Self::last_success_id).
    pub fn head_count(&self) -> u64 {
        self.lock().head.entry_count()
    }

    /// Reserve the next id and stamp it onto `req`.
    ///
    /// On a primary, the log assigns `next_id` and advances it. On a replica
    /// receiving a replicated record, the caller-supplied `req.common.inc_id`
    /// must equal the log's `next_id`; anything else means the replica has
    /// diverged from the primary's id sequence.
    ///
    /// The prepared record stays in the slot until [`append_data`]
    /// (successful append) or [`del_prepared`] (abandonment; the id is never
    /// reissued while the process lives). A caller that fails after a
    /// prepare must abandon, or every later prepare fails.
    ///
    /// [`append_data`]: Self::append_data
    /// [`del_prepared`]: Self::del_prepared
    ///
    /// # Returns
    ///
    /// The id stamped onto `req`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyPrepared`] if a prepared record is
    /// outstanding, [`Error::OutOfOrder`] on a replica id mismatch.
    pub fn prepare(&self, req: &mut ReqLog, is_primary: bool) -> Result<u32, Error> {
        let mut inner = self.lock();
        if let Some(front) = inner.prepared.front() {
            return Err(Error::AlreadyPrepared {
                inc_id: front.inc_id,
            });
        }

        if is_primary {
            req.common_mut().inc_id = inner.next_id;
        } else if req.common().inc_id != inner.next_id {
            return Err(Error::OutOfOrder {
                expected: inner.next_id,
                got: req.common().inc_id,
            });
        }
        inner.next_id += 1;

        let common = req.common().clone();
        let inc_id = common.inc_id;
        inner.prepared.push_back(common);
        Ok(inc_id)
    }

    /// The currently prepared record's common payload, if any.
    pub fn get_prepared(&self) -> Option<CommonReqData> {
        self.lock().prepared.front().cloned()
    }

    /// Abandon the prepared record. Its id is not recycled; the resulting
    /// gap in the head index is the durable signal of an aborted write.
    pub fn del_prepared(&self) {
        self.lock().prepared.pop_front();
    }

    /// Pack `req` and append it. See [`append_data`](Self::append_data).
    pub fn append_typed(&self, req: &ReqLog) -> Result<(), Error> {
        let packed = codec::pack(req);
        let mut inner = self.lock();
        append_packed(&mut inner, &packed)
    }

    /// Append an already-packed record.
    ///
    /// The record's id (read from its common prefix) must match the prepared
    /// record's. The body is written to its segment and synced, then the
    /// 20-byte header is written to the head index and synced; only then is
    /// the prepared slot released. On an I/O failure the prepared record
    /// stays in the slot for caller-driven retry or abandonment.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Codec`] if the common prefix does not decode,
    /// [`Error::InvariantViolation`] if no prepare is outstanding or the ids
    /// do not match, [`Error::Io`] on write failure.
    pub fn append_data(&self, packed: &[u8]) -> Result<(), Error> {
        let mut inner = self.lock();
        append_packed(&mut inner, packed)
    }

    /// Fetch the record with the given id, or the record with the smallest
    /// id not less than it.
    ///
    /// Abandoned ids leave gaps, so an exact id may not exist; replication
    /// catch-up wants "the next record from here" either way. Returns
    /// `Ok(None)` when the requested id is past the last committed record --
    /// a normal outcome, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if `inc_id` is below the initial id,
    /// [`Error::CorruptRecord`] if the stored body fails verification.
    pub fn get_req(&self, inc_id: u32) -> Result<Option<(ReqLogHead, Vec<u8>)>, Error> {
        if inc_id < INITIAL_REQ_ID {
            return Err(Error::NotFound { inc_id });
        }
        let mut guard = self.lock();
        let inner = &mut *guard;

        if let Some(&head_offset) = inner.head_offsets.get(&inc_id) {
            let head = inner.head.read_at(head_offset / HEAD_ENTRY_SIZE as u64)?;
            if head.inc_id != inc_id {
                return Err(Error::NotFound { inc_id });
            }
            let body = inner.segments.read_body(&head)?;
            return Ok(Some((head, body)));
        }

        match inner.head.first_at_least(inc_id)? {
            None => Ok(None),
            Some((position, head)) => {
                let body = inner.segments.read_body(&head)?;
                inner
                    .head_offsets
                    .put(head.inc_id, position * HEAD_ENTRY_SIZE as u64);
                Ok(Some((head, body)))
            }
        }
    }

    /// Fetch the record whose header sits at the given byte offset in the
    /// head index.
    ///
    /// Sequential replay walks the head index by offset, advancing 20 bytes
    /// per record. Returns `Ok(None)` at or past the end of the index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvariantViolation`] if the offset is not 20-byte
    /// aligned, [`Error::CorruptRecord`] if the body fails verification.
    pub fn get_req_by_head_offset(
        &self,
        head_offset: u64,
    ) -> Result<Option<(ReqLogHead, Vec<u8>)>, Error> {
        if head_offset % HEAD_ENTRY_SIZE as u64 != 0 {
            return Err(Error::InvariantViolation(format!(
                "head offset {head_offset} is not {HEAD_ENTRY_SIZE}-byte aligned"
            )));
        }
        let mut guard = self.lock();
        let inner = &mut *guard;

        let position = head_offset / HEAD_ENTRY_SIZE as u64;
        if position >= inner.head.entry_count() {
            return Ok(None);
        }
        let head = inner.head.read_at(position)?;
        let body = inner.segments.read_body(&head)?;
        Ok(Some((head, body)))
    }

    /// List up to `max_return` committed ids starting at the smallest id not
    /// less than `start`, optionally with their packed bodies.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptRecord`] if `need_data` and a body fails
    /// verification.
    pub fn get_req_ids(
        &self,
        start: u32,
        max_return: u32,
        need_data: bool,
    ) -> Result<Vec<(u32, Option<Vec<u8>>)>, Error> {
        let start = start.max(INITIAL_REQ_ID);
        let mut guard = self.lock();
        let inner = &mut *guard;

        let mut out = Vec::new();
        let Some((first_position, _)) = inner.head.first_at_least(start)? else {
            return Ok(out);
        };

        let mut position = first_position;
        while position < inner.head.entry_count() && out.len() < max_return as usize {
            let head = inner.head.read_at(position)?;
            let data = if need_data {
                Some(inner.segments.read_body(&head)?)
            } else {
                None
            };
            out.push((head.inc_id, data));
            position += 1;
        }
        Ok(out)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("request log mutex poisoned")
    }
}

fn append_packed(inner: &mut Inner, packed: &[u8]) -> Result<(), Error> {
    let (common, _) = codec::unpack_common(packed)?;
    let inc_id = common.inc_id;

    match inner.prepared.front() {
        None => {
            return Err(Error::InvariantViolation(format!(
                "append of id {inc_id} without a prepared request"
            )));
        }
        Some(front) if front.inc_id != inc_id => {
            return Err(Error::InvariantViolation(format!(
                "append of id {inc_id} does not match prepared id {}",
                front.inc_id
            )));
        }
        Some(_) => {}
    }

    // Body first, then header; each durable before the next step. The
    // prepared slot is released only after the header is durable.
    let offset = inner.segments.append_body(inc_id, packed)?;
    let head_entry = ReqLogHead {
        inc_id,
        reqtype: common.kind.as_u32(),
        req_data_offset: offset,
        req_data_len: packed.len() as u32,
        req_data_crc: crc32fast::hash(packed),
    };
    let head_offset = inner.head.append(&head_entry)?;

    inner.last_writed_id = inc_id;
    inner.head_offsets.put(inc_id, head_offset);
    inner.prepared.pop_front();

    counter!("shardlog_appends_total").increment(1);
    histogram!("shardlog_append_bytes").record(packed.len() as f64);
    gauge!("shardlog_last_written_id").set(f64::from(inc_id));
    tracing::debug!(
        inc_id,
        kind = ?common.kind,
        bytes = packed.len(),
        "request log appended"
    );
    Ok(())
}
