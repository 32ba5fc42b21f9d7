//! Core domain types for the request log.
//!
//! This module defines the foundational data types that every other module depends on:
//! the closed set of request kinds, the common payload every record carries, the
//! typed record variants themselves, and the on-disk segment capacity constant.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Number of record bodies each data segment holds.
///
/// Record with id `n` (1-based) lives in segment `(n - 1) / 1000`. The value is
/// part of the on-disk contract; changing it breaks compatibility with logs
/// written by earlier builds.
pub const SEGMENT_RECORD_CAPACITY: u32 = 1000;

/// First id a fresh log issues. Ids are assigned monotonically from here and
/// are never reused once a record is durably appended.
pub const INITIAL_REQ_ID: u32 = 1;

/// Wire tag identifying the kind of a request log record.
///
/// The numeric values are written into both the record's common prefix and the
/// `reqtype` field of its head-index entry, so they are part of the on-disk
/// format. The set is closed: a decoder that encounters any other value
/// reports `CodecError::UnknownKind`.
///
/// Two tags are shared by more than one record shape: `Callback` covers both
/// recommender-refresh and purchase-similarity callbacks, and `CronJob` covers
/// both plain cron ticks and the long-running rebuild tick. The codec
/// disambiguates those on decode by the fields that follow the common prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ReqLogKind {
    /// Write fully describable by its JSON body.
    NoAddition = 1,
    /// Same as `NoAddition`, but replay requires a prior state snapshot.
    NoAdditionNeedBackup = 2,
    /// Same as `NoAddition`, but the write changes nothing on failure, so no
    /// backup is taken and no rollback is needed.
    NoAdditionNoRollback = 3,
    /// Scheduled task tick; the JSON body holds the job name.
    CronJob = 4,
    /// Secondary write issued from a primary's handler to peer shards.
    Callback = 5,
    /// Write that must be applied with the caller-supplied time.
    WithTimestamp = 6,
    /// Bulk index from externally referenced SCD files.
    Index = 7,
    /// Single document mutation.
    CreateOrUpdateDoc = 8,
    /// Product-grouping mutation carrying precomputed uuids.
    Product = 9,
    /// Push of new configuration files.
    UpdateConfig = 10,
    /// Recommender rebuild from user and order SCD files.
    RecommendIndex = 11,
    /// Full rebuild with a cursor into already-replayed ids.
    RebuildFromScd = 12,
}

impl ReqLogKind {
    /// Map a raw wire tag back into the closed set.
    pub fn from_u32(value: u32) -> Option<ReqLogKind> {
        match value {
            1 => Some(ReqLogKind::NoAddition),
            2 => Some(ReqLogKind::NoAdditionNeedBackup),
            3 => Some(ReqLogKind::NoAdditionNoRollback),
            4 => Some(ReqLogKind::CronJob),
            5 => Some(ReqLogKind::Callback),
            6 => Some(ReqLogKind::WithTimestamp),
            7 => Some(ReqLogKind::Index),
            8 => Some(ReqLogKind::CreateOrUpdateDoc),
            9 => Some(ReqLogKind::Product),
            10 => Some(ReqLogKind::UpdateConfig),
            11 => Some(ReqLogKind::RecommendIndex),
            12 => Some(ReqLogKind::RebuildFromScd),
            _ => None,
        }
    }

    /// The raw wire tag for this kind.
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// The common payload every record carries: its assigned id, its kind tag,
/// and the opaque JSON body of the originating request.
///
/// `inc_id` is 0 until the record is stamped by `prepare`; a durably appended
/// record always has `inc_id >= 1`. The JSON body is opaque UTF-8 -- the log
/// never parses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommonReqData {
    /// Monotonically assigned record id (0 before prepare).
    pub inc_id: u32,
    /// Kind tag, mirroring the `ReqLog` variant that owns this common data.
    pub kind: ReqLogKind,
    /// Opaque JSON body of the originating request.
    pub json_body: String,
}

impl CommonReqData {
    fn new(kind: ReqLogKind, json_body: String) -> CommonReqData {
        CommonReqData {
            inc_id: 0,
            kind,
            json_body,
        }
    }
}

/// A typed request log record.
///
/// Each variant extends [`CommonReqData`] with the kind-specific fields that
/// replay needs and that the JSON body alone cannot carry (SCD file lists,
/// caller-supplied timestamps, precomputed uuid lists, configuration file
/// contents). List and map fields may be empty but are always present on the
/// wire.
///
/// Use the constructor methods rather than building variants by hand; they
/// keep `common.kind` consistent with the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReqLog {
    /// Write fully describable by its JSON body.
    NoAddition {
        /// Common payload.
        common: CommonReqData,
    },
    /// JSON-only write whose replay requires a prior state snapshot.
    NoAdditionNeedBackup {
        /// Common payload.
        common: CommonReqData,
    },
    /// JSON-only write that needs no rollback (and therefore no backup).
    NoAdditionNoRollback {
        /// Common payload.
        common: CommonReqData,
    },
    /// Scheduled task tick. The JSON body holds the job name.
    CronJob {
        /// Common payload.
        common: CommonReqData,
        /// Time the cron tick fired, supplied by the scheduler.
        cron_time: i64,
    },
    /// Long-running rebuild tracked across cron ticks. Shares the `CronJob`
    /// wire tag.
    RebuildCron {
        /// Common payload.
        common: CommonReqData,
        /// Time the cron tick fired, supplied by the scheduler.
        cron_time: i64,
        /// Ids already replayed by earlier ticks of this rebuild.
        replayed_ids: Vec<u32>,
    },
    /// Peer-shard recommender refresh. Shares the `Callback` wire tag.
    UpdateRecCallback {
        /// Common payload.
        common: CommonReqData,
        /// Item ids removed from the recommendation set.
        old_items: Vec<u32>,
        /// Item ids added to the recommendation set.
        new_items: Vec<u32>,
    },
    /// Peer-shard purchase-similarity build.
    BuildPurchaseSimCallback {
        /// Common payload.
        common: CommonReqData,
    },
    /// Write applied with the caller-supplied time.
    WithTimestamp {
        /// Common payload.
        common: CommonReqData,
        /// Caller-supplied application time.
        timestamp: i64,
    },
    /// Bulk index from externally referenced SCD files.
    Index {
        /// Common payload.
        common: CommonReqData,
        /// SCD files to index, referenced by name; opaque to the log.
        scd_list: Vec<String>,
        /// Caller-supplied application time.
        timestamp: i64,
    },
    /// Single document mutation.
    CreateOrUpdateDoc {
        /// Common payload.
        common: CommonReqData,
        /// Caller-supplied application time.
        timestamp: i64,
    },
    /// Product-grouping mutation carrying precomputed uuids.
    Product {
        /// Common payload.
        common: CommonReqData,
        /// Precomputed uuids, carried as opaque strings.
        uuid_list: Vec<String>,
    },
    /// Push of new configuration files.
    UpdateConfig {
        /// Common payload.
        common: CommonReqData,
        /// Configuration file name to raw contents. Ordered so the encoding
        /// is deterministic.
        config_files: BTreeMap<String, Bytes>,
    },
    /// Recommender rebuild from user and order SCD files.
    RecommendIndex {
        /// Common payload.
        common: CommonReqData,
        /// User SCD files, referenced by name.
        user_scd_list: Vec<String>,
        /// Order SCD files, referenced by name.
        order_scd_list: Vec<String>,
        /// Caller-supplied application time.
        timestamp: i64,
    },
    /// Full rebuild with a cursor into already-replayed ids.
    RebuildFromScd {
        /// Common payload.
        common: CommonReqData,
        /// SCD files to rebuild from, referenced by name.
        scd_list: Vec<String>,
        /// Caller-supplied application time.
        timestamp: i64,
        /// Ids already replayed before the rebuild started.
        replayed_ids: Vec<u32>,
    },
}

impl ReqLog {
    /// The wire tag this record encodes with.
    pub fn kind(&self) -> ReqLogKind {
        match self {
            ReqLog::NoAddition { .. } => ReqLogKind::NoAddition,
            ReqLog::NoAdditionNeedBackup { .. } => ReqLogKind::NoAdditionNeedBackup,
            ReqLog::NoAdditionNoRollback { .. } => ReqLogKind::NoAdditionNoRollback,
            ReqLog::CronJob { .. } | ReqLog::RebuildCron { .. } => ReqLogKind::CronJob,
            ReqLog::UpdateRecCallback { .. } | ReqLog::BuildPurchaseSimCallback { .. } => {
                ReqLogKind::Callback
            }
            ReqLog::WithTimestamp { .. } => ReqLogKind::WithTimestamp,
            ReqLog::Index { .. } => ReqLogKind::Index,
            ReqLog::CreateOrUpdateDoc { .. } => ReqLogKind::CreateOrUpdateDoc,
            ReqLog::Product { .. } => ReqLogKind::Product,
            ReqLog::UpdateConfig { .. } => ReqLogKind::UpdateConfig,
            ReqLog::RecommendIndex { .. } => ReqLogKind::RecommendIndex,
            ReqLog::RebuildFromScd { .. } => ReqLogKind::RebuildFromScd,
        }
    }

    /// Shared view of the common payload.
    pub fn common(&self) -> &CommonReqData {
        match self {
            ReqLog::NoAddition { common }
            | ReqLog::NoAdditionNeedBackup { common }
            | ReqLog::NoAdditionNoRollback { common }
            | ReqLog::CronJob { common, .. }
            | ReqLog::RebuildCron { common, .. }
            | ReqLog::UpdateRecCallback { common, .. }
            | ReqLog::BuildPurchaseSimCallback { common }
            | ReqLog::WithTimestamp { common, .. }
            | ReqLog::Index { common, .. }
            | ReqLog::CreateOrUpdateDoc { common, .. }
            | ReqLog::Product { common, .. }
            | ReqLog::UpdateConfig { common, .. }
            | ReqLog::RecommendIndex { common, .. }
            | ReqLog::RebuildFromScd { common, .. } => common,
        }
    }

    /// Mutable view of the common payload. `prepare` uses this to stamp the
    /// assigned id.
    pub fn common_mut(&mut self) -> &mut CommonReqData {
        match self {
            ReqLog::NoAddition { common }
            | ReqLog::NoAdditionNeedBackup { common }
            | ReqLog::NoAdditionNoRollback { common }
            | ReqLog::CronJob { common, .. }
            | ReqLog::RebuildCron { common, .. }
            | ReqLog::UpdateRecCallback { common, .. }
            | ReqLog::BuildPurchaseSimCallback { common }
            | ReqLog::WithTimestamp { common, .. }
            | ReqLog::Index { common, .. }
            | ReqLog::CreateOrUpdateDoc { common, .. }
            | ReqLog::Product { common, .. }
            | ReqLog::UpdateConfig { common, .. }
            | ReqLog::RecommendIndex { common, .. }
            | ReqLog::RebuildFromScd { common, .. } => common,
        }
    }

    /// A write fully describable by its JSON body.
    pub fn no_addition(json_body: impl Into<String>) -> ReqLog {
        ReqLog::NoAddition {
            common: CommonReqData::new(ReqLogKind::NoAddition, json_body.into()),
        }
    }

    /// A JSON-only write whose replay requires a prior state snapshot.
    pub fn no_addition_need_backup(json_body: impl Into<String>) -> ReqLog {
        ReqLog::NoAdditionNeedBackup {
            common: CommonReqData::new(ReqLogKind::NoAdditionNeedBackup, json_body.into()),
        }
    }

    /// A JSON-only write that needs no rollback on failure.
    pub fn no_addition_no_rollback(json_body: impl Into<String>) -> ReqLog {
        ReqLog::NoAdditionNoRollback {
            common: CommonReqData::new(ReqLogKind::NoAdditionNoRollback, json_body.into()),
        }
    }

    /// A scheduled task tick; `json_body` holds the job name.
    pub fn cron_job(json_body: impl Into<String>, cron_time: i64) -> ReqLog {
        ReqLog::CronJob {
            common: CommonReqData::new(ReqLogKind::CronJob, json_body.into()),
            cron_time,
        }
    }

    /// A long-running rebuild tick with its replayed-id cursor.
    pub fn rebuild_cron(
        json_body: impl Into<String>,
        cron_time: i64,
        replayed_ids: Vec<u32>,
    ) -> ReqLog {
        ReqLog::RebuildCron {
            common: CommonReqData::new(ReqLogKind::CronJob, json_body.into()),
            cron_time,
            replayed_ids,
        }
    }

    /// A peer-shard recommender refresh callback.
    pub fn update_rec_callback(
        json_body: impl Into<String>,
        old_items: Vec<u32>,
        new_items: Vec<u32>,
    ) -> ReqLog {
        ReqLog::UpdateRecCallback {
            common: CommonReqData::new(ReqLogKind::Callback, json_body.into()),
            old_items,
            new_items,
        }
    }

    /// A peer-shard purchase-similarity build callback.
    pub fn build_purchase_sim_callback(json_body: impl Into<String>) -> ReqLog {
        ReqLog::BuildPurchaseSimCallback {
            common: CommonReqData::new(ReqLogKind::Callback, json_body.into()),
        }
    }

    /// A write applied with the caller-supplied time.
    pub fn with_timestamp(json_body: impl Into<String>, timestamp: i64) -> ReqLog {
        ReqLog::WithTimestamp {
            common: CommonReqData::new(ReqLogKind::WithTimestamp, json_body.into()),
            timestamp,
        }
    }

    /// A bulk index request over the given SCD files.
    pub fn index(json_body: impl Into<String>, scd_list: Vec<String>, timestamp: i64) -> ReqLog {
        ReqLog::Index {
            common: CommonReqData::new(ReqLogKind::Index, json_body.into()),
            scd_list,
            timestamp,
        }
    }

    /// A single document mutation.
    pub fn create_or_update_doc(json_body: impl Into<String>, timestamp: i64) -> ReqLog {
        ReqLog::CreateOrUpdateDoc {
            common: CommonReqData::new(ReqLogKind::CreateOrUpdateDoc, json_body.into()),
            timestamp,
        }
    }

    /// A product-grouping mutation with its precomputed uuids.
    pub fn product(json_body: impl Into<String>, uuid_list: Vec<String>) -> ReqLog {
        ReqLog::Product {
            common: CommonReqData::new(ReqLogKind::Product, json_body.into()),
            uuid_list,
        }
    }

    /// A configuration push carrying the new file contents.
    pub fn update_config(
        json_body: impl Into<String>,
        config_files: BTreeMap<String, Bytes>,
    ) -> ReqLog {
        ReqLog::UpdateConfig {
            common: CommonReqData::new(ReqLogKind::UpdateConfig, json_body.into()),
            config_files,
        }
    }

    /// A recommender rebuild over user and order SCD files.
    pub fn recommend_index(
        json_body: impl Into<String>,
        user_scd_list: Vec<String>,
        order_scd_list: Vec<String>,
        timestamp: i64,
    ) -> ReqLog {
        ReqLog::RecommendIndex {
            common: CommonReqData::new(ReqLogKind::RecommendIndex, json_body.into()),
            user_scd_list,
            order_scd_list,
            timestamp,
        }
    }

    /// A full rebuild from SCD files with its replayed-id cursor.
    pub fn rebuild_from_scd(
        json_body: impl Into<String>,
        scd_list: Vec<String>,
        timestamp: i64,
        replayed_ids: Vec<u32>,
    ) -> ReqLog {
        ReqLog::RebuildFromScd {
            common: CommonReqData::new(ReqLogKind::RebuildFromScd, json_body.into()),
            scd_list,
            timestamp,
            replayed_ids,
        }
    }
}
