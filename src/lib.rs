//! shardlog: a durable, segmented request log for shard replication and replay.
//!
//! Write requests are serialized into typed records, assigned monotonically
//! increasing ids through a prepare/append protocol, and persisted under a
//! base directory as a fixed-size head index (`head.req.log`) plus numbered
//! data segments (`0.req.log`, `1.req.log`, ...). Replicas and recovering
//! primaries replay committed records in id order to converge on the same
//! state.

pub mod classifier;
pub mod codec;
pub mod config;
pub mod error;
pub mod head;
pub mod manager;
pub mod segment;
pub mod types;

pub use classifier::{ClassifierBuilder, ClassifierError, WriteReqClassifier};
pub use config::ReqLogConfig;
pub use error::{CodecError, Error};
pub use head::{HEAD_ENTRY_SIZE, ReqLogHead};
pub use manager::ReqLogMgr;
pub use types::{CommonReqData, INITIAL_REQ_ID, ReqLog, ReqLogKind, SEGMENT_RECORD_CAPACITY};
