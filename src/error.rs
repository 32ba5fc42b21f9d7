//! Error types for the shardlog crate.
//!
//! This module defines the unified error enum used throughout the crate. All fallible
//! operations return `Result<T, Error>`. Codec failures carry their own enum,
//! [`CodecError`], because pack/unpack is pure data transformation that callers
//! (replicas re-stamping records, replay tooling) handle separately from log I/O.

/// Errors produced by the record codec.
///
/// Decoders never panic on malformed input; every malformed buffer maps to one
/// of these variants.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The buffer ended before the expected field atoms were read.
    #[error("truncated record payload")]
    Truncated,

    /// A field atom carried the wrong wire type for its declared field.
    #[error("wire type mismatch: {0}")]
    TypeMismatch(String),

    /// Bytes remain after the last field of the decoded record kind.
    #[error("trailing bytes after record payload")]
    TrailingGarbage,

    /// The kind tag in the common prefix is not in the closed set.
    #[error("unknown request kind tag {0}")]
    UnknownKind(u32),

    /// A replacement common prefix packs to a different byte length than the
    /// prefix it would replace.
    #[error("replacement common prefix length differs from original")]
    PrefixLengthMismatch,
}

/// Unified error type for all request-log operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record failed to pack or unpack.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A record body on disk does not match its header (CRC mismatch or the
    /// body extends past the end of its segment).
    #[error("corrupt record {inc_id}: {detail}")]
    CorruptRecord {
        /// Id of the record whose body failed verification.
        inc_id: u32,
        /// Human-readable description of the corruption.
        detail: String,
    },

    /// The requested id is below the initial id, or a header read back from
    /// a cached offset did not carry the expected id.
    #[error("request log {inc_id} not found")]
    NotFound {
        /// The id that was requested.
        inc_id: u32,
    },

    /// A replica prepared a record whose caller-supplied id does not equal
    /// the next id this log would issue. The replica has diverged.
    #[error("replica prepare out of order: expected id {expected}, got {got}")]
    OutOfOrder {
        /// The id this log would have issued.
        expected: u32,
        /// The id the caller supplied.
        got: u32,
    },

    /// A prepared record is already outstanding; only one prepare may be in
    /// flight at a time.
    #[error("a prepared request log is already outstanding (id {inc_id})")]
    AlreadyPrepared {
        /// Id of the record currently occupying the prepared slot.
        inc_id: u32,
    },

    /// An I/O error occurred during a file operation.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The log detected a state that the append protocol makes impossible,
    /// such as an append without a matching prepare or a misaligned head
    /// offset.
    #[error("request log invariant violated: {0}")]
    InvariantViolation(String),
}
