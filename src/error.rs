//! Crate-wide error type.
//!
//! No `Error` ever reaches a publisher: `Topic::put` and friends are
//! infallible at the public surface, logging and dropping internally.
//! The variants here exist for the internal boundaries that need to
//! distinguish failure kinds -- the segmented log, the meta store and
//! the codec.

use std::io;

/// Everything that can go wrong inside the queue engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A record's on-disk frame was missing a separator, held an
    /// unparsable integer, or was truncated before its terminating
    /// newline.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// An append was rejected because the encoded record, including its
    /// trailing newline, exceeded `QueueLimits::max_msg_size`.
    #[error("oversize record: {size} bytes exceeds limit of {limit} bytes")]
    OversizeRecord {
        /// Size of the record that was rejected.
        size: u64,
        /// The configured limit it exceeded.
        limit: u64,
    },

    /// Segment or meta file I/O failed.
    #[error("queue i/o error: {0}")]
    Io(#[from] io::Error),

    /// The meta checkpoint could not be encoded or decoded as JSON.
    #[error("meta (de)serialization error: {0}")]
    Meta(#[source] serde_json::Error),

    /// A typed payload failed to decode from its stored JSON bytes.
    #[error("payload decode error: {0}")]
    PayloadDecode(#[source] serde_json::Error),
}

/// Convenience alias used throughout the crate's internals.
pub type Result<T> = std::result::Result<T, Error>;
