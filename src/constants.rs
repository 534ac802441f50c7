//! Library level constants
//!
//! These are the hard defaults for the tunables `QueueLimits` exposes
//! as configuration, without changing their meaning.

use std::time::Duration;

/// Maximum size, in bytes, of a single encoded record. Appends beyond
/// this are rejected with `Error::OversizeRecord`.
pub const MAX_MSG_SIZE: u64 = 1 << 30; // 1 GiB

/// Maximum size, in bytes, a single segment file may reach before the
/// writer rotates to a new one.
pub const MAX_FILE_SIZE: u64 = 2 << 30; // 2 GiB

/// Capacity of a channel's in-memory write intake.
pub const INTAKE_CAPACITY: usize = 100;

/// Capacity of a channel's in-memory read buffer.
pub const READ_BUFFER_CAPACITY: usize = 10;

/// How often the queue loop flushes the write file and checkpoints meta
/// while there is activity.
pub const SYNC_INTERVAL: Duration = Duration::from_secs(2);

/// How long `Channel::close` waits for the queue loop to acknowledge
/// shutdown before giving up.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default backoff applied to a record re-enqueued after a retryable
/// handler error, when the error doesn't specify its own delay.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
