//! Ambient configuration.
//!
//! `QueueLimits` is the surface for overriding the engine's resource
//! caps without changing their meaning. `TopicOption` and
//! `ChannelOption` are the naming / policy knobs on the public API.

use std::time::Duration;

use crate::constants;

/// Tunable resource caps for a single channel's queue loop. Override
/// only for testing or deliberately different deployment constraints --
/// the defaults are the ones documented in `crate::constants`.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    /// Largest single encoded record accepted by `append_one`.
    pub max_msg_size: u64,
    /// Largest a segment file may grow before the writer rotates.
    pub max_file_size: u64,
    /// Capacity of the in-memory write intake.
    pub intake_capacity: usize,
    /// Capacity of the in-memory read buffer.
    pub read_buffer_capacity: usize,
    /// How often the queue loop flushes and checkpoints while active.
    pub sync_interval: Duration,
    /// How long `Channel::close` waits for acknowledgement.
    pub close_timeout: Duration,
    /// Backoff applied to a retried record when the handler error
    /// doesn't specify its own delay.
    pub default_retry_delay: Duration,
}

impl Default for QueueLimits {
    fn default() -> QueueLimits {
        QueueLimits {
            max_msg_size: constants::MAX_MSG_SIZE,
            max_file_size: constants::MAX_FILE_SIZE,
            intake_capacity: constants::INTAKE_CAPACITY,
            read_buffer_capacity: constants::READ_BUFFER_CAPACITY,
            sync_interval: constants::SYNC_INTERVAL,
            close_timeout: constants::CLOSE_TIMEOUT,
            default_retry_delay: constants::DEFAULT_RETRY_DELAY,
        }
    }
}

/// Naming option for `Manager::get_or_create_topic`.
#[derive(Debug, Clone)]
pub struct TopicOption {
    /// Topic name. Required; `Manager::get_or_create_topic` panics if
    /// this is empty.
    pub name: String,
}

impl TopicOption {
    /// Build an option for the topic named `name`.
    pub fn new(name: impl Into<String>) -> TopicOption {
        TopicOption { name: name.into() }
    }
}

/// Policy and naming options for `Topic::get_or_create_channel`.
#[derive(Debug, Clone)]
pub struct ChannelOption {
    /// Channel identity within the topic. An empty name is normalized
    /// to `"default"`.
    pub name: String,
    /// 0 (the default) means unbounded attempts.
    pub max_attempts: u64,
    /// `None` (the default) means messages never expire on this
    /// channel. When set, each `put` through this channel's topic has
    /// its `expire_at` stamped as `now + expire` unless the publisher
    /// already set one explicitly.
    pub expire: Option<Duration>,
    /// Number of concurrent handler worker threads. 0 is treated as 1.
    pub max_process: u64,
    /// Resource caps for this channel's queue loop.
    pub limits: QueueLimits,
}

impl ChannelOption {
    /// Build an option for the channel named `name`, unbounded attempts,
    /// no expiry, a single worker, and default limits.
    pub fn new(name: impl Into<String>) -> ChannelOption {
        ChannelOption {
            name: name.into(),
            max_attempts: 0,
            expire: None,
            max_process: 1,
            limits: QueueLimits::default(),
        }
    }

    /// Channel name, normalized: empty becomes `"default"`.
    pub fn normalized_name(&self) -> &str {
        if self.name.is_empty() {
            "default"
        } else {
            &self.name
        }
    }
}

impl Default for ChannelOption {
    fn default() -> ChannelOption {
        ChannelOption::new("default")
    }
}
