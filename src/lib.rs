//! depot is an embedded, typed, persistent message queue usable as a
//! library within a single process. Producers publish typed values to
//! named topics; consumers bind channels to a topic and process
//! messages with application handlers that may request retry with
//! backoff. Messages survive process restarts via a segmented on-disk
//! log, and each channel maintains its own independent consumption
//! progress.
//!
//! Why you might reach for depot:
//!
//!  * You need at-least-once delivery to one or more independent
//!    consumers of the same stream of values, surviving a restart.
//!  * You want backpressure on a full queue rather than unbounded
//!    buffering or silently dropped writes.
//!  * You want typed handlers with retry-with-backoff baked into the
//!    delivery loop, not bolted on by each consumer.
//!
//! depot does not provide exactly-once delivery, cross-channel
//! ordering, multi-message transactions, or a network protocol. It
//! emits `log` records throughout; wiring a subscriber (`fern`,
//! `env_logger`, or otherwise) is left to the embedding application.
#![deny(missing_docs, unused_import_braces)]

pub mod channel;
pub mod config;
pub mod constants;
pub mod delivery;
pub mod error;
pub mod manager;
pub mod message;
pub mod meta;
pub mod queue;
pub mod retry;
pub mod segment;
pub mod topic;

pub use channel::{Channel, TypedChannel};
pub use config::{ChannelOption, QueueLimits, TopicOption};
pub use error::{Error, Result};
pub use manager::{default as default_manager, new_topic, Manager};
pub use message::Message;
pub use retry::{HandlerError, RetryError, Retryable, TerminalError};
pub use topic::{Topic, TypedTopic};
