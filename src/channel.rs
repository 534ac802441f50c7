//! Channel: a named durable subscriber bound to a topic.
//!
//! The untyped `Channel` owns one `QueueHandle` (and so one on-disk
//! queue directory, one queue loop thread). `Channel<T>` is a thin
//! generic wrapper: it holds no state of its own beyond the untyped
//! channel and a marker for `T`, deferring both storage and concurrency
//! to it.

use std::marker::PhantomData;
use std::path::Path;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::config::ChannelOption;
use crate::delivery;
use crate::error::Result;
use crate::message::Message;
use crate::queue::QueueHandle;
use crate::retry::HandlerError;

/// The untyped channel: a queue loop plus the policy knobs that govern
/// it.
#[derive(Clone)]
pub struct Channel {
    queue: QueueHandle,
    option: ChannelOption,
    context: String,
}

impl Channel {
    /// Open (or resume) the channel's queue directory under
    /// `topic_dir/<name>` and start its queue loop.
    pub(crate) fn open(topic_dir: &Path, topic_name: &str, option: ChannelOption) -> Result<Channel> {
        let context = format!("{}:{}", topic_name, option.normalized_name());
        let dir = topic_dir.join(option.normalized_name());
        let queue = QueueHandle::spawn(&dir, option.limits, context.clone())?;
        Ok(Channel { queue, option, context })
    }

    /// Append an already-built record to this channel's intake,
    /// stamping `expire_at` from this channel's own `ChannelOption` if
    /// the publisher didn't already set one. Each channel subscribed to
    /// the same topic may have a different `expire`, so this has to
    /// happen per-channel rather than once at the topic fan-out.
    pub(crate) fn put(&self, mut m: Message) {
        self.apply_expire(&mut m);
        self.queue.put(m);
    }

    /// Append an already-built record to this channel's intake, giving
    /// up after `timeout` if it stays full.
    pub(crate) fn put_with_timeout(&self, mut m: Message, timeout: Duration) -> bool {
        self.apply_expire(&mut m);
        self.queue.put_with_timeout(m, timeout)
    }

    fn apply_expire(&self, m: &mut Message) {
        if m.expire_at == 0 {
            if let Some(expire) = self.option.expire {
                m.expire_at = m.created_at + expire.as_secs() as i64;
            }
        }
    }

    /// Best-effort count of records enqueued but not yet finished.
    pub fn depth(&self) -> i64 {
        self.queue.depth()
    }

    /// This channel's configured options.
    pub fn option(&self) -> &ChannelOption {
        &self.option
    }

    /// Start `max(1, max_process)` delivery workers decoding payloads
    /// as `T` and invoking `handler`. Returns immediately; workers run
    /// on their own threads until the channel (and its queue) is
    /// closed.
    pub fn do_<T, H>(&self, handler: H)
    where
        T: DeserializeOwned + 'static,
        H: Fn(&Message, T) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        delivery::spawn_workers(
            self.queue.clone(),
            self.option.max_process,
            self.option.max_attempts,
            self.context.clone(),
            handler,
        );
    }

    /// Request an orderly shutdown of this channel's queue loop.
    pub fn close(&self) {
        self.queue.close();
    }
}

/// A typed, durable subscriber bound to a topic. Every method forwards
/// to the untyped [`Channel`]; this wrapper's only job is to carry
/// `T`'s type parameter through the API.
#[derive(Clone)]
pub struct TypedChannel<T> {
    inner: Channel,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedChannel<T>
where
    T: DeserializeOwned + 'static,
{
    pub(crate) fn new(inner: Channel) -> TypedChannel<T> {
        TypedChannel {
            inner,
            _marker: PhantomData,
        }
    }

    /// Best-effort count of records enqueued but not yet finished.
    pub fn depth(&self) -> i64 {
        self.inner.depth()
    }

    /// This channel's configured options.
    pub fn option(&self) -> &ChannelOption {
        self.inner.option()
    }

    /// Start `max(1, max_process)` delivery workers invoking `handler`
    /// with each decoded value.
    pub fn do_<H>(&self, handler: H)
    where
        H: Fn(&Message, T) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.do_(handler);
    }

    /// Request an orderly shutdown of this channel's queue loop.
    pub fn close(&self) {
        self.inner.close();
    }
}
