//! Topic: a named publication endpoint with fan-out to channels.
//!
//! The untyped `Topic` owns the channel name map for one topic
//! directory and is the fan-out unit: a `put` is copied, unchanged, to
//! every registered channel's intake. `Topic<T>` adds nothing but
//! JSON-encoding `T` into the opaque `data` field before handing off to
//! the untyped core -- a thin generic wrapper, nothing more.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::channel::{Channel, TypedChannel};
use crate::config::ChannelOption;
use crate::error::Result;
use crate::message::Message;

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

struct Inner {
    name: String,
    dir: PathBuf,
    next_id: AtomicI64,
    channels: RwLock<HashMap<String, Channel>>,
}

/// The untyped topic: a name, a directory, and a registry of channels.
#[derive(Clone)]
pub struct Topic {
    inner: Arc<Inner>,
}

impl Topic {
    pub(crate) fn open(manager_dir: &Path, name: &str) -> Topic {
        Topic {
            inner: Arc::new(Inner {
                name: name.to_string(),
                dir: manager_dir.join(name),
                next_id: AtomicI64::new(1),
                channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Topic name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Double-checked get-or-create of a channel bound to this topic.
    pub fn get_or_create_channel(&self, option: ChannelOption) -> Result<Channel> {
        let key = option.normalized_name().to_string();

        if let Some(c) = self.inner.channels.read().unwrap().get(&key) {
            return Ok(c.clone());
        }

        let mut channels = self.inner.channels.write().unwrap();
        if let Some(c) = channels.get(&key) {
            return Ok(c.clone());
        }

        let channel = Channel::open(&self.inner.dir, &self.inner.name, option)?;
        channels.insert(key, channel.clone());
        Ok(channel)
    }

    /// Build one record from already-encoded bytes and fan it out to
    /// every registered channel. A channel registered after this call
    /// does not retroactively receive the record. `delay`, when set,
    /// stamps `start_at` rather than `expire_at` -- it is the mechanism
    /// behind `deferred_put`, not a per-message expiry (each channel's
    /// own `ChannelOption::expire`, applied in `Channel::put`, governs
    /// that independently per subscriber).
    pub fn put_bytes(&self, data: Vec<u8>, delay: Option<Duration>) {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let created_at = now();
        let start_at = delay.map(|d| created_at + d.as_secs() as i64).unwrap_or(0);

        let m = Message {
            id,
            created_at,
            start_at,
            expire_at: 0,
            attempts: 0,
            max_attempts: 0,
            trace_id: None,
            data,
        };

        for channel in self.inner.channels.read().unwrap().values() {
            channel.put(m.clone());
        }
    }

    /// Same as `put_bytes`, but gives up on any channel whose intake
    /// is still full after `timeout`. Returns `true` only if every
    /// registered channel accepted the record.
    pub fn put_bytes_with_timeout(&self, data: Vec<u8>, delay: Option<Duration>, timeout: Duration) -> bool {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let created_at = now();
        let start_at = delay.map(|d| created_at + d.as_secs() as i64).unwrap_or(0);

        let m = Message {
            id,
            created_at,
            start_at,
            expire_at: 0,
            attempts: 0,
            max_attempts: 0,
            trace_id: None,
            data,
        };

        let mut accepted_all = true;
        for channel in self.inner.channels.read().unwrap().values() {
            if !channel.put_with_timeout(m.clone(), timeout) {
                accepted_all = false;
            }
        }
        accepted_all
    }

    /// Best-effort sum of every channel's undelivered-record count.
    pub fn depth(&self) -> i64 {
        self.inner.channels.read().unwrap().values().map(Channel::depth).sum()
    }

    /// Close every registered channel's queue loop.
    pub fn close(&self) {
        for channel in self.inner.channels.read().unwrap().values() {
            channel.close();
        }
    }
}

/// A typed publication endpoint. Encodes `T` to JSON and delegates
/// everything else to the untyped [`Topic`].
#[derive(Clone)]
pub struct TypedTopic<T> {
    inner: Topic,
    _marker: PhantomData<fn(T)>,
}

impl<T> TypedTopic<T>
where
    T: Serialize,
{
    pub(crate) fn new(inner: Topic) -> TypedTopic<T> {
        TypedTopic {
            inner,
            _marker: PhantomData,
        }
    }

    /// Topic name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Publish `value`, fanned out to every registered channel.
    /// Infallible at this surface: an encode failure is a programmer
    /// error (non-serializable `T`), everything downstream of encoding
    /// is logged and absorbed per the error handling policy.
    pub fn put(&self, value: &T) {
        match serde_json::to_vec(value) {
            Ok(data) => self.inner.put_bytes(data, None),
            Err(e) => log::error!("[topic | {}] failed to encode value: {e}", self.inner.name()),
        }
    }

    /// Same as `put`, but gives up on any channel whose intake is
    /// still full after `timeout`. Returns `true` only if every
    /// registered channel accepted the record.
    pub fn put_with_timeout(&self, value: &T, timeout: Duration) -> bool {
        match serde_json::to_vec(value) {
            Ok(data) => self.inner.put_bytes_with_timeout(data, None, timeout),
            Err(e) => {
                log::error!("[topic | {}] failed to encode value: {e}", self.inner.name());
                false
            }
        }
    }

    /// Publish `value`, but not eligible for delivery until `delay` has
    /// elapsed -- stamps `start_at = now + delay` rather than touching
    /// expiry.
    pub fn deferred_put(&self, delay: Duration, value: &T) {
        match serde_json::to_vec(value) {
            Ok(data) => self.inner.put_bytes(data, Some(delay)),
            Err(e) => log::error!("[topic | {}] failed to encode value: {e}", self.inner.name()),
        }
    }

    /// Publish every value in `values`, each as its own independent
    /// record -- there is no atomicity across the batch.
    pub fn multi_put(&self, values: &[T]) {
        for value in values {
            self.put(value);
        }
    }

    /// Double-checked get-or-create of a typed channel bound to this
    /// topic.
    pub fn get_or_create_channel(&self, option: ChannelOption) -> Result<TypedChannel<T>>
    where
        T: DeserializeOwned + 'static,
    {
        let channel = self.inner.get_or_create_channel(option)?;
        Ok(TypedChannel::new(channel))
    }

    /// Best-effort sum of every channel's undelivered-record count.
    pub fn depth(&self) -> i64 {
        self.inner.depth()
    }

    /// Close every registered channel's queue loop.
    pub fn close(&self) {
        self.inner.close();
    }
}
