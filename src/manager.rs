//! Manager: the unit of queue-storage root, mapping topic name → topic.
//!
//! A `Manager` value owns a data directory and the registry of topics
//! opened beneath it. A process-wide convenience default exists
//! (`manager::default()`) but nothing in this crate requires it --
//! every constructor also accepts an explicit `Manager`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::TopicOption;
use crate::topic::{Topic, TypedTopic};

struct Inner {
    dir: PathBuf,
    topics: RwLock<HashMap<String, Topic>>,
}

/// The root of a queue's on-disk storage: `<dir>/<topic>/<channel>/`.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<Inner>,
}

impl Manager {
    /// Open a manager rooted at `dir`. Does not touch the filesystem
    /// until a topic's first channel is created.
    pub fn new(dir: impl Into<PathBuf>) -> Manager {
        Manager {
            inner: Arc::new(Inner {
                dir: dir.into(),
                topics: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Root directory this manager stores topics under.
    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    /// Double-checked get-or-create of the untyped topic named by
    /// `option`.
    ///
    /// # Panics
    ///
    /// Panics if `option.name` is empty -- an empty name would resolve
    /// to this manager's own root directory, colliding with every
    /// topic's storage.
    pub fn get_or_create_topic(&self, option: TopicOption) -> Topic {
        assert!(!option.name.is_empty(), "topic name is empty");

        if let Some(t) = self.inner.topics.read().unwrap().get(&option.name) {
            return t.clone();
        }

        let mut topics = self.inner.topics.write().unwrap();
        if let Some(t) = topics.get(&option.name) {
            return t.clone();
        }

        let topic = Topic::open(&self.inner.dir, &option.name);
        topics.insert(option.name.clone(), topic.clone());
        topic
    }

    /// Double-checked get-or-create of a typed topic.
    pub fn get_or_create_typed_topic<T>(&self, option: TopicOption) -> TypedTopic<T>
    where
        T: Serialize + DeserializeOwned,
    {
        TypedTopic::new(self.get_or_create_topic(option))
    }

    /// Close every topic (and so every channel's queue loop) this
    /// manager has opened.
    pub fn close(&self) {
        for topic in self.inner.topics.read().unwrap().values() {
            topic.close();
        }
    }
}

static DEFAULT: OnceLock<Manager> = OnceLock::new();

/// The process-wide convenience manager, rooted at `./depot-data`.
/// Lazily created on first use; nothing in this crate requires it --
/// every constructor also accepts an explicit `Manager`.
pub fn default() -> Manager {
    DEFAULT.get_or_init(|| Manager::new("depot-data")).clone()
}

/// A typed topic bound to the process-wide default manager. Equivalent
/// to `default().get_or_create_typed_topic(TopicOption::new(name))`.
pub fn new_topic<T>(name: impl Into<String>) -> TypedTopic<T>
where
    T: Serialize + DeserializeOwned,
{
    default().get_or_create_typed_topic(TopicOption::new(name))
}
