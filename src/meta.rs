//! Meta store (C3)
//!
//! Holds the small JSON checkpoint -- `meta.dat` -- that records where a
//! channel's segmented log left off: which file is being read and
//! written, the byte offsets within each, and a best-effort depth
//! counter. The checkpoint is not atomically coupled to segment writes;
//! on crash, recovery may replay up to the last `sync_interval` of
//! messages, which is exactly what at-least-once delivery allows.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The persisted checkpoint for one channel's segmented log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    /// File number currently being read from.
    pub read_file_num: i64,
    /// File number currently being written to.
    pub write_file_num: i64,
    /// Byte offset of the next record to read within `read_file_num`.
    pub read_pos: u64,
    /// Byte offset at which the next record will be written within
    /// `write_file_num`.
    pub write_pos: u64,
    /// Best-effort count of records enqueued but not yet delivered.
    pub depth: i64,
}

/// Owns the open handle to `meta.dat`. The segmented log's sole
/// accessor is the queue loop; so is this one.
pub struct MetaStore {
    file: File,
    path: PathBuf,
}

impl MetaStore {
    /// Open (creating if absent) `meta.dat` under `dir` and load
    /// whatever checkpoint is there. A decode failure is logged and the
    /// queue starts fresh, with every field defaulted to zero -- this is
    /// the one place a corrupt meta file is recoverable without data
    /// loss, since the segments themselves are untouched.
    pub fn open(dir: &Path) -> Result<(MetaStore, Meta)> {
        let path = dir.join("meta.dat");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let mut store = MetaStore { file, path };
        let meta = store.load();
        Ok((store, meta))
    }

    fn load(&mut self) -> Meta {
        match self.try_load() {
            Ok(meta) => meta,
            Err(e) => {
                log::warn!(
                    "[meta | {}] load failed, starting fresh: {e}",
                    self.path.display()
                );
                Meta::default()
            }
        }
    }

    fn try_load(&mut self) -> Result<Meta> {
        self.file.seek(SeekFrom::Start(0))?;
        serde_json::from_reader(&self.file).map_err(Error::Meta)
    }

    /// Rewrite the checkpoint. Always truncates to the new length --
    /// writing a shorter JSON object without truncating can leave stale
    /// trailing bytes that a later decode reads past the intended end
    /// of the object. This store truncates on every save to avoid that
    /// failure mode.
    pub fn save(&mut self, meta: &Meta) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        serde_json::to_writer(&self.file, meta).map_err(Error::Meta)?;
        let len = self.file.stream_position()?;
        self.file.set_len(len)?;
        Ok(())
    }

    /// Fsync the meta file.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
