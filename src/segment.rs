//! Segmented log (C2)
//!
//! Append-only storage for one channel, split across numbered
//! `NNNNNN.dat` files so that fully-consumed prefixes can be deleted
//! without disturbing whatever is still being written. This module's
//! only client is the queue loop (C4): no lock guards the state here,
//! exclusivity comes from being owned by a single thread.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::meta::Meta;

/// Append-only, segment-rotating on-disk log for a single channel.
pub struct SegmentLog {
    dir: PathBuf,
    max_msg_size: u64,
    max_file_size: u64,

    read_file_num: i64,
    write_file_num: i64,
    read_pos: u64,
    write_pos: u64,

    write_file: Option<File>,
    read_file: Option<BufReader<File>>,
    read_path: Option<PathBuf>,
}

impl SegmentLog {
    /// Open the log rooted at `dir`, resuming from `meta`. Creates `dir`
    /// if it doesn't exist yet -- a channel's queue directory is created
    /// lazily on first use.
    pub fn open(dir: &Path, meta: Meta, max_msg_size: u64, max_file_size: u64) -> Result<SegmentLog> {
        if !dir.is_dir() {
            fs::create_dir_all(dir)?;
        }
        let mut log = SegmentLog {
            dir: dir.to_path_buf(),
            max_msg_size,
            max_file_size,
            read_file_num: meta.read_file_num,
            write_file_num: meta.write_file_num,
            read_pos: meta.read_pos,
            write_pos: meta.write_pos,
            write_file: None,
            read_file: None,
            read_path: None,
        };
        log.check_write_file()?;
        log.check_read_file()?;
        Ok(log)
    }

    fn file_name(&self, num: i64) -> PathBuf {
        self.dir.join(format!("{num:06}.dat"))
    }

    /// Current checkpoint, for the queue loop to persist via
    /// `MetaStore::save`.
    pub fn meta(&self, depth: i64) -> Meta {
        Meta {
            read_file_num: self.read_file_num,
            write_file_num: self.write_file_num,
            read_pos: self.read_pos,
            write_pos: self.write_pos,
            depth,
        }
    }

    /// Append one already-encoded record, including its trailing
    /// newline, to the active write segment. Rotates *before* writing
    /// if the current file already holds at least one byte and this
    /// write would put it at or past `max_file_size`.
    pub fn append_one(&mut self, record: &[u8]) -> Result<()> {
        let total = record.len() as u64;
        if total < 4 || total > self.max_msg_size {
            return Err(Error::OversizeRecord {
                size: total,
                limit: self.max_msg_size,
            });
        }

        if self.write_pos > 0 && self.write_pos + total >= self.max_file_size {
            self.write_file_num += 1;
            self.check_write_file()?;
        }

        let fp = self.write_file.as_mut().expect("write file not open");
        fp.write_all(record)?;
        self.write_pos += total;
        Ok(())
    }

    /// Read the next framed record, crossing segments on EOF as needed.
    /// Returns `Ok(None)` when the log is caught up with the writer.
    pub fn read_one(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if self.read_file_num == self.write_file_num && self.read_pos == self.write_pos {
                return Ok(None);
            }

            let reader = self.read_file.as_mut().expect("read file not open");
            let mut line = Vec::new();
            let n = reader.read_until(b'\n', &mut line)? as u64;

            if n == 0 || line.last() != Some(&b'\n') {
                if self.read_file_num == self.write_file_num {
                    // Still the active write file; nothing complete yet.
                    return Ok(None);
                }
                // A sealed, fully-written segment ended mid-record. Best
                // effort: log and skip the remainder of this file.
                log::warn!(
                    "[segment | {}] truncated trailing record in file {:06}, skipping",
                    self.dir.display(),
                    self.read_file_num
                );
                self.read_file_num += 1;
                self.read_pos = 0;
                self.check_read_file()?;
                continue;
            }

            self.read_pos += n;
            return Ok(Some(line));
        }
    }

    /// Idempotent open/reopen of the write file at `write_file_num`,
    /// used after rotation, on restart and on initial load. The write
    /// side never deletes a file.
    pub fn check_write_file(&mut self) -> Result<()> {
        if let Some(mut fp) = self.write_file.take() {
            fp.sync_all()?;
            self.write_pos = 0;
        }

        let path = self.file_name(self.write_file_num);
        let mut fp = OpenOptions::new().write(true).create(true).open(&path)?;
        if self.write_pos > 0 {
            fp.seek(SeekFrom::Start(self.write_pos))?;
        }
        self.write_file = Some(fp);
        Ok(())
    }

    /// Idempotent open/reopen of the read file at `read_file_num`, used
    /// after crossing a segment boundary, on restart and on initial
    /// load. If a read file is already open, it is synced, closed and
    /// deleted before the next one is opened -- crossing a segment on
    /// read is the sole trigger for deleting a file.
    pub fn check_read_file(&mut self) -> Result<()> {
        if let Some(mut fp) = self.read_file.take() {
            fp.get_ref().sync_all()?;
            drop(fp);
            if let Some(old_path) = self.read_path.take() {
                fs::remove_file(&old_path)?;
            }
            self.read_pos = 0;
        }

        let path = self.file_name(self.read_file_num);
        let mut fp = OpenOptions::new().read(true).open(&path)?;
        if self.read_pos > 0 {
            fp.seek(SeekFrom::Start(self.read_pos))?;
        }
        self.read_path = Some(path);
        self.read_file = Some(BufReader::new(fp));
        Ok(())
    }

    /// Fsync the active write file, if one is open.
    pub fn sync(&self) -> Result<()> {
        if let Some(fp) = &self.write_file {
            fp.sync_all()?;
        }
        Ok(())
    }

    /// Sync and close both file handles, ahead of an orderly shutdown.
    pub fn close(&mut self) -> Result<()> {
        if let Some(fp) = self.write_file.take() {
            fp.sync_all()?;
        }
        if let Some(fp) = self.read_file.take() {
            fp.get_ref().sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;

    fn msg(id: i64, data: &[u8]) -> Message {
        Message {
            id,
            created_at: 0,
            start_at: 0,
            expire_at: 0,
            attempts: 0,
            max_attempts: 0,
            trace_id: None,
            data: data.to_vec(),
        }
    }

    #[test]
    fn empty_log_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = SegmentLog::open(dir.path(), Meta::default(), 1 << 20, 1 << 20).unwrap();
        assert!(log.read_one().unwrap().is_none());
    }

    #[test]
    fn append_then_read_round_trips_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = SegmentLog::open(dir.path(), Meta::default(), 1 << 20, 1 << 20).unwrap();

        for i in 0..10 {
            log.append_one(&msg(i, b"payload").encode()).unwrap();
        }

        for i in 0..10 {
            let raw = log.read_one().unwrap().expect("record");
            let decoded = Message::decode(&raw, true).unwrap();
            assert_eq!(decoded.id, i);
        }
        assert!(log.read_one().unwrap().is_none());
    }

    #[test]
    fn oversize_record_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = SegmentLog::open(dir.path(), Meta::default(), 16, 1 << 20).unwrap();
        let big = msg(1, &vec![b'x'; 64]).encode();
        assert!(matches!(
            log.append_one(&big),
            Err(Error::OversizeRecord { .. })
        ));
    }

    #[test]
    fn rotation_creates_new_segment_and_old_is_deleted_on_read() {
        let dir = tempfile::tempdir().unwrap();
        // small max_file_size forces a rotation after a couple records
        let mut log = SegmentLog::open(dir.path(), Meta::default(), 1 << 20, 64).unwrap();

        for i in 0..20 {
            log.append_one(&msg(i, b"0123456789").encode()).unwrap();
        }
        assert!(log.write_file_num > 0, "expected at least one rotation");

        let mut seen = Vec::new();
        while let Some(raw) = log.read_one().unwrap() {
            seen.push(Message::decode(&raw, true).unwrap().id);
        }
        assert_eq!(seen, (0..20).collect::<Vec<_>>());

        // every segment strictly below the final read_file_num should be gone
        for n in 0..log.read_file_num {
            assert!(!log.file_name(n).exists());
        }
    }

    #[test]
    fn resuming_from_meta_picks_up_where_left_off() {
        let dir = tempfile::tempdir().unwrap();
        let saved_meta;
        {
            let mut log = SegmentLog::open(dir.path(), Meta::default(), 1 << 20, 1 << 20).unwrap();
            for i in 0..5 {
                log.append_one(&msg(i, b"x").encode()).unwrap();
            }
            // consume only the first two
            for _ in 0..2 {
                log.read_one().unwrap();
            }
            saved_meta = log.meta(3);
            log.close().unwrap();
        }

        let mut log = SegmentLog::open(dir.path(), saved_meta, 1 << 20, 1 << 20).unwrap();
        let mut seen = Vec::new();
        while let Some(raw) = log.read_one().unwrap() {
            seen.push(Message::decode(&raw, true).unwrap().id);
        }
        assert_eq!(seen, (2..5).collect::<Vec<_>>());
    }
}
