//! Queue loop (C4)
//!
//! Exactly one of these runs per channel, on its own OS thread. It is
//! the sole owner of that channel's `SegmentLog` and `MetaStore` -- no
//! mutex guards either, because nothing else ever touches them.
//! Producers and consumers interact with it only through three bounded
//! channels: an intake for writes, a read buffer for reads, and a
//! one-shot exit request.
//!
//! The Go source this is modeled on expresses its main loop as a
//! `select` across a sync ticker, the write intake and an exit
//! channel. `crossbeam_channel::select!` plus `crossbeam_channel::tick`
//! reproduce that directly; `std::sync::mpsc` has no equivalent
//! multi-way select with a timer arm.

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, select, tick, Receiver, Sender};

use crate::config::QueueLimits;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::meta::MetaStore;
use crate::segment::SegmentLog;

/// Handle to a running queue loop. Cheaply cloneable -- every clone
/// shares the same underlying channels and thread, which is how the
/// delivery pipeline's multiple worker threads fan in on one
/// `ReadBuffer`.
#[derive(Clone)]
pub struct QueueHandle {
    inner: Arc<Inner>,
}

struct Inner {
    intake_tx: Sender<Message>,
    read_rx: Receiver<Message>,
    exit_tx: Sender<Sender<()>>,
    depth: Arc<AtomicI64>,
    closing: AtomicBool,
    close_timeout: Duration,
    default_retry_delay: Duration,
    context: String,
}

impl QueueHandle {
    /// Open (or resume) the log and meta for `dir` and start its queue
    /// loop thread.
    pub fn spawn(dir: &Path, limits: QueueLimits, context: impl Into<String>) -> Result<QueueHandle> {
        let context = context.into();
        let (meta_store, meta) = MetaStore::open(dir)?;
        let log = SegmentLog::open(dir, meta, limits.max_msg_size, limits.max_file_size)?;

        let (intake_tx, intake_rx) = bounded::<Message>(limits.intake_capacity);
        let (read_tx, read_rx) = bounded::<Message>(limits.read_buffer_capacity);
        let (exit_tx, exit_rx) = bounded::<Sender<()>>(1);
        let depth = Arc::new(AtomicI64::new(meta.depth));

        // The loop keeps its own clone of the read buffer's receiving
        // side, used only on exit to pull back whatever is still
        // sitting there unconsumed (crossbeam receivers are MPMC, so
        // this is the same queue ordinary consumers read from).
        let read_rx_for_loop = read_rx.clone();

        let loop_depth = depth.clone();
        let loop_ctx = context.clone();
        let loop_limits = limits;
        std::thread::Builder::new()
            .name(format!("depot-queue-loop[{context}]"))
            .spawn(move || {
                run(
                    log,
                    meta_store,
                    intake_rx,
                    read_tx,
                    read_rx_for_loop,
                    exit_rx,
                    loop_limits,
                    loop_depth,
                    loop_ctx,
                )
            })
            .expect("failed to spawn queue loop thread");

        Ok(QueueHandle {
            inner: Arc::new(Inner {
                intake_tx,
                read_rx,
                exit_tx,
                depth,
                closing: AtomicBool::new(false),
                close_timeout: limits.close_timeout,
                default_retry_delay: limits.default_retry_delay,
                context,
            }),
        })
    }

    /// Publish a brand-new record, blocking on a full intake -- the
    /// intentional flow-control mechanism.
    pub fn put(&self, m: Message) {
        self.inner.depth.fetch_add(1, Ordering::Relaxed);
        if self.inner.intake_tx.send(m).is_err() {
            // queue loop gone; undo the optimistic accounting
            self.inner.depth.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// Publish a brand-new record, giving up after `timeout` if the
    /// intake stays full. Returns whether it was accepted.
    pub fn put_with_timeout(&self, m: Message, timeout: Duration) -> bool {
        self.inner.depth.fetch_add(1, Ordering::Relaxed);
        let sent = self.inner.intake_tx.send_timeout(m, timeout).is_ok();
        if !sent {
            self.inner.depth.fetch_sub(1, Ordering::Relaxed);
        }
        sent
    }

    /// Re-append a record already counted in `depth` (a retry, a
    /// start-at requeue) without touching the depth accounting.
    pub fn re_put(&self, m: Message) {
        let _ = self.inner.intake_tx.send(m);
    }

    /// Mark one record as finished -- delivered successfully or
    /// dropped by policy -- decrementing the best-effort depth count.
    pub fn finish(&self) {
        self.inner.depth.fetch_sub(1, Ordering::Relaxed);
    }

    /// Block until a record is available.
    pub fn get(&self) -> Option<Message> {
        self.inner.read_rx.recv().ok()
    }

    /// Block until a record is available or `timeout` elapses.
    pub fn get_with_timeout(&self, timeout: Duration) -> Option<Message> {
        self.inner.read_rx.recv_timeout(timeout).ok()
    }

    /// Best-effort count of records enqueued but not yet finished.
    pub fn depth(&self) -> i64 {
        self.inner.depth.load(Ordering::Relaxed)
    }

    /// The default backoff applied to a retried record that doesn't
    /// specify its own delay.
    pub fn default_retry_delay(&self) -> Duration {
        self.inner.default_retry_delay
    }

    /// Request an orderly shutdown: drain the intake, drain the read
    /// buffer back to the log, sync and close. Blocks up to
    /// `close_timeout`; on timeout the loop may still be draining
    /// asynchronously. Calling this more than once is a no-op after the
    /// first call.
    pub fn close(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let (reply_tx, reply_rx) = bounded::<()>(1);
        if self.inner.exit_tx.send(reply_tx).is_err() {
            return;
        }
        match reply_rx.recv_timeout(self.inner.close_timeout) {
            Ok(()) => {
                log::debug!("[queue | {}] shut down cleanly", self.inner.context);
            }
            Err(_) => {
                log::error!(
                    "[queue | {}] close timed out after {:?}; loop may still be draining",
                    self.inner.context,
                    self.inner.close_timeout
                );
            }
        }
    }
}

/// Append `m`'s encoding to `log`, logging and dropping on failure --
/// no error from this ever reaches the publisher. An oversize record is
/// a policy rejection; any other error is a transient I/O condition,
/// logged and left for the next cycle's accounting (the record itself
/// is gone either way, since `append_one` only fails before anything is
/// written).
fn append_logged(log: &mut SegmentLog, m: &Message, context: &str) {
    if let Err(e) = log.append_one(&m.encode()) {
        match e {
            Error::OversizeRecord { size, limit } => {
                log::error!(
                    "[queue | {context}] rejecting oversize record {size} bytes > {limit} byte limit"
                );
            }
            other => {
                log::error!("[queue | {context}] append failed: {other}");
            }
        }
    }
}

fn sync_and_checkpoint(log: &mut SegmentLog, meta_store: &mut MetaStore, depth: &AtomicI64, context: &str) {
    if let Err(e) = log.sync() {
        log::error!("[queue | {context}] fsync failed: {e}");
    }
    let meta = log.meta(depth.load(Ordering::Relaxed));
    if let Err(e) = meta_store.save(&meta) {
        log::error!("[queue | {context}] meta checkpoint failed: {e}");
    }
}

fn refill(log: &mut SegmentLog, read_tx: &Sender<Message>, capacity: usize, context: &str) {
    while read_tx.len() < capacity / 2 {
        match log.read_one() {
            Ok(Some(raw)) => match Message::decode(&raw, false) {
                Ok(m) => {
                    // Capacity was just checked above, under the single
                    // ownership of this loop thread, so this send can't
                    // block.
                    let _ = read_tx.try_send(m);
                }
                Err(e) => {
                    log::error!("[queue | {context}] skipping malformed frame: {e}");
                }
            },
            Ok(None) => break,
            Err(e) => {
                log::error!("[queue | {context}] read failed: {e}");
                break;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    mut log: SegmentLog,
    mut meta_store: MetaStore,
    intake_rx: Receiver<Message>,
    read_tx: Sender<Message>,
    read_rx_for_loop: Receiver<Message>,
    exit_rx: Receiver<Sender<()>>,
    limits: QueueLimits,
    depth: Arc<AtomicI64>,
    context: String,
) {
    let ticker = tick(limits.sync_interval);

    loop {
        refill(&mut log, &read_tx, limits.read_buffer_capacity, &context);

        select! {
            recv(ticker) -> _ => {
                sync_and_checkpoint(&mut log, &mut meta_store, &depth, &context);
            }
            recv(intake_rx) -> msg => {
                match msg {
                    Ok(m) => {
                        append_logged(&mut log, &m, &context);
                        while let Ok(m) = intake_rx.try_recv() {
                            append_logged(&mut log, &m, &context);
                        }
                        sync_and_checkpoint(&mut log, &mut meta_store, &depth, &context);
                    }
                    Err(_) => {
                        // every Sender (QueueHandle and clones) is gone
                        log::debug!("[queue | {context}] intake disconnected, shutting down");
                        let _ = log.close();
                        let meta = log.meta(depth.load(Ordering::Relaxed));
                        let _ = meta_store.save(&meta);
                        let _ = meta_store.sync();
                        return;
                    }
                }
            }
            recv(exit_rx) -> reply => {
                let reply_tx = match reply {
                    Ok(tx) => tx,
                    Err(_) => return,
                };

                while let Ok(m) = intake_rx.try_recv() {
                    append_logged(&mut log, &m, &context);
                }
                // Unconsumed prefetched records are preserved as if
                // never read: the only way observed order deviates
                // from append order.
                while let Ok(m) = read_rx_for_loop.try_recv() {
                    append_logged(&mut log, &m, &context);
                }

                let _ = log.close();
                let meta = log.meta(depth.load(Ordering::Relaxed));
                let _ = meta_store.save(&meta);
                let _ = meta_store.sync();

                let _ = reply_tx.send(());
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let handle = QueueHandle::spawn(dir.path(), QueueLimits::default(), "t:c").unwrap();
        let m = Message {
            id: 1,
            created_at: 0,
            start_at: 0,
            expire_at: 0,
            attempts: 0,
            max_attempts: 0,
            trace_id: None,
            data: b"hello".to_vec(),
        };
        handle.put(m.clone());
        let got = handle.get().unwrap();
        assert_eq!(got.data, m.data);
        handle.close();
    }

    #[test]
    fn depth_tracks_put_and_finish() {
        let dir = tempfile::tempdir().unwrap();
        let handle = QueueHandle::spawn(dir.path(), QueueLimits::default(), "t:c").unwrap();
        for i in 0..5 {
            handle.put(Message {
                id: i,
                created_at: 0,
                start_at: 0,
                expire_at: 0,
                attempts: 0,
                max_attempts: 0,
                trace_id: None,
                data: b"x".to_vec(),
            });
        }
        // give the loop a moment to drain the intake
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.depth(), 5);
        for _ in 0..5 {
            handle.get().unwrap();
            handle.finish();
        }
        assert_eq!(handle.depth(), 0);
        handle.close();
    }

    #[test]
    fn close_drains_read_buffer_back_to_log_in_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let handle = QueueHandle::spawn(dir.path(), QueueLimits::default(), "t:c").unwrap();
            for i in 0..3 {
                handle.put(Message {
                    id: i,
                    created_at: 0,
                    start_at: 0,
                    expire_at: 0,
                    attempts: 0,
                    max_attempts: 0,
                    trace_id: None,
                    data: b"x".to_vec(),
                });
            }
            std::thread::sleep(Duration::from_millis(100));
            handle.close();
        }

        let handle2 = QueueHandle::spawn(dir.path(), QueueLimits::default(), "t:c").unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(handle2.get_with_timeout(Duration::from_secs(1)).unwrap().id);
        }
        assert_eq!(ids, vec![0, 1, 2]);
        handle2.close();
    }
}
