//! Delivery pipeline (C5)
//!
//! One or more worker threads per channel, each running the same loop:
//! pull a record off the queue's read buffer, apply the start-time /
//! expiry / max-attempts gates, decode the typed payload, invoke the
//! handler, and re-enqueue or finish depending on the outcome. Workers
//! share one `QueueHandle` and so fan in on its single `ReadBuffer`.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::message::Message;
use crate::queue::QueueHandle;
use crate::retry::HandlerError;

/// A short pause inserted before re-enqueuing a not-yet-eligible
/// record, so a channel with one far-future `start_at` record doesn't
/// spin the worker thread in a busy loop until it elapses. Capped
/// rather than sleeping the full remaining delay, so a second,
/// sooner-eligible record enqueued behind it is still picked up
/// promptly.
const START_AT_BACKOFF_CAP: Duration = Duration::from_millis(250);

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Outcome of processing one record, for testing the gate logic
/// without spinning up threads.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Not yet eligible; re-enqueued with the increment below undone, so
    /// the bounce doesn't count against `max_attempts`.
    NotYetEligible,
    /// Past `expire_at`; dropped.
    Expired,
    /// `attempts` exceeds `max_attempts`; dropped without invoking the
    /// handler.
    AttemptsExceeded,
    /// Payload failed to decode; dropped (poison-pill protection).
    DecodeFailed,
    /// Handler returned success.
    Finished,
    /// Handler returned a retryable error; re-enqueued.
    Retried,
    /// Handler returned a terminal error; dropped.
    Dropped,
}

/// Apply the StartAt/Expire/Attempt gates to `m`. Returns `Some(m)` if
/// the record should proceed to decode and handler invocation, or
/// `None` (with the appropriate action already taken) otherwise.
fn apply_gates(
    queue: &QueueHandle,
    mut m: Message,
    max_attempts: u64,
    context: &str,
) -> Result<Message, Outcome> {
    m.attempts += 1;
    let t = now();

    if m.start_at > 0 && m.start_at > t {
        m.attempts = m.attempts.saturating_sub(1);
        let wait = Duration::from_secs((m.start_at - t) as u64).min(START_AT_BACKOFF_CAP);
        std::thread::sleep(wait);
        queue.re_put(m);
        return Err(Outcome::NotYetEligible);
    }

    if m.expire_at > 0 && m.expire_at < t {
        log::error!("[delivery | {context}] dropping expired record {}", m.id);
        queue.finish();
        return Err(Outcome::Expired);
    }

    // attempts already counts this pull, so a record is allowed exactly
    // max_attempts deliveries before the one that would exceed it is refused.
    if max_attempts > 0 && m.attempts > max_attempts {
        log::error!(
            "[delivery | {context}] dropping record {} after {} attempts",
            m.id,
            m.attempts
        );
        queue.finish();
        return Err(Outcome::AttemptsExceeded);
    }

    Ok(m)
}

/// Decode `m`'s payload as `T`; on failure, finish (drop) the record
/// and report `DecodeFailed` rather than retry -- an undecodable
/// payload will never decode differently on a later attempt.
fn decode_payload<T: DeserializeOwned>(queue: &QueueHandle, m: &Message, context: &str) -> Option<T> {
    match serde_json::from_slice::<T>(&m.data) {
        Ok(v) => Some(v),
        Err(e) => {
            log::error!(
                "[delivery | {context}] dropping record {} with undecodable payload: {}",
                m.id,
                Error::PayloadDecode(e)
            );
            queue.finish();
            None
        }
    }
}

/// Turn a handler's outcome into the re-enqueue-or-finish action,
/// honoring the retry contract.
fn classify(
    queue: &QueueHandle,
    mut m: Message,
    result: Result<(), HandlerError>,
    context: &str,
) -> Outcome {
    match result {
        Ok(()) => {
            queue.finish();
            Outcome::Finished
        }
        Err(e) if e.need_retry() => {
            if e.skip_retry_count() {
                // undo the increment apply_gates already made for this
                // delivery, so it doesn't count toward max_attempts
                m.attempts = m.attempts.saturating_sub(1);
            }
            let delay = e.retry_delay().unwrap_or_else(|| queue.default_retry_delay());
            m.start_at = now() + delay.as_secs() as i64;
            log::debug!(
                "[delivery | {context}] retrying record {} in {:?}: {}",
                m.id,
                delay,
                e
            );
            queue.re_put(m);
            Outcome::Retried
        }
        Err(e) => {
            log::error!("[delivery | {context}] terminal error on record {}: {}", m.id, e);
            queue.finish();
            Outcome::Dropped
        }
    }
}

/// Process exactly one record already pulled from `queue`. Exposed for
/// unit testing the gate/decode/invoke/classify sequence without a
/// background thread.
pub fn deliver_one<T, H>(queue: &QueueHandle, m: Message, max_attempts: u64, handler: &H, context: &str) -> Outcome
where
    T: DeserializeOwned,
    H: Fn(&Message, T) -> Result<(), HandlerError>,
{
    let m = match apply_gates(queue, m, max_attempts, context) {
        Ok(m) => m,
        Err(outcome) => return outcome,
    };

    let value = match decode_payload::<T>(queue, &m, context) {
        Some(v) => v,
        None => return Outcome::DecodeFailed,
    };

    let result = handler(&m, value);
    classify(queue, m, result, context)
}

/// Start `max(1, max_process)` worker threads pulling from `queue` and
/// running `handler`. Returns their join handles; the caller typically
/// discards them and relies on `QueueHandle::close` to drain the
/// pipeline (a worker blocked in `queue.get()` unblocks once the queue
/// loop shuts down its read buffer sender, which closes the channel).
pub fn spawn_workers<T, H>(
    queue: QueueHandle,
    max_process: u64,
    max_attempts: u64,
    context: String,
    handler: H,
) -> Vec<std::thread::JoinHandle<()>>
where
    T: DeserializeOwned + 'static,
    H: Fn(&Message, T) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    let worker_count = max_process.max(1);

    (0..worker_count)
        .map(|i| {
            let queue = queue.clone();
            let handler = handler.clone();
            let context = context.clone();
            std::thread::Builder::new()
                .name(format!("depot-worker[{context}#{i}]"))
                .spawn(move || loop {
                    let Some(m) = queue.get() else {
                        log::debug!("[delivery | {context}] read buffer closed, worker exiting");
                        return;
                    };
                    deliver_one(&queue, m, max_attempts, handler.as_ref(), &context);
                })
                .expect("failed to spawn delivery worker thread")
        })
        .collect()
}
