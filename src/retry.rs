//! The error contract consumed from the application.
//!
//! This is the sole domain the delivery pipeline couples to outside its
//! own types: a handler returns `Result<(), Box<dyn Retryable>>`, and
//! any error is consulted through this trait to decide whether its
//! record should be re-enqueued. An error that doesn't override
//! `need_retry` is terminal: any error without an opinion on retrying
//! drops its record rather than looping on it forever.

use std::time::Duration;

/// Implemented by handler errors that want a say in retry policy.
pub trait Retryable: std::error::Error + Send + 'static {
    /// Whether this record should be re-enqueued rather than dropped.
    /// Defaults to `false` -- terminal.
    fn need_retry(&self) -> bool {
        false
    }

    /// Delay before the record becomes eligible again. `None` lets the
    /// pipeline fall back to `QueueLimits::default_retry_delay`.
    fn retry_delay(&self) -> Option<Duration> {
        None
    }

    /// When `true`, this attempt is not counted against
    /// `max_attempts` -- the pipeline decrements `attempts` before
    /// re-enqueuing.
    fn skip_retry_count(&self) -> bool {
        false
    }
}

/// A boxed handler error, as returned by application handlers.
pub type HandlerError = Box<dyn Retryable>;

/// A plain, always-terminal error, useful when a handler has nothing
/// retry-specific to say.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TerminalError(
    /// Human-readable description of what failed.
    pub String,
);

impl Retryable for TerminalError {}

/// A retryable error carrying an explicit delay.
#[derive(Debug, thiserror::Error)]
#[error("{message} (retry in {delay:?})")]
pub struct RetryError {
    /// Human-readable description of what failed.
    pub message: String,
    /// Delay before the next attempt.
    pub delay: Duration,
    /// Whether this attempt should count against `max_attempts`.
    pub skip_count: bool,
}

impl RetryError {
    /// A retryable error with the pipeline's default delay.
    pub fn new(message: impl Into<String>, delay: Duration) -> RetryError {
        RetryError {
            message: message.into(),
            delay,
            skip_count: false,
        }
    }

    /// Mark this attempt as not counting against `max_attempts`.
    pub fn skipping_retry_count(mut self) -> RetryError {
        self.skip_count = true;
        self
    }
}

impl Retryable for RetryError {
    fn need_retry(&self) -> bool {
        true
    }

    fn retry_delay(&self) -> Option<Duration> {
        Some(self.delay)
    }

    fn skip_retry_count(&self) -> bool {
        self.skip_count
    }
}
