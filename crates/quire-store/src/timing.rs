//! Call timing and error reporting for store-facing operations.
//!
//! Every operation that reaches the store runs under an [`OperationTimer`].
//! The timer emits one trace record when it is dropped, so the elapsed
//! time is reported on success, on error and while unwinding alike.
//! [`timed`] adds error logging on top: the full `source()` chain is
//! written before the error is handed back unchanged.

use std::error::Error;
use std::time::Instant;

use tracing::{debug, error};

/// Scoped timer. Logs `source`, `action` and `elapsed_ms` on drop.
#[must_use = "the timer reports when it is dropped"]
pub struct OperationTimer {
    source: &'static str,
    action: String,
    start: Instant,
}

impl OperationTimer {
    pub fn start(source: &'static str, action: impl Into<String>) -> Self {
        let action = action.into();
        debug!(source, action = %action, "operation started");
        Self {
            source,
            action,
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        debug!(
            source = self.source,
            action = %self.action,
            elapsed_ms = self.elapsed_ms(),
            panicking = std::thread::panicking(),
            "operation finished"
        );
    }
}

/// Run `f` under a timer, logging any error with its cause chain.
pub fn timed<T, E, F>(source: &'static str, action: &str, f: F) -> Result<T, E>
where
    E: Error,
    F: FnOnce() -> Result<T, E>,
{
    let _timer = OperationTimer::start(source, action);
    let result = f();
    if let Err(err) = &result {
        error!(
            source,
            action,
            error = %err,
            chain = %error_chain(err),
            "operation failed"
        );
    }
    result
}

/// Record that an operation returned its empty value without querying.
pub fn expected_empty(source: &'static str, action: &str, reason: &str) {
    debug!(source, action, reason, "operation short-circuited to an empty result");
}

/// Render an error and all of its sources as `outer: inner: root`.
pub fn error_chain(err: &dyn Error) -> String {
    let mut out = err.to_string();
    let mut cause = err.source();
    while let Some(inner) = cause {
        out.push_str(": ");
        out.push_str(&inner.to_string());
        cause = inner.source();
    }
    out
}
