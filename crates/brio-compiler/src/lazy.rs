//! Rendezvous for functions that compile lazily.
//!
//! When a call site needs a function whose artifact another thread is still
//! compiling, the caller parks here instead of kicking off a duplicate
//! compilation. Publication is one-way: once a function is announced ready
//! it never becomes unready, so waiters can check once under the lock and
//! then sleep on the condvar.

use crate::error::DriverError;
use std::collections::HashSet;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Default)]
pub struct FunctionDirectory {
    ready: Mutex<HashSet<String>>,
    cond: Condvar,
}

impl FunctionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Announce that a function's artifact is loaded and callable.
    pub fn publish(&self, name: &str) {
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        if ready.insert(name.to_string()) {
            debug!(function = name, "published");
        }
        self.cond.notify_all();
    }

    pub fn is_ready(&self, name: &str) -> bool {
        let ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        ready.contains(name)
    }

    /// Block until the function is published or the timeout elapses. The
    /// timeout produces its own error kind so callers can tell a slow
    /// sibling compilation apart from a failed one.
    pub fn wait_ready(&self, name: &str, timeout: Duration) -> Result<(), DriverError> {
        let start = Instant::now();
        let mut ready = self.ready.lock().unwrap_or_else(|e| e.into_inner());
        while !ready.contains(name) {
            let elapsed = start.elapsed();
            if elapsed >= timeout {
                warn!(function = name, ?elapsed, "gave up waiting for lazy compilation");
                return Err(DriverError::LazyWaitTimeout { waited: elapsed });
            }
            let remaining = timeout - elapsed;
            let (guard, _timed_out) = self
                .cond
                .wait_timeout(ready, remaining)
                .unwrap_or_else(|e| e.into_inner());
            ready = guard;
        }
        Ok(())
    }
}
