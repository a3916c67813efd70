//! Shared helpers for background threads owned by the core.
//!
//! # Responsibility
//! - Provide an interruptible stop signal used by sleeping loops.
//! - Provide a bounded join for `stop(timeout)` style APIs.
//!
//! # Invariants
//! - A triggered `StopSignal` stays triggered.
//! - `join_bounded` never blocks past its timeout and never panics.

use log::warn;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One-shot stop flag that sleeping threads can wait on.
#[derive(Debug, Default)]
pub struct StopSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes every waiter. Returns `false` when it was
    /// already set.
    pub fn trigger(&self) -> bool {
        let mut stopped = lock_unpoisoned(&self.stopped);
        if *stopped {
            return false;
        }
        *stopped = true;
        self.changed.notify_all();
        true
    }

    pub fn is_set(&self) -> bool {
        *lock_unpoisoned(&self.stopped)
    }

    /// Sleeps for `timeout` or until the signal is triggered.
    ///
    /// Returns `true` when the signal is set on return.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = lock_unpoisoned(&self.stopped);
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            stopped = match self.changed.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *stopped
    }
}

/// Outcome of a bounded join.
#[derive(Debug)]
pub(crate) enum JoinOutcome {
    Joined,
    /// Called from the thread being joined; nothing to wait for.
    SelfJoin,
    /// Thread panicked outside its own panic guard.
    Panicked,
    /// Thread still running when the timeout expired; the handle is returned
    /// so a later call can retry.
    TimedOut(JoinHandle<()>),
}

/// Joins `handle`, waiting at most `timeout` (forever when `None`).
///
/// `label` is only used for the timeout warning.
pub(crate) fn join_bounded(
    handle: JoinHandle<()>,
    timeout: Option<Duration>,
    label: &str,
) -> JoinOutcome {
    if handle.thread().id() == thread::current().id() {
        return JoinOutcome::SelfJoin;
    }

    if let Some(timeout) = timeout {
        let deadline = Instant::now() + timeout;
        while !handle.is_finished() {
            if Instant::now() >= deadline {
                warn!(
                    "event=thread_join module=lifecycle status=timeout thread={label} timeout_ms={}",
                    timeout.as_millis()
                );
                return JoinOutcome::TimedOut(handle);
            }
            thread::sleep(JOIN_POLL_INTERVAL);
        }
    }

    match handle.join() {
        Ok(()) => JoinOutcome::Joined,
        Err(_) => {
            warn!("event=thread_join module=lifecycle status=panicked thread={label}");
            JoinOutcome::Panicked
        }
    }
}
