//! Continuous identity-token reader with callback fan-out.
//!
//! # Responsibility
//! - Poll a `TokenDriver` on a dedicated thread.
//! - Keep the latest token and notify registered callbacks on every read.
//!
//! # Invariants
//! - The latest token and the callback list share one mutex; callbacks always
//!   run on the reader thread, outside that mutex.
//! - Driver errors and panics, as well as callback panics, never end the read
//!   loop.
//! - No callback starts once a stop was requested.

use crate::lifecycle::{join_bounded, lock_unpoisoned, JoinOutcome, StopSignal};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Failure reported by the token hardware.
#[derive(Debug)]
pub enum HardwareError {
    Driver(String),
    Io(std::io::Error),
}

impl Display for HardwareError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Driver(message) => write!(f, "token driver error: {message}"),
            Self::Io(err) => write!(f, "token driver io error: {err}"),
        }
    }
}

impl Error for HardwareError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Driver(_) => None,
            Self::Io(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for HardwareError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Hardware scanner contract.
pub trait TokenDriver: Send {
    /// Scans the field once. `Ok(None)` (or an empty id) means no token is
    /// present.
    fn scan_once(&mut self) -> Result<Option<Vec<u8>>, HardwareError>;
}

/// Loop pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderTiming {
    /// Pause after a successful read, so one presented token is not read in a
    /// tight loop.
    pub after_read: Duration,
    /// Pause when no token is present.
    pub idle: Duration,
    /// Pause after a driver failure.
    pub error_backoff: Duration,
}

impl Default for ReaderTiming {
    fn default() -> Self {
        Self {
            after_read: Duration::from_millis(500),
            idle: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

pub type TokenCallback = Arc<dyn Fn(&str) + Send + Sync + 'static>;

#[derive(Default)]
struct ReaderState {
    latest: Option<Vec<u8>>,
    callbacks: Vec<TokenCallback>,
}

struct ReaderShared {
    state: Mutex<ReaderState>,
    stop: StopSignal,
}

/// Running token reader.
pub struct EventSource {
    shared: Arc<ReaderShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventSource {
    /// Spawns the reader thread.
    pub fn start<D>(driver: D, timing: ReaderTiming) -> std::io::Result<Self>
    where
        D: TokenDriver + 'static,
    {
        Self::start_with_callbacks(driver, timing, Vec::new())
    }

    /// Spawns the reader thread with `callbacks` already registered, so the
    /// very first read is delivered.
    pub fn start_with_callbacks<D>(
        driver: D,
        timing: ReaderTiming,
        callbacks: Vec<TokenCallback>,
    ) -> std::io::Result<Self>
    where
        D: TokenDriver + 'static,
    {
        let shared = Arc::new(ReaderShared {
            state: Mutex::new(ReaderState {
                latest: None,
                callbacks,
            }),
            stop: StopSignal::new(),
        });
        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("token-reader".to_string())
            .spawn(move || read_loop(driver, timing, &loop_shared))?;

        info!("event=reader_start module=reader status=ok");
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Adds a callback invoked with the lowercase hex token on every read.
    pub fn register_callback(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        lock_unpoisoned(&self.shared.state)
            .callbacks
            .push(Arc::new(callback));
    }

    pub fn latest_token(&self) -> Option<Vec<u8>> {
        lock_unpoisoned(&self.shared.state).latest.clone()
    }

    pub fn latest_token_hex(&self) -> Option<String> {
        lock_unpoisoned(&self.shared.state)
            .latest
            .as_deref()
            .map(hex::encode)
    }

    pub fn is_running(&self) -> bool {
        lock_unpoisoned(&self.handle)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the reader and joins its thread (bounded by `timeout`).
    ///
    /// Idempotent. Called from a callback on the reader thread, the join is
    /// skipped. Returns `false` only when the thread is still running at the
    /// timeout.
    pub fn stop(&self, timeout: Option<Duration>) -> bool {
        if self.shared.stop.trigger() {
            info!("event=reader_stop module=reader status=requested");
        }
        let Some(handle) = lock_unpoisoned(&self.handle).take() else {
            return true;
        };
        match join_bounded(handle, timeout, "token-reader") {
            JoinOutcome::Joined | JoinOutcome::Panicked | JoinOutcome::SelfJoin => true,
            JoinOutcome::TimedOut(handle) => {
                warn!("event=reader_stop module=reader status=timeout");
                *lock_unpoisoned(&self.handle) = Some(handle);
                false
            }
        }
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.shared.stop.trigger();
    }
}

fn read_loop<D: TokenDriver>(mut driver: D, timing: ReaderTiming, shared: &ReaderShared) {
    while !shared.stop.is_set() {
        let scanned = catch_unwind(AssertUnwindSafe(|| driver.scan_once()));
        let pause = match scanned {
            Ok(Ok(Some(token))) if !token.is_empty() => {
                let callbacks = {
                    let mut state = lock_unpoisoned(&shared.state);
                    state.latest = Some(token.clone());
                    state.callbacks.clone()
                };
                notify_callbacks(&callbacks, &hex::encode(&token), shared);
                timing.after_read
            }
            Ok(Ok(_)) => timing.idle,
            Ok(Err(err)) => {
                error!("event=reader_scan module=reader status=error error={err}");
                timing.error_backoff
            }
            Err(_) => {
                error!("event=reader_scan module=reader status=panic");
                timing.error_backoff
            }
        };
        if shared.stop.wait_timeout(pause) {
            break;
        }
    }
    debug!("event=reader_loop module=reader status=exited");
}

fn notify_callbacks(callbacks: &[TokenCallback], token_hex: &str, shared: &ReaderShared) {
    for callback in callbacks {
        if shared.stop.is_set() {
            return;
        }
        if catch_unwind(AssertUnwindSafe(|| callback(token_hex))).is_err() {
            error!("event=reader_callback module=reader status=panic");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EventSource, HardwareError, ReaderTiming, TokenDriver};
    use std::time::{Duration, Instant};

    struct NeverPresent;

    impl TokenDriver for NeverPresent {
        fn scan_once(&mut self) -> Result<Option<Vec<u8>>, HardwareError> {
            Ok(None)
        }
    }

    #[test]
    fn default_timing_matches_reader_pacing() {
        let timing = ReaderTiming::default();
        assert_eq!(timing.after_read, Duration::from_millis(500));
        assert_eq!(timing.idle, Duration::from_millis(100));
        assert_eq!(timing.error_backoff, Duration::from_secs(1));
    }

    #[test]
    fn stop_is_prompt_and_idempotent() {
        let source =
            EventSource::start(NeverPresent, ReaderTiming::default()).expect("reader starts");
        assert!(source.latest_token_hex().is_none());

        let started = Instant::now();
        assert!(source.stop(Some(Duration::from_secs(5))));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(source.stop(Some(Duration::from_secs(5))));
        assert!(!source.is_running());
    }
}
