//! Generic single-consumer background worker.
//!
//! # Responsibility
//! - Own one thread draining an unbounded FIFO queue of `T`.
//! - Isolate handler failures and panics from the worker loop.
//!
//! # Invariants
//! - `enqueue` never blocks and is rejected once a stop was requested.
//! - Tasks are handled one at a time, in enqueue order.
//! - State only moves forward: `Running -> Draining -> Stopped`.
//! - `stop` discards tasks still queued when the stop is observed; `drain`
//!   handles them until its deadline and discards only what is left after
//!   it. Discarded tasks are counted, never handled.

use crate::lifecycle::{join_bounded, lock_unpoisoned, JoinOutcome};
use log::{debug, error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Default dequeue timeout; bounds how long an idle worker takes to notice a
/// stop request that raced its shutdown sentinel.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub enum WorkerError {
    /// Worker no longer accepts tasks.
    Stopped,
    /// Worker thread could not be spawned.
    Spawn(std::io::Error),
}

impl Display for WorkerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "worker is stopped"),
            Self::Spawn(err) => write!(f, "failed to spawn worker thread: {err}"),
        }
    }
}

impl Error for WorkerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Stopped => None,
            Self::Spawn(err) => Some(err),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    /// Stop requested, thread not yet exited.
    Draining,
    Stopped,
}

enum Envelope<T> {
    Task(T),
    Shutdown,
}

/// What happens to queued tasks once a stop was requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum StopMode {
    #[default]
    Discard,
    /// Keep handling queued tasks until `deadline` (forever when `None`).
    Drain { deadline: Option<Instant> },
}

#[derive(Default)]
struct WorkerShared {
    stop_requested: AtomicBool,
    exited: AtomicBool,
    stop_mode: Mutex<StopMode>,
    discarded: AtomicUsize,
}

impl WorkerShared {
    /// Whether a dequeued task may still be handled.
    fn accepts_queued_work(&self) -> bool {
        if !self.stop_requested.load(Ordering::SeqCst) {
            return true;
        }
        match *lock_unpoisoned(&self.stop_mode) {
            StopMode::Discard => false,
            StopMode::Drain { deadline } => {
                deadline.map_or(true, |deadline| Instant::now() < deadline)
            }
        }
    }
}

/// Background consumer of `T` values.
pub struct Worker<T: Send + 'static> {
    name: String,
    sender: Sender<Envelope<T>>,
    shared: Arc<WorkerShared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawns the worker thread. `handler` runs once per task on that thread;
    /// returned errors are logged and the loop continues.
    pub fn spawn<F, E>(
        name: impl Into<String>,
        poll_interval: Duration,
        handler: F,
    ) -> Result<Self, WorkerError>
    where
        F: FnMut(T) -> Result<(), E> + Send + 'static,
        E: Display + 'static,
    {
        let name = name.into();
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(WorkerShared::default());

        let loop_name = name.clone();
        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("worker-{name}"))
            .spawn(move || run_loop(&loop_name, receiver, &loop_shared, poll_interval, handler))
            .map_err(WorkerError::Spawn)?;

        info!("event=worker_start module=notify status=ok worker={name}");
        Ok(Self {
            name,
            sender,
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends one task to the queue without blocking.
    pub fn enqueue(&self, task: T) -> Result<(), WorkerError> {
        if self.shared.stop_requested.load(Ordering::SeqCst) {
            return Err(WorkerError::Stopped);
        }
        self.sender
            .send(Envelope::Task(task))
            .map_err(|_| WorkerError::Stopped)
    }

    pub fn state(&self) -> WorkerState {
        if self.shared.exited.load(Ordering::SeqCst) {
            WorkerState::Stopped
        } else if self.shared.stop_requested.load(Ordering::SeqCst) {
            WorkerState::Draining
        } else {
            WorkerState::Running
        }
    }

    /// Tasks dropped unhandled because of a stop.
    pub fn discarded(&self) -> usize {
        self.shared.discarded.load(Ordering::SeqCst)
    }

    /// Requests a stop and joins the worker thread. Queued tasks that were not
    /// started yet are discarded.
    ///
    /// Waits at most `timeout` when given. Returns `false` only when the
    /// thread is still running after the timeout; a later call may retry the
    /// join. Called from the worker thread itself, the join is skipped.
    pub fn stop(&self, timeout: Option<Duration>) -> bool {
        self.request_stop(StopMode::Discard);
        self.join(timeout)
    }

    /// Rejects new tasks, handles the queued ones until `timeout` expires,
    /// then stops like `stop`.
    ///
    /// Returns `true` only when the thread exited and no task was discarded.
    /// Has no effect on the mode of a stop that was already requested.
    pub fn drain(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        self.request_stop(StopMode::Drain { deadline });
        let joined = self.join(timeout);
        let discarded = self.discarded();
        if discarded > 0 {
            warn!(
                "event=worker_drain module=notify status=incomplete worker={} discarded={discarded}",
                self.name
            );
        }
        joined && discarded == 0
    }

    fn join(&self, timeout: Option<Duration>) -> bool {
        let Some(handle) = lock_unpoisoned(&self.handle).take() else {
            return true;
        };
        match join_bounded(handle, timeout, &self.name) {
            JoinOutcome::Joined | JoinOutcome::Panicked => {
                info!("event=worker_stop module=notify status=ok worker={}", self.name);
                true
            }
            JoinOutcome::SelfJoin => {
                debug!(
                    "event=worker_stop module=notify status=self_join worker={}",
                    self.name
                );
                true
            }
            JoinOutcome::TimedOut(handle) => {
                *lock_unpoisoned(&self.handle) = Some(handle);
                false
            }
        }
    }

    /// First request wins: it fixes the stop mode and queues the sentinel
    /// behind every accepted task.
    fn request_stop(&self, mode: StopMode) {
        let mut stop_mode = lock_unpoisoned(&self.shared.stop_mode);
        if !self.shared.stop_requested.swap(true, Ordering::SeqCst) {
            *stop_mode = mode;
            drop(stop_mode);
            let _ = self.sender.send(Envelope::Shutdown);
        }
    }
}

impl<T: Send + 'static> Drop for Worker<T> {
    fn drop(&mut self) {
        self.request_stop(StopMode::Discard);
    }
}

fn run_loop<T, F, E>(
    name: &str,
    receiver: Receiver<Envelope<T>>,
    shared: &WorkerShared,
    poll_interval: Duration,
    mut handler: F,
) where
    F: FnMut(T) -> Result<(), E>,
    E: Display,
{
    let mut discarded = 0usize;
    loop {
        if !shared.accepts_queued_work() {
            break;
        }
        match receiver.recv_timeout(poll_interval) {
            Ok(Envelope::Task(task)) => {
                if !shared.accepts_queued_work() {
                    discarded += 1;
                    break;
                }
                handle_task(name, &mut handler, task);
            }
            Ok(Envelope::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => continue,
        }
    }

    discarded += receiver
        .try_iter()
        .filter(|envelope| matches!(envelope, Envelope::Task(_)))
        .count();
    if discarded > 0 {
        warn!("event=worker_stop module=notify status=discarded worker={name} tasks={discarded}");
    }
    shared.discarded.store(discarded, Ordering::SeqCst);
    shared.exited.store(true, Ordering::SeqCst);
}

fn handle_task<T, F, E>(name: &str, handler: &mut F, task: T)
where
    F: FnMut(T) -> Result<(), E>,
    E: Display,
{
    match catch_unwind(AssertUnwindSafe(|| handler(task))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!("event=worker_task module=notify status=error worker={name} error={err}");
        }
        Err(_) => {
            error!("event=worker_task module=notify status=panic worker={name}");
        }
    }
}
