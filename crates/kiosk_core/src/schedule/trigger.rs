//! Periodic job trigger.
//!
//! # Responsibility
//! - Compute fire times for a calendar (`Monthly`) or fixed (`Interval`)
//!   schedule.
//! - Run one job callback per fire on a dedicated scheduler thread.
//!
//! # Invariants
//! - Fires are strictly increasing in time; one scheduled instant fires at
//!   most once.
//! - `shutdown` wakes the scheduler immediately; after it returns (without
//!   timing out) the job never fires again.
//! - A panicking job is logged and the schedule continues.

use crate::lifecycle::{join_bounded, lock_unpoisoned, JoinOutcome, StopSignal};
use chrono::{Datelike, Local, Months, NaiveDate, NaiveDateTime};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Longest single sleep; wall-clock changes are picked up at this cadence.
const MAX_SLEEP: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum TriggerError {
    InvalidSchedule(String),
    AlreadyStarted,
    /// `start` after `shutdown`.
    ShutDown,
    Spawn(std::io::Error),
}

impl Display for TriggerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidSchedule(message) => write!(f, "invalid schedule: {message}"),
            Self::AlreadyStarted => write!(f, "trigger already started"),
            Self::ShutDown => write!(f, "trigger was shut down"),
            Self::Spawn(err) => write!(f, "failed to spawn scheduler thread: {err}"),
        }
    }
}

impl Error for TriggerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            _ => None,
        }
    }
}

/// When a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Once a month at `day` (1..=28) `hour:minute`, kiosk local time.
    Monthly { day: u32, hour: u32, minute: u32 },
    /// Every `Duration` after the previous fire.
    Interval(Duration),
}

impl Schedule {
    /// First day of every month at midnight.
    pub const MONTHLY_DEFAULT: Self = Self::Monthly {
        day: 1,
        hour: 0,
        minute: 0,
    };

    pub fn validate(&self) -> Result<(), TriggerError> {
        match *self {
            Self::Monthly { day, hour, minute } => {
                if !(1..=28).contains(&day) {
                    return Err(TriggerError::InvalidSchedule(format!(
                        "day {day} must be within 1..=28"
                    )));
                }
                if hour > 23 || minute > 59 {
                    return Err(TriggerError::InvalidSchedule(format!(
                        "time {hour}:{minute} is out of range"
                    )));
                }
                Ok(())
            }
            Self::Interval(interval) => {
                if interval.is_zero() {
                    return Err(TriggerError::InvalidSchedule(
                        "interval must be positive".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Next fire time strictly after `after`, or `None` for an invalid
    /// schedule.
    pub fn next_fire_after(&self, after: NaiveDateTime) -> Option<NaiveDateTime> {
        match *self {
            Self::Monthly { day, hour, minute } => {
                let this_month = NaiveDate::from_ymd_opt(after.year(), after.month(), day)?
                    .and_hms_opt(hour, minute, 0)?;
                if this_month > after {
                    return Some(this_month);
                }
                this_month.checked_add_months(Months::new(1))
            }
            Self::Interval(interval) => {
                let step = chrono::Duration::from_std(interval).ok()?;
                if step <= chrono::Duration::zero() {
                    return None;
                }
                after.checked_add_signed(step)
            }
        }
    }
}

type Job = Box<dyn FnMut() + Send + 'static>;

/// Runs a job on its schedule until shut down.
pub struct PeriodicJobTrigger {
    name: String,
    schedule: Schedule,
    job: Mutex<Option<Job>>,
    stop: Arc<StopSignal>,
    fires: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicJobTrigger {
    pub fn new(
        name: impl Into<String>,
        schedule: Schedule,
        job: impl FnMut() + Send + 'static,
    ) -> Result<Self, TriggerError> {
        schedule.validate()?;
        Ok(Self {
            name: name.into(),
            schedule,
            job: Mutex::new(Some(Box::new(job))),
            stop: Arc::new(StopSignal::new()),
            fires: Arc::new(AtomicU64::new(0)),
            handle: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schedule(&self) -> Schedule {
        self.schedule
    }

    /// Number of completed job runs (panicked runs included).
    pub fn fire_count(&self) -> u64 {
        self.fires.load(Ordering::SeqCst)
    }

    /// Spawns the scheduler thread. A trigger starts at most once.
    pub fn start(&self) -> Result<(), TriggerError> {
        if self.stop.is_set() {
            return Err(TriggerError::ShutDown);
        }
        let mut job_slot = lock_unpoisoned(&self.job);
        let Some(job) = job_slot.take() else {
            return Err(TriggerError::AlreadyStarted);
        };

        let name = self.name.clone();
        let schedule = self.schedule;
        let stop = Arc::clone(&self.stop);
        let fires = Arc::clone(&self.fires);
        let spawned = thread::Builder::new()
            .name(format!("trigger-{}", self.name))
            .spawn(move || run_schedule(&name, schedule, job, &stop, &fires));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                error!(
                    "event=trigger_start module=schedule status=error trigger={} error={err}",
                    self.name
                );
                return Err(TriggerError::Spawn(err));
            }
        };

        *lock_unpoisoned(&self.handle) = Some(handle);
        info!(
            "event=trigger_start module=schedule status=ok trigger={} schedule={:?}",
            self.name, self.schedule
        );
        Ok(())
    }

    /// Stops the scheduler and joins it (bounded by `timeout`). Idempotent;
    /// returns `false` only when the thread is still running at the timeout.
    pub fn shutdown(&self, timeout: Option<Duration>) -> bool {
        if self.stop.trigger() {
            info!(
                "event=trigger_shutdown module=schedule status=requested trigger={}",
                self.name
            );
        }
        let Some(handle) = lock_unpoisoned(&self.handle).take() else {
            return true;
        };
        match join_bounded(handle, timeout, &self.name) {
            JoinOutcome::Joined | JoinOutcome::Panicked | JoinOutcome::SelfJoin => true,
            JoinOutcome::TimedOut(handle) => {
                *lock_unpoisoned(&self.handle) = Some(handle);
                false
            }
        }
    }
}

impl Drop for PeriodicJobTrigger {
    fn drop(&mut self) {
        self.stop.trigger();
    }
}

fn run_schedule(
    name: &str,
    schedule: Schedule,
    mut job: Job,
    stop: &StopSignal,
    fires: &AtomicU64,
) {
    let mut cursor = Local::now().naive_local();
    loop {
        let Some(next) = schedule.next_fire_after(cursor) else {
            error!("event=trigger_fire module=schedule status=error trigger={name} reason=no_next_fire");
            return;
        };
        if !sleep_until(next, stop) {
            return;
        }

        info!("event=trigger_fire module=schedule status=start trigger={name} scheduled_at={next}");
        if catch_unwind(AssertUnwindSafe(|| job())).is_err() {
            warn!("event=trigger_fire module=schedule status=panic trigger={name}");
        }
        fires.fetch_add(1, Ordering::SeqCst);
        cursor = next.max(Local::now().naive_local());
    }
}

/// Returns `false` when the stop signal interrupted the wait.
fn sleep_until(deadline: NaiveDateTime, stop: &StopSignal) -> bool {
    loop {
        if stop.is_set() {
            return false;
        }
        let now = Local::now().naive_local();
        if now >= deadline {
            return true;
        }
        let wait = (deadline - now).to_std().unwrap_or(Duration::ZERO);
        if stop.wait_timeout(wait.min(MAX_SLEEP)) {
            return false;
        }
    }
}
