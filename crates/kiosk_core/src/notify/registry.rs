//! Named channel workers with fan-out.
//!
//! # Responsibility
//! - Register/unregister channel workers under validated names.
//! - Fan one notification out to all, one, or a subset of channels.
//!
//! # Invariants
//! - Channel names are unique, lowercase `[a-z0-9_-]`.
//! - Enqueueing happens outside the registry lock, on a snapshot of workers.
//! - One failing channel never prevents delivery to the others.
//! - `stop_all` and `drain_all` are idempotent; whichever runs first decides
//!   whether queued tasks are delivered or discarded.

use crate::lifecycle::lock_unpoisoned;
use crate::notify::channel_worker::ChannelWorker;
use crate::notify::task::NotificationTask;
use crate::schedule::summary::MonthlySummary;
use log::{info, warn};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::{Duration, Instant};

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    InvalidChannelName(String),
    DuplicateChannel(String),
    ChannelNotFound(String),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidChannelName(value) => write!(f, "channel name is invalid: {value}"),
            Self::DuplicateChannel(value) => write!(f, "channel already registered: {value}"),
            Self::ChannelNotFound(value) => write!(f, "channel not found: {value}"),
        }
    }
}

impl Error for RegistryError {}

/// Which registered channels a notification goes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSelection {
    All,
    Only(BTreeSet<String>),
}

impl ChannelSelection {
    pub fn single(name: impl Into<String>) -> Self {
        Self::Only(BTreeSet::from([name.into()]))
    }

    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(names.into_iter().map(Into::into).collect())
    }
}

#[derive(Debug, Clone, Copy)]
enum StopKind {
    Discard,
    Drain,
}

impl StopKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Discard => "discard",
            Self::Drain => "drain",
        }
    }
}

/// Registry of channel workers, shared through `Arc`.
#[derive(Default)]
pub struct NotificationRegistry {
    workers: RwLock<BTreeMap<String, Arc<ChannelWorker>>>,
    /// Serializes `unregister`, `stop_all` and `drain_all`.
    lifecycle: Mutex<()>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker under `name`, or under its channel type when no
    /// name is given. Returns the name used.
    pub fn register(
        &self,
        worker: ChannelWorker,
        name: Option<&str>,
    ) -> Result<String, RegistryError> {
        let name = name
            .unwrap_or_else(|| worker.channel_type())
            .trim()
            .to_string();
        if !is_valid_channel_name(&name) {
            return Err(RegistryError::InvalidChannelName(name));
        }

        let mut workers = self.write_workers();
        if workers.contains_key(name.as_str()) {
            return Err(RegistryError::DuplicateChannel(name));
        }
        workers.insert(name.clone(), Arc::new(worker));
        info!("event=channel_register module=notify status=ok channel={name}");
        Ok(name)
    }

    /// Stops the named worker, then removes it.
    pub fn unregister(&self, name: &str, timeout: Option<Duration>) -> Result<(), RegistryError> {
        let _guard = lock_unpoisoned(&self.lifecycle);
        let name = name.trim();
        let worker = self
            .read_workers()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ChannelNotFound(name.to_string()))?;

        worker.stop(timeout);
        self.write_workers().remove(name);
        info!("event=channel_unregister module=notify status=ok channel={name}");
        Ok(())
    }

    /// Sorted channel names.
    pub fn channel_names(&self) -> Vec<String> {
        self.read_workers().keys().cloned().collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read_workers().contains_key(name.trim())
    }

    pub fn len(&self) -> usize {
        self.read_workers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_workers().is_empty()
    }

    pub fn send(
        &self,
        recipient: &str,
        body: &str,
        subject: Option<&str>,
        selection: &ChannelSelection,
    ) -> usize {
        self.fan_out(selection, "send_message", || {
            NotificationTask::message(recipient, body, subject.map(str::to_string))
        })
    }

    pub fn notify_low_balance_all(
        &self,
        recipient: &str,
        balance: Decimal,
        language: &str,
        selection: &ChannelSelection,
    ) -> usize {
        self.fan_out(selection, "low_balance", || {
            NotificationTask::low_balance(recipient, balance, language)
        })
    }

    pub fn notify_low_stock_all(
        &self,
        recipient: &str,
        product_name: &str,
        available_quantity: u32,
        language: &str,
        selection: &ChannelSelection,
    ) -> usize {
        self.fan_out(selection, "low_stock", || {
            NotificationTask::low_stock(recipient, product_name, available_quantity, language)
        })
    }

    pub fn send_monthly_summary_all(
        &self,
        recipient: &str,
        summary: &MonthlySummary,
        language: &str,
        selection: &ChannelSelection,
    ) -> usize {
        self.fan_out(selection, "monthly_summary", || {
            NotificationTask::monthly_summary(recipient, summary.clone(), language)
        })
    }

    /// Stops every registered worker. Workers stay registered but reject new
    /// tasks. Returns `false` when some worker did not stop within `timeout`
    /// (shared across all workers).
    pub fn stop_all(&self, timeout: Option<Duration>) -> bool {
        self.shut_down_all(timeout, StopKind::Discard)
    }

    /// Like `stop_all`, but every worker first delivers its queued tasks.
    ///
    /// Workers drain concurrently against one shared deadline. Returns
    /// `false` when some worker did not finish its queue in time.
    pub fn drain_all(&self, timeout: Option<Duration>) -> bool {
        self.shut_down_all(timeout, StopKind::Drain)
    }

    fn shut_down_all(&self, timeout: Option<Duration>, kind: StopKind) -> bool {
        let _guard = lock_unpoisoned(&self.lifecycle);
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let remaining =
            || deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let workers = self.snapshot(&ChannelSelection::All);

        let all_stopped = match kind {
            StopKind::Discard => workers.iter().fold(true, |all, (name, worker)| {
                let stopped = worker.stop(remaining());
                if !stopped {
                    warn!("event=channel_stop module=notify status=timeout channel={name}");
                }
                all && stopped
            }),
            StopKind::Drain => thread::scope(|scope| {
                let drains: Vec<_> = workers
                    .iter()
                    .map(|(name, worker)| {
                        let timeout = remaining();
                        (name, scope.spawn(move || worker.drain(timeout)))
                    })
                    .collect();
                drains.into_iter().fold(true, |all, (name, drain)| {
                    let drained = drain.join().unwrap_or(false);
                    if !drained {
                        warn!("event=channel_stop module=notify status=incomplete channel={name}");
                    }
                    all && drained
                })
            }),
        };
        info!(
            "event=registry_stop module=notify status=ok mode={} all_stopped={all_stopped}",
            kind.as_str()
        );
        all_stopped
    }

    fn fan_out(
        &self,
        selection: &ChannelSelection,
        kind: &str,
        mut make_task: impl FnMut() -> NotificationTask,
    ) -> usize {
        let mut enqueued = 0;
        for (name, worker) in self.snapshot(selection) {
            match worker.enqueue(make_task()) {
                Ok(()) => enqueued += 1,
                Err(err) => warn!(
                    "event=notification_enqueue module=notify status=error channel={name} kind={kind} error={err}"
                ),
            }
        }
        enqueued
    }

    fn snapshot(&self, selection: &ChannelSelection) -> Vec<(String, Arc<ChannelWorker>)> {
        let workers = self.read_workers();
        match selection {
            ChannelSelection::All => workers
                .iter()
                .map(|(name, worker)| (name.clone(), Arc::clone(worker)))
                .collect(),
            ChannelSelection::Only(names) => names
                .iter()
                .filter_map(|name| match workers.get(name.as_str()) {
                    Some(worker) => Some((name.clone(), Arc::clone(worker))),
                    None => {
                        warn!(
                            "event=notification_enqueue module=notify status=skipped reason=unknown_channel channel={name}"
                        );
                        None
                    }
                })
                .collect(),
        }
    }

    fn read_workers(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<ChannelWorker>>> {
        self.workers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_workers(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<ChannelWorker>>> {
        self.workers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_valid_channel_name(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-')
}
