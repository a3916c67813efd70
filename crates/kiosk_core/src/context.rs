//! Explicit application context.
//!
//! # Responsibility
//! - Build every long-lived kiosk component from one `KioskConfig`.
//! - Tear the components down in a fixed order on `shutdown`.
//!
//! # Invariants
//! - Shutdown order: token reader, then periodic trigger, then channel
//!   workers; each step is bounded by the remaining timeout.
//! - Channel workers deliver their queued notifications before they exit;
//!   a shutdown that had to drop notifications is reported as not clean.
//! - `shutdown` is idempotent and also runs on drop.
//! - A context that failed to build leaves no background thread running.

use crate::checkout::TransactionEngine;
use crate::config::{ConfigError, KioskConfig};
use crate::lifecycle::lock_unpoisoned;
use crate::model::Account;
use crate::notify::{
    Channel, ChannelSetupError, ChannelWorker, EmailChannel, LogChannel, MattermostChannel,
    NotificationRegistry, RegistryError, WorkerError, EMAIL_CHANNEL, MATTERMOST_CHANNEL,
};
use crate::reader::{EventSource, TokenCallback, TokenDriver};
use crate::repo::{RepoResult, SessionMode, Storage};
use crate::schedule::{MonthlySummaryJob, PeriodicJobTrigger, TriggerError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Bound used when shutdown happens implicitly (drop, failed build).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

const MONTHLY_SUMMARY_TRIGGER: &str = "monthly-summary";

#[derive(Debug)]
pub enum ContextError {
    Config(ConfigError),
    Channel(ChannelSetupError),
    Worker(WorkerError),
    Registry(RegistryError),
    Trigger(TriggerError),
    Reader(std::io::Error),
    ReaderAlreadyAttached,
    ShutDown,
}

impl Display for ContextError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Channel(err) => write!(f, "{err}"),
            Self::Worker(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::Trigger(err) => write!(f, "{err}"),
            Self::Reader(err) => write!(f, "failed to start token reader: {err}"),
            Self::ReaderAlreadyAttached => write!(f, "token reader already attached"),
            Self::ShutDown => write!(f, "kiosk context is shut down"),
        }
    }
}

impl Error for ContextError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Channel(err) => Some(err),
            Self::Worker(err) => Some(err),
            Self::Registry(err) => Some(err),
            Self::Trigger(err) => Some(err),
            Self::Reader(err) => Some(err),
            Self::ReaderAlreadyAttached | Self::ShutDown => None,
        }
    }
}

impl From<ConfigError> for ContextError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<ChannelSetupError> for ContextError {
    fn from(value: ChannelSetupError) -> Self {
        Self::Channel(value)
    }
}

impl From<WorkerError> for ContextError {
    fn from(value: WorkerError) -> Self {
        Self::Worker(value)
    }
}

impl From<RegistryError> for ContextError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

impl From<TriggerError> for ContextError {
    fn from(value: TriggerError) -> Self {
        Self::Trigger(value)
    }
}

/// Owner of the engine, the notification registry, the monthly trigger and
/// the token reader.
pub struct KioskContext {
    config: KioskConfig,
    storage: Arc<dyn Storage>,
    registry: Arc<NotificationRegistry>,
    engine: TransactionEngine,
    trigger: Option<PeriodicJobTrigger>,
    reader: Mutex<Option<EventSource>>,
    shut_down: AtomicBool,
}

impl KioskContext {
    /// Builds a context with one channel per configured channel name.
    ///
    /// `email` and `mattermost` get their network media when the matching
    /// config section is present and enabled; every other name logs.
    pub fn build(config: KioskConfig, storage: Arc<dyn Storage>) -> Result<Self, ContextError> {
        config.validate()?;
        let channels = config
            .notifications
            .channels
            .iter()
            .map(|name| channel_for(&config, name))
            .collect::<Result<Vec<_>, _>>()?;
        Self::build_with_channels(config, storage, channels)
    }

    /// Builds a context around caller-provided channel implementations.
    pub fn build_with_channels(
        config: KioskConfig,
        storage: Arc<dyn Storage>,
        channels: Vec<Arc<dyn Channel>>,
    ) -> Result<Self, ContextError> {
        config.validate()?;

        let registry = Arc::new(NotificationRegistry::new());
        let trigger = match start_components(&config, &storage, &registry, channels) {
            Ok(trigger) => trigger,
            Err(err) => {
                registry.stop_all(Some(DEFAULT_SHUTDOWN_TIMEOUT));
                return Err(err);
            }
        };

        let engine = TransactionEngine::new(Arc::clone(&storage), config.notifications.policy())
            .with_notifier(Arc::clone(&registry));
        info!(
            "event=context_build module=context status=ok channels={} monthly_summary={}",
            registry.len(),
            trigger.is_some()
        );

        Ok(Self {
            config,
            storage,
            registry,
            engine,
            trigger,
            reader: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &KioskConfig {
        &self.config
    }

    pub fn engine(&self) -> &TransactionEngine {
        &self.engine
    }

    pub fn registry(&self) -> &Arc<NotificationRegistry> {
        &self.registry
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// A summary job wired like the scheduled one, for one-off runs.
    pub fn monthly_summary_job(&self) -> MonthlySummaryJob {
        MonthlySummaryJob::new(
            Arc::clone(&self.storage),
            Arc::clone(&self.registry),
            self.config.notifications.language.clone(),
        )
    }

    /// Starts the token reader and registers `on_token` as its first
    /// callback.
    pub fn attach_reader<D>(
        &self,
        driver: D,
        on_token: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<(), ContextError>
    where
        D: TokenDriver + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(ContextError::ShutDown);
        }
        let mut slot = lock_unpoisoned(&self.reader);
        if slot.is_some() {
            return Err(ContextError::ReaderAlreadyAttached);
        }

        let source = EventSource::start_with_callbacks(
            driver,
            self.config.reader.timing(),
            vec![Arc::new(on_token) as TokenCallback],
        )
        .map_err(ContextError::Reader)?;
        *slot = Some(source);
        Ok(())
    }

    /// Registers an additional callback on the attached reader.
    pub fn on_token(
        &self,
        callback: impl Fn(&str) + Send + Sync + 'static,
    ) -> Result<(), ContextError> {
        match lock_unpoisoned(&self.reader).as_ref() {
            Some(source) => {
                source.register_callback(callback);
                Ok(())
            }
            None => Err(ContextError::ShutDown),
        }
    }

    pub fn latest_token_hex(&self) -> Option<String> {
        lock_unpoisoned(&self.reader)
            .as_ref()
            .and_then(EventSource::latest_token_hex)
    }

    /// Resolves the account that owns a scanned token.
    pub fn login(&self, token_hex: &str) -> RepoResult<Option<Account>> {
        let session = self.storage.begin(SessionMode::Read)?;
        let account = session.get_account_by_token(token_hex)?;
        session.rollback()?;
        info!(
            "event=login module=context status={} account_id={}",
            if account.is_some() { "ok" } else { "unknown_token" },
            account.as_ref().map_or(-1, |account| account.id)
        );
        Ok(account)
    }

    /// Stops reader and trigger, then drains the channel workers.
    ///
    /// Returns `false` when some component did not stop within `timeout` or
    /// queued notifications had to be discarded.
    pub fn shutdown(&self, timeout: Option<Duration>) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return true;
        }
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let remaining =
            || deadline.map(|deadline| deadline.saturating_duration_since(Instant::now()));
        let mut clean = true;

        if let Some(source) = lock_unpoisoned(&self.reader).take() {
            clean &= source.stop(remaining());
        }
        if let Some(trigger) = &self.trigger {
            clean &= trigger.shutdown(remaining());
        }
        clean &= self.registry.drain_all(remaining());

        if clean {
            info!("event=context_shutdown module=context status=ok");
        } else {
            warn!("event=context_shutdown module=context status=timeout");
        }
        clean
    }
}

impl Drop for KioskContext {
    fn drop(&mut self) {
        self.shutdown(Some(DEFAULT_SHUTDOWN_TIMEOUT));
    }
}

fn channel_for(config: &KioskConfig, name: &str) -> Result<Arc<dyn Channel>, ChannelSetupError> {
    match name {
        EMAIL_CHANNEL => {
            if let Some(email) = &config.email {
                return Ok(Arc::new(EmailChannel::from_config(email)?));
            }
        }
        MATTERMOST_CHANNEL => {
            if let Some(mattermost) = config.mattermost.as_ref().filter(|section| section.enabled) {
                return Ok(Arc::new(MattermostChannel::from_config(mattermost)?));
            }
        }
        _ => return Ok(Arc::new(LogChannel::new(name))),
    }
    warn!(
        "event=channel_setup module=context status=fallback channel={name} reason=section_missing_or_disabled"
    );
    Ok(Arc::new(LogChannel::new(name)))
}

fn start_components(
    config: &KioskConfig,
    storage: &Arc<dyn Storage>,
    registry: &Arc<NotificationRegistry>,
    channels: Vec<Arc<dyn Channel>>,
) -> Result<Option<PeriodicJobTrigger>, ContextError> {
    for channel in channels {
        let worker =
            ChannelWorker::spawn_with_poll_interval(channel, config.worker.poll_interval())?;
        registry.register(worker, None)?;
    }

    if !config.monthly_summary.enabled {
        return Ok(None);
    }
    let job = MonthlySummaryJob::new(
        Arc::clone(storage),
        Arc::clone(registry),
        config.notifications.language.clone(),
    );
    let trigger = PeriodicJobTrigger::new(
        MONTHLY_SUMMARY_TRIGGER,
        config.monthly_summary.schedule(),
        job.into_trigger_job(),
    )?;
    trigger.start()?;
    Ok(Some(trigger))
}
