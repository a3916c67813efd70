//! Core of the self-checkout kiosk.
//! This crate is the single source of truth for stock, credit and
//! notification invariants; UI and hardware plug in through traits.

pub mod checkout;
pub mod config;
pub mod context;
pub mod db;
mod lifecycle;
pub mod logging;
pub mod model;
pub mod notify;
pub mod reader;
pub mod repo;
pub mod schedule;

pub use checkout::{CheckoutError, CheckoutReceipt, NotificationPolicy, TransactionEngine};
pub use config::{ConfigError, KioskConfig};
pub use context::{ContextError, KioskContext};
pub use logging::{default_log_level, init_from_config, LogSettings, LoggingError};
pub use model::{Account, AccountId, CartLine, Item, ItemId, TransactionRecord};
pub use notify::{
    Channel, ChannelSelection, ChannelWorker, EmailChannel, LogChannel, MattermostChannel,
    NotificationRegistry, NotificationTask,
};
pub use reader::{EventSource, HardwareError, ReaderTiming, TokenDriver};
pub use repo::{RepoError, RepoResult, SessionMode, SqliteStorage, Storage, StorageSession};
pub use schedule::{MonthlySummary, MonthlySummaryJob, PeriodicJobTrigger, Schedule};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
