//! Asynchronous multi-channel notification dispatch.
//!
//! # Responsibility
//! - Define the `Channel` contract implemented by every delivery medium.
//! - Provide the log, email (SMTP) and Mattermost media.
//! - Run one background worker per channel (`ChannelWorker`).
//! - Fan notifications out through the `NotificationRegistry`.
//!
//! # Invariants
//! - Producers never block on delivery; delivery failures are logged and
//!   never reach the producer.
//! - Tasks on one channel are delivered in FIFO order; there is no ordering
//!   across channels.

pub mod channel;
pub mod channel_worker;
pub mod email;
pub mod mattermost;
pub mod message;
pub mod registry;
pub mod task;
pub mod worker;

pub use channel::{Channel, ChannelSetupError, DeliveryError, DeliveryResult, LogChannel};
pub use channel_worker::ChannelWorker;
pub use email::{EmailChannel, EMAIL_CHANNEL};
pub use mattermost::{MattermostChannel, MATTERMOST_CHANNEL};
pub use message::RenderedMessage;
pub use registry::{ChannelSelection, NotificationRegistry, RegistryError};
pub use task::{NotificationKind, NotificationTask};
pub use worker::{Worker, WorkerError, WorkerState, DEFAULT_POLL_INTERVAL};
