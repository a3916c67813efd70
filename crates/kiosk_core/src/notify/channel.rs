//! Notification channel contract.
//!
//! # Responsibility
//! - Define the operations every delivery medium implements.
//! - Provide `LogChannel`, a medium that renders notifications into the log.
//!
//! # Invariants
//! - Channels are shared across threads (`Send + Sync`) and may be invoked
//!   from their worker thread only; implementations need no extra locking
//!   for that, but must not assume the caller's thread.
//! - Delivery is at-most-once: callers never retry a failed delivery.

use crate::schedule::summary::MonthlySummary;
use log::{info, warn};
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure reported by a channel for one delivery attempt.
#[derive(Debug)]
pub enum DeliveryError {
    /// Recipient handle is not usable on this channel.
    InvalidRecipient(String),
    /// Medium-side failure (transport, remote rejection, ...).
    Transport(String),
}

impl Display for DeliveryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRecipient(recipient) => write!(f, "invalid recipient `{recipient}`"),
            Self::Transport(message) => write!(f, "delivery failed: {message}"),
        }
    }
}

impl Error for DeliveryError {}

pub type DeliveryResult = Result<(), DeliveryError>;

/// A configured channel could not be constructed.
#[derive(Debug)]
pub struct ChannelSetupError {
    pub channel: &'static str,
    pub message: String,
}

impl ChannelSetupError {
    pub fn new(channel: &'static str, message: impl Into<String>) -> Self {
        Self {
            channel,
            message: message.into(),
        }
    }
}

impl Display for ChannelSetupError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to set up {} channel: {}", self.channel, self.message)
    }
}

impl Error for ChannelSetupError {}

/// One delivery medium (email, chat, ...).
pub trait Channel: Send + Sync {
    /// Stable medium name; also the default registry name.
    fn channel_type(&self) -> &str;

    fn send_message(&self, recipient: &str, body: &str, subject: Option<&str>) -> DeliveryResult;

    fn notify_low_balance(&self, recipient: &str, balance: Decimal, language: &str)
        -> DeliveryResult;

    fn notify_low_stock(
        &self,
        recipient: &str,
        product_name: &str,
        available_quantity: u32,
        language: &str,
    ) -> DeliveryResult;

    /// Media without a summary format keep this default and skip the task.
    fn send_monthly_summary(
        &self,
        recipient: &str,
        summary: &MonthlySummary,
        language: &str,
    ) -> DeliveryResult {
        let _ = (recipient, summary, language);
        warn!(
            "event=channel_deliver module=notify status=unsupported channel={} kind=monthly_summary",
            self.channel_type()
        );
        Ok(())
    }
}

/// Channel that writes plain-text notifications to the log.
#[derive(Debug, Clone)]
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogChannel {
    fn default() -> Self {
        Self::new("log")
    }
}

impl Channel for LogChannel {
    fn channel_type(&self) -> &str {
        &self.name
    }

    fn send_message(&self, recipient: &str, body: &str, subject: Option<&str>) -> DeliveryResult {
        info!(
            "event=notification module=notify channel={} kind=send_message recipient={recipient} subject={} body_chars={}",
            self.name,
            subject.unwrap_or("-"),
            body.chars().count()
        );
        Ok(())
    }

    fn notify_low_balance(
        &self,
        recipient: &str,
        balance: Decimal,
        language: &str,
    ) -> DeliveryResult {
        info!(
            "event=notification module=notify channel={} kind=low_balance recipient={recipient} language={language} balance={balance}",
            self.name
        );
        Ok(())
    }

    fn notify_low_stock(
        &self,
        recipient: &str,
        product_name: &str,
        available_quantity: u32,
        language: &str,
    ) -> DeliveryResult {
        info!(
            "event=notification module=notify channel={} kind=low_stock recipient={recipient} language={language} product={product_name} available={available_quantity}",
            self.name
        );
        Ok(())
    }

    fn send_monthly_summary(
        &self,
        recipient: &str,
        summary: &MonthlySummary,
        language: &str,
    ) -> DeliveryResult {
        info!(
            "event=notification module=notify channel={} kind=monthly_summary recipient={recipient} language={language} period_start={} period_end={} total_spent={} transactions={} products={}",
            self.name,
            summary.period_start,
            summary.period_end,
            summary.total_spent,
            summary.transaction_count,
            summary.products.len()
        );
        Ok(())
    }
}
