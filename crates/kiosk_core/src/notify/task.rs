//! Queued notification payloads.

use crate::schedule::summary::MonthlySummary;
use rust_decimal::Decimal;
use uuid::Uuid;

/// What a channel worker should deliver.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationKind {
    SendMessage {
        body: String,
        subject: Option<String>,
    },
    LowBalance {
        balance: Decimal,
    },
    LowStock {
        product_name: String,
        available_quantity: u32,
    },
    MonthlySummary(MonthlySummary),
}

/// One unit of work for exactly one channel worker.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationTask {
    /// Correlation id for logs only.
    pub id: Uuid,
    /// Channel-specific recipient handle.
    pub recipient: String,
    pub language: String,
    pub kind: NotificationKind,
}

impl NotificationTask {
    pub fn new(
        recipient: impl Into<String>,
        language: impl Into<String>,
        kind: NotificationKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient: recipient.into(),
            language: language.into(),
            kind,
        }
    }

    pub fn message(
        recipient: impl Into<String>,
        body: impl Into<String>,
        subject: Option<String>,
    ) -> Self {
        Self::new(
            recipient,
            "",
            NotificationKind::SendMessage {
                body: body.into(),
                subject,
            },
        )
    }

    pub fn low_balance(
        recipient: impl Into<String>,
        balance: Decimal,
        language: impl Into<String>,
    ) -> Self {
        Self::new(recipient, language, NotificationKind::LowBalance { balance })
    }

    pub fn low_stock(
        recipient: impl Into<String>,
        product_name: impl Into<String>,
        available_quantity: u32,
        language: impl Into<String>,
    ) -> Self {
        Self::new(
            recipient,
            language,
            NotificationKind::LowStock {
                product_name: product_name.into(),
                available_quantity,
            },
        )
    }

    pub fn monthly_summary(
        recipient: impl Into<String>,
        summary: MonthlySummary,
        language: impl Into<String>,
    ) -> Self {
        Self::new(recipient, language, NotificationKind::MonthlySummary(summary))
    }

    /// Stable kind label used in log lines.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            NotificationKind::SendMessage { .. } => "send_message",
            NotificationKind::LowBalance { .. } => "low_balance",
            NotificationKind::LowStock { .. } => "low_stock",
            NotificationKind::MonthlySummary(_) => "monthly_summary",
        }
    }
}
