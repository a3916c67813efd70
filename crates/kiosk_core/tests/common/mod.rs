#![allow(dead_code)]

use kiosk_core::model::{Account, Item, NewAccount, NewItem, TransactionRecord};
use kiosk_core::notify::{Channel, DeliveryError, DeliveryResult};
use kiosk_core::{MonthlySummary, SessionMode, SqliteStorage, Storage};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn memory_storage() -> Arc<SqliteStorage> {
    Arc::new(SqliteStorage::open_in_memory().unwrap())
}

pub fn seed_item(storage: &SqliteStorage, name: &str, price: Decimal, quantity: u32) -> Item {
    let barcode = format!("bc-{}", name.to_ascii_lowercase().replace(' ', "-"));
    storage
        .insert_item(&NewItem::new(name, "snacks", price, quantity, barcode))
        .unwrap()
}

pub fn seed_account(storage: &SqliteStorage, account: NewAccount) -> Account {
    storage.insert_account(&account).unwrap()
}

pub fn item_quantity(storage: &SqliteStorage, item_id: i64) -> u32 {
    let session = storage.begin(SessionMode::Read).unwrap();
    session.get_item_by_id(item_id).unwrap().unwrap().quantity
}

pub fn account_credit(storage: &SqliteStorage, account_id: i64) -> Decimal {
    let session = storage.begin(SessionMode::Read).unwrap();
    session.get_account_by_id(account_id).unwrap().unwrap().credit
}

pub fn transactions_for(storage: &SqliteStorage, account_id: i64) -> Vec<TransactionRecord> {
    let session = storage.begin(SessionMode::Read).unwrap();
    session.list_transactions_for_account(account_id).unwrap()
}

/// One call observed by `RecordingChannel`.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Message {
        recipient: String,
        body: String,
        subject: Option<String>,
    },
    LowBalance {
        recipient: String,
        balance: Decimal,
        language: String,
    },
    LowStock {
        recipient: String,
        product_name: String,
        available_quantity: u32,
    },
    Summary {
        recipient: String,
        summary: MonthlySummary,
    },
}

impl Delivery {
    pub fn recipient(&self) -> &str {
        match self {
            Self::Message { recipient, .. }
            | Self::LowBalance { recipient, .. }
            | Self::LowStock { recipient, .. }
            | Self::Summary { recipient, .. } => recipient,
        }
    }
}

/// Channel test double that records deliveries and can fail on demand.
pub struct RecordingChannel {
    name: String,
    failing_recipients: BTreeSet<String>,
    /// Time every delivery takes, like a slow transport.
    delay: Duration,
    deliveries: Mutex<Vec<Delivery>>,
    changed: Condvar,
}

impl RecordingChannel {
    pub fn new(name: &str) -> Arc<Self> {
        Self::failing_for(name, &[])
    }

    /// Deliveries to any of `recipients` return an error (and are not
    /// recorded).
    pub fn failing_for(name: &str, recipients: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failing_recipients: recipients.iter().map(|value| value.to_string()).collect(),
            delay: Duration::ZERO,
            deliveries: Mutex::new(Vec::new()),
            changed: Condvar::new(),
        })
    }

    /// Every delivery sleeps `delay` before it is recorded.
    pub fn slow(name: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            failing_recipients: BTreeSet::new(),
            delay,
            deliveries: Mutex::new(Vec::new()),
            changed: Condvar::new(),
        })
    }

    pub fn as_channel(self: &Arc<Self>) -> Arc<dyn Channel> {
        Arc::clone(self) as Arc<dyn Channel>
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Waits until at least `count` deliveries were recorded.
    pub fn wait_for(&self, count: usize) -> Vec<Delivery> {
        let deadline = Instant::now() + WAIT;
        let mut deliveries = self.deliveries.lock().unwrap();
        while deliveries.len() < count {
            let now = Instant::now();
            assert!(
                now < deadline,
                "timed out waiting for {count} deliveries on {}, got {:?}",
                self.name,
                *deliveries
            );
            deliveries = self.changed.wait_timeout(deliveries, deadline - now).unwrap().0;
        }
        deliveries.clone()
    }

    fn record(&self, recipient: &str, delivery: Delivery) -> DeliveryResult {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.failing_recipients.contains(recipient) {
            return Err(DeliveryError::Transport(format!("refused {recipient}")));
        }
        self.deliveries.lock().unwrap().push(delivery);
        self.changed.notify_all();
        Ok(())
    }
}

impl Channel for RecordingChannel {
    fn channel_type(&self) -> &str {
        &self.name
    }

    fn send_message(&self, recipient: &str, body: &str, subject: Option<&str>) -> DeliveryResult {
        self.record(
            recipient,
            Delivery::Message {
                recipient: recipient.to_string(),
                body: body.to_string(),
                subject: subject.map(str::to_string),
            },
        )
    }

    fn notify_low_balance(
        &self,
        recipient: &str,
        balance: Decimal,
        language: &str,
    ) -> DeliveryResult {
        self.record(
            recipient,
            Delivery::LowBalance {
                recipient: recipient.to_string(),
                balance,
                language: language.to_string(),
            },
        )
    }

    fn notify_low_stock(
        &self,
        recipient: &str,
        product_name: &str,
        available_quantity: u32,
        _language: &str,
    ) -> DeliveryResult {
        self.record(
            recipient,
            Delivery::LowStock {
                recipient: recipient.to_string(),
                product_name: product_name.to_string(),
                available_quantity,
            },
        )
    }

    fn send_monthly_summary(
        &self,
        recipient: &str,
        summary: &MonthlySummary,
        _language: &str,
    ) -> DeliveryResult {
        self.record(
            recipient,
            Delivery::Summary {
                recipient: recipient.to_string(),
                summary: summary.clone(),
            },
        )
    }
}
