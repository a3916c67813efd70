//! Append-only purchase records.

use super::{AccountId, ItemId};
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type TransactionId = i64;

/// One purchased cart line, written exactly once by a successful checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub item_id: ItemId,
    /// Kiosk wall-clock time of the checkout.
    pub occurred_at: NaiveDateTime,
    pub quantity: u32,
    /// Unit price times quantity at the time of purchase.
    pub cost: Decimal,
    /// Item category copied at purchase time.
    pub category: String,
}

/// Insert shape for a transaction record; the id is assigned by storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransactionRecord {
    pub account_id: AccountId,
    pub item_id: ItemId,
    pub occurred_at: NaiveDateTime,
    pub quantity: u32,
    pub cost: Decimal,
    pub category: String,
}

impl NewTransactionRecord {
    pub(crate) fn into_record(self, id: TransactionId) -> TransactionRecord {
        TransactionRecord {
            id,
            account_id: self.account_id,
            item_id: self.item_id,
            occurred_at: self.occurred_at,
            quantity: self.quantity,
            cost: self.cost,
            category: self.category,
        }
    }
}
