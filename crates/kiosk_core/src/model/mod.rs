//! Kiosk domain model shared by checkout, notification and summary paths.
//!
//! # Responsibility
//! - Define the records the core reads and mutates (items, accounts,
//!   transaction records) plus the transient cart shape.
//! - Provide validation for seed/admin input before it reaches storage.
//!
//! # Invariants
//! - Item quantities are unsigned; stock can never be represented as negative.
//! - Monetary values are exact decimals, never floats.
//! - Transaction records are append-only once written.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod account;
pub mod cart;
pub mod item;
pub mod transaction;

pub use account::{Account, AccountId, AccountRole, NewAccount};
pub use cart::{aggregate_demand, CartError, CartLine};
pub use item::{Item, ItemId, NewItem};
pub use transaction::{NewTransactionRecord, TransactionId, TransactionRecord};

/// Reference to one persisted entity, used by not-found errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityRef {
    Item(ItemId),
    Account(AccountId),
}

impl Display for EntityRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Item(id) => write!(f, "item {id}"),
            Self::Account(id) => write!(f, "account {id}"),
        }
    }
}

/// Validation failures for seed/admin input records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelValidationError {
    /// A required text field is blank after trimming.
    EmptyField(&'static str),
    /// Prices must be zero or positive.
    NegativePrice,
    /// Stored credit must be zero or positive.
    NegativeCredit,
    /// A notification handle has a blank channel or recipient.
    InvalidHandle { channel: String },
}

impl Display for ModelValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField(field) => write!(f, "field `{field}` must not be empty"),
            Self::NegativePrice => write!(f, "price must not be negative"),
            Self::NegativeCredit => write!(f, "credit must not be negative"),
            Self::InvalidHandle { channel } => {
                write!(f, "invalid notification handle for channel `{channel}`")
            }
        }
    }
}

impl Error for ModelValidationError {}

pub(crate) fn require_text(
    value: &str,
    field: &'static str,
) -> Result<(), ModelValidationError> {
    if value.trim().is_empty() {
        return Err(ModelValidationError::EmptyField(field));
    }
    Ok(())
}
