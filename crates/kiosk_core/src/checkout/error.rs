use crate::model::{CartError, EntityRef, ItemId};
use crate::repo::RepoError;
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Why a checkout did not happen. Every variant guarantees that no stock,
/// credit or transaction record was changed.
#[derive(Debug)]
pub enum CheckoutError {
    /// Cart is invalid (empty, zero quantity, amount overflow).
    Validation(CartError),
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },
    InsufficientStock {
        item_id: ItemId,
        item_name: String,
        available: u32,
    },
    NotFound(EntityRef),
    /// Infrastructure failure; the storage session was rolled back.
    Storage(RepoError),
}

impl CheckoutError {
    /// Stable code for log lines.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
        }
    }
}

impl Display for CheckoutError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "invalid cart: {err}"),
            Self::InsufficientFunds {
                required,
                available,
            } => write!(
                f,
                "insufficient funds: required {required}, available {available}"
            ),
            Self::InsufficientStock {
                item_id,
                item_name,
                available,
            } => write!(
                f,
                "insufficient stock for `{item_name}` (item {item_id}): available {available}"
            ),
            Self::NotFound(entity) => write!(f, "{entity} not found"),
            Self::Storage(err) => write!(f, "storage failure: {err}"),
        }
    }
}

impl Error for CheckoutError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
            Self::InsufficientFunds { .. } | Self::InsufficientStock { .. } | Self::NotFound(_) => {
                None
            }
        }
    }
}

impl From<CartError> for CheckoutError {
    fn from(value: CartError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for CheckoutError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(entity) => Self::NotFound(entity),
            other => Self::Storage(other),
        }
    }
}
