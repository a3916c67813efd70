//! Transient shopping cart lines.
//!
//! Cart lines live only for the duration of one checkout call. The same item
//! may appear on several lines; stock checks always use the aggregated demand.

use super::ItemId;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLine {
    pub item_id: ItemId,
    pub quantity: u32,
}

impl CartLine {
    pub fn new(item_id: ItemId, quantity: u32) -> Self {
        Self { item_id, quantity }
    }
}

/// Cart shape errors, detected before any storage access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    Empty,
    NonPositiveQuantity { item_id: ItemId },
    QuantityOverflow { item_id: ItemId },
    /// Line cost or cart total exceeds the representable amount.
    AmountOverflow { item_id: ItemId },
}

impl Display for CartError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "cart is empty"),
            Self::NonPositiveQuantity { item_id } => {
                write!(f, "cart line for item {item_id} has a non-positive quantity")
            }
            Self::QuantityOverflow { item_id } => {
                write!(f, "requested quantity for item {item_id} is too large")
            }
            Self::AmountOverflow { item_id } => {
                write!(f, "cart amount overflows at item {item_id}")
            }
        }
    }
}

impl Error for CartError {}

/// Validates the cart and returns the total requested quantity per item,
/// keyed (and therefore ordered) by item id.
pub fn aggregate_demand(lines: &[CartLine]) -> Result<BTreeMap<ItemId, u32>, CartError> {
    if lines.is_empty() {
        return Err(CartError::Empty);
    }

    let mut demand: BTreeMap<ItemId, u32> = BTreeMap::new();
    for line in lines {
        if line.quantity == 0 {
            return Err(CartError::NonPositiveQuantity {
                item_id: line.item_id,
            });
        }
        let entry = demand.entry(line.item_id).or_insert(0);
        *entry = entry
            .checked_add(line.quantity)
            .ok_or(CartError::QuantityOverflow {
                item_id: line.item_id,
            })?;
    }
    Ok(demand)
}
