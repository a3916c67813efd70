//! Inventory item model.

use super::{require_text, CartError, ModelValidationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Storage identity of an item. Lock ordering sorts on this value.
pub type ItemId = i64;

/// One sellable product with its current stock level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub category: String,
    /// Unit price in credit units.
    pub price: Decimal,
    /// Units currently on the shelf.
    pub quantity: u32,
    /// Unique lookup key printed on the product.
    pub barcode: String,
}

impl Item {
    /// Price of `quantity` units of this item.
    pub fn cost_of(&self, quantity: u32) -> Result<Decimal, CartError> {
        self.price
            .checked_mul(Decimal::from(quantity))
            .ok_or(CartError::AmountOverflow { item_id: self.id })
    }

    /// Returns whether `quantity` units can be taken from current stock.
    pub fn has_stock_for(&self, quantity: u32) -> bool {
        self.quantity >= quantity
    }
}

/// Seed/admin input for creating one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub name: String,
    pub category: String,
    pub price: Decimal,
    pub quantity: u32,
    pub barcode: String,
}

impl NewItem {
    pub fn new(
        name: impl Into<String>,
        category: impl Into<String>,
        price: Decimal,
        quantity: u32,
        barcode: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            price,
            quantity,
            barcode: barcode.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_text(&self.name, "name")?;
        require_text(&self.category, "category")?;
        require_text(&self.barcode, "barcode")?;
        if self.price < Decimal::ZERO {
            return Err(ModelValidationError::NegativePrice);
        }
        Ok(())
    }
}
