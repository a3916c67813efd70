//! Checkout: validate a cart, charge an account, record the purchase.
//!
//! # Responsibility
//! - Own the only code path that decrements stock and credit.
//! - Report every rejected checkout as a typed `CheckoutError`.
//!
//! # Invariants
//! - A checkout either applies completely or leaves storage untouched.
//! - Stock never goes below zero and credit never goes negative through
//!   checkout, also under concurrent checkouts.

mod engine;
mod error;

pub use engine::{CheckoutReceipt, NotificationPolicy, TransactionEngine};
pub use error::CheckoutError;
