//! Account model (the kiosk "user" as seen by the core).
//!
//! # Invariants
//! - `handles` maps a notification channel name to the recipient on that
//!   channel; an account may have none.
//! - `role` only matters for picking low-stock recipients.

use super::{require_text, ModelValidationError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Storage identity of an account.
pub type AccountId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountRole {
    Customer,
    Admin,
}

impl AccountRole {
    /// Stable string form used in storage.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "customer" => Some(Self::Customer),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Account holding a prepaid credit balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    /// Lowercase hex form of the identity token used to log in.
    pub token: String,
    pub credit: Decimal,
    pub role: AccountRole,
    /// Channel name -> recipient handle on that channel.
    pub handles: BTreeMap<String, String>,
}

impl Account {
    pub fn is_admin(&self) -> bool {
        self.role == AccountRole::Admin
    }

    /// Recipient handle for one channel, if configured.
    pub fn handle_for(&self, channel: &str) -> Option<&str> {
        self.handles.get(channel).map(String::as_str)
    }

    pub fn has_handles(&self) -> bool {
        !self.handles.is_empty()
    }
}

/// Seed/admin input for creating one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub name: String,
    pub token: String,
    pub credit: Decimal,
    pub role: AccountRole,
    pub handles: BTreeMap<String, String>,
}

impl NewAccount {
    pub fn new(name: impl Into<String>, token: impl Into<String>, credit: Decimal) -> Self {
        Self {
            name: name.into(),
            token: token.into(),
            credit,
            role: AccountRole::Customer,
            handles: BTreeMap::new(),
        }
    }

    /// Marks the account as an administrator.
    pub fn admin(mut self) -> Self {
        self.role = AccountRole::Admin;
        self
    }

    /// Adds a recipient handle for one channel.
    pub fn with_handle(mut self, channel: impl Into<String>, handle: impl Into<String>) -> Self {
        self.handles.insert(channel.into(), handle.into());
        self
    }

    pub fn validate(&self) -> Result<(), ModelValidationError> {
        require_text(&self.name, "name")?;
        require_text(&self.token, "token")?;
        if self.credit < Decimal::ZERO {
            return Err(ModelValidationError::NegativeCredit);
        }
        for (channel, handle) in &self.handles {
            if channel.trim().is_empty() || handle.trim().is_empty() {
                return Err(ModelValidationError::InvalidHandle {
                    channel: channel.clone(),
                });
            }
        }
        Ok(())
    }
}
