//! Checkout transaction engine.
//!
//! # Responsibility
//! - Turn one account's cart into stock and credit changes plus transaction
//!   records, atomically.
//! - Enqueue low-balance and low-stock notifications after a commit.
//!
//! # Invariants
//! - Locks are taken in one global order: item rows ascending by id, then the
//!   account row.
//! - Nothing is written before every locked re-check passed; any failure
//!   rolls the whole session back.
//! - Notifications are only produced after a successful commit and never
//!   change the checkout result.

use crate::checkout::error::CheckoutError;
use crate::model::{
    aggregate_demand, Account, AccountId, CartError, CartLine, EntityRef, Item, ItemId,
    NewTransactionRecord, TransactionRecord,
};
use crate::notify::{ChannelSelection, NotificationRegistry};
use crate::repo::{RepoResult, SessionMode, Storage};
use chrono::Local;
use log::{debug, error, info, warn};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Thresholds and language for post-checkout notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPolicy {
    /// A new credit strictly below this value triggers a low-balance notice.
    pub low_balance_threshold: Decimal,
    /// A resulting stock strictly below this value triggers a low-stock notice.
    pub low_stock_threshold: u32,
    pub language: String,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            low_balance_threshold: Decimal::new(300, 2),
            low_stock_threshold: 3,
            language: "en".to_string(),
        }
    }
}

/// Result of a committed checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutReceipt {
    pub account_id: AccountId,
    pub total: Decimal,
    pub new_credit: Decimal,
    /// One record per cart line, in cart order.
    pub records: Vec<TransactionRecord>,
    /// Notification tasks accepted by channel workers.
    pub notifications_enqueued: usize,
}

struct Committed {
    account: Account,
    total: Decimal,
    records: Vec<TransactionRecord>,
    /// Touched items with their post-checkout quantity.
    items: BTreeMap<ItemId, Item>,
}

/// Executes checkouts against a `Storage`.
pub struct TransactionEngine {
    storage: Arc<dyn Storage>,
    policy: NotificationPolicy,
    notifier: Option<Arc<NotificationRegistry>>,
}

impl TransactionEngine {
    pub fn new(storage: Arc<dyn Storage>, policy: NotificationPolicy) -> Self {
        Self {
            storage,
            policy,
            notifier: None,
        }
    }

    /// Enables post-commit notifications through `registry`.
    pub fn with_notifier(mut self, registry: Arc<NotificationRegistry>) -> Self {
        self.notifier = Some(registry);
        self
    }

    pub fn policy(&self) -> &NotificationPolicy {
        &self.policy
    }

    /// Charges `account_id` for `cart`.
    ///
    /// # Errors
    /// - `Validation` for an empty cart or a zero quantity, before any
    ///   storage access.
    /// - `NotFound` for an unknown account or item.
    /// - `InsufficientStock` / `InsufficientFunds` with the values seen under
    ///   lock (or in the optimistic pre-check).
    /// - `Storage` for any persistence failure; nothing is committed.
    pub fn checkout(
        &self,
        account_id: AccountId,
        cart: &[CartLine],
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let started_at = Instant::now();
        let result = self.run_checkout(account_id, cart);
        let duration_ms = started_at.elapsed().as_millis();

        match &result {
            Ok(receipt) => info!(
                "event=checkout module=checkout status=ok account_id={account_id} lines={} total={} new_credit={} notifications={} duration_ms={duration_ms}",
                receipt.records.len(),
                receipt.total,
                receipt.new_credit,
                receipt.notifications_enqueued
            ),
            Err(err @ CheckoutError::Storage(_)) => error!(
                "event=checkout module=checkout status=error account_id={account_id} duration_ms={duration_ms} error_code={} error={err}",
                err.code()
            ),
            Err(err) => info!(
                "event=checkout module=checkout status=rejected account_id={account_id} duration_ms={duration_ms} error_code={} error={err}",
                err.code()
            ),
        }
        result
    }

    fn run_checkout(
        &self,
        account_id: AccountId,
        cart: &[CartLine],
    ) -> Result<CheckoutReceipt, CheckoutError> {
        let demand = aggregate_demand(cart)?;
        self.precheck(account_id, &demand)?;
        let committed = self.commit_locked(account_id, cart, &demand)?;
        let notifications_enqueued = self.notify_after_commit(&committed);

        Ok(CheckoutReceipt {
            account_id,
            total: committed.total,
            new_credit: committed.account.credit,
            records: committed.records,
            notifications_enqueued,
        })
    }

    /// Lock-free fast-fail on last-known values. The read session is closed
    /// before the write session begins.
    fn precheck(
        &self,
        account_id: AccountId,
        demand: &BTreeMap<ItemId, u32>,
    ) -> Result<(), CheckoutError> {
        let session = self.storage.begin(SessionMode::Read)?;
        let account = session
            .get_account_by_id(account_id)?
            .ok_or(CheckoutError::NotFound(EntityRef::Account(account_id)))?;

        let mut items = Vec::with_capacity(demand.len());
        let mut total = Decimal::ZERO;
        for (&item_id, &quantity) in demand {
            let item = session
                .get_item_by_id(item_id)?
                .ok_or(CheckoutError::NotFound(EntityRef::Item(item_id)))?;
            total = add_cost(total, &item, quantity)?;
            items.push((item, quantity));
        }
        session.rollback()?;

        if total > account.credit {
            return Err(CheckoutError::InsufficientFunds {
                required: total,
                available: account.credit,
            });
        }
        for (item, quantity) in items {
            if !item.has_stock_for(quantity) {
                return Err(CheckoutError::InsufficientStock {
                    item_id: item.id,
                    item_name: item.name,
                    available: item.quantity,
                });
            }
        }
        Ok(())
    }

    fn commit_locked(
        &self,
        account_id: AccountId,
        cart: &[CartLine],
        demand: &BTreeMap<ItemId, u32>,
    ) -> Result<Committed, CheckoutError> {
        let session = self.storage.begin(SessionMode::Write)?;

        // BTreeMap iteration is ascending by id: this is the lock order.
        let mut items = BTreeMap::new();
        for &item_id in demand.keys() {
            let item = session
                .lock_item(item_id)?
                .ok_or(CheckoutError::NotFound(EntityRef::Item(item_id)))?;
            items.insert(item_id, item);
        }
        let mut account = session
            .lock_account(account_id)?
            .ok_or(CheckoutError::NotFound(EntityRef::Account(account_id)))?;

        let mut total = Decimal::ZERO;
        for (item, quantity) in locked_lines(&items, demand)? {
            if !item.has_stock_for(quantity) {
                return Err(CheckoutError::InsufficientStock {
                    item_id: item.id,
                    item_name: item.name.clone(),
                    available: item.quantity,
                });
            }
            total = add_cost(total, item, quantity)?;
        }
        if total > account.credit {
            return Err(CheckoutError::InsufficientFunds {
                required: total,
                available: account.credit,
            });
        }

        let occurred_at = Local::now().naive_local();
        let mut records = Vec::with_capacity(cart.len());
        for line in cart {
            let item = items
                .get(&line.item_id)
                .ok_or(CheckoutError::NotFound(EntityRef::Item(line.item_id)))?;
            records.push(session.insert_transaction_record(NewTransactionRecord {
                account_id,
                item_id: item.id,
                occurred_at,
                quantity: line.quantity,
                cost: item.cost_of(line.quantity)?,
                category: item.category.clone(),
            })?);
        }

        for (item_id, &quantity) in demand {
            let item = items
                .get_mut(item_id)
                .ok_or(CheckoutError::NotFound(EntityRef::Item(*item_id)))?;
            item.quantity -= quantity;
            session.update_item_quantity(item.id, item.quantity)?;
        }

        // total <= credit was checked above.
        account.credit -= total;
        session.update_account_credit(account.id, account.credit)?;
        session.commit()?;

        Ok(Committed {
            account,
            total,
            records,
            items,
        })
    }

    fn notify_after_commit(&self, committed: &Committed) -> usize {
        let Some(registry) = self.notifier.as_deref() else {
            return 0;
        };
        let language = self.policy.language.as_str();
        let mut enqueued = 0;

        let account = &committed.account;
        if account.credit < self.policy.low_balance_threshold {
            for (channel, recipient) in &account.handles {
                if !registry.contains(channel) {
                    debug!(
                        "event=low_balance module=checkout status=skipped reason=unregistered_channel account_id={} channel={channel}",
                        account.id
                    );
                    continue;
                }
                enqueued += registry.notify_low_balance_all(
                    recipient,
                    account.credit,
                    language,
                    &ChannelSelection::single(channel.as_str()),
                );
            }
        }

        let low_stock: Vec<&Item> = committed
            .items
            .values()
            .filter(|item| item.quantity < self.policy.low_stock_threshold)
            .collect();
        if low_stock.is_empty() {
            return enqueued;
        }

        let admins = match self.load_admins() {
            Ok(admins) => admins,
            Err(err) => {
                warn!("event=low_stock module=checkout status=error reason=admin_lookup error={err}");
                return enqueued;
            }
        };
        for item in low_stock {
            for admin in &admins {
                for (channel, recipient) in &admin.handles {
                    if !registry.contains(channel) {
                        continue;
                    }
                    enqueued += registry.notify_low_stock_all(
                        recipient,
                        &item.name,
                        item.quantity,
                        language,
                        &ChannelSelection::single(channel.as_str()),
                    );
                }
            }
        }
        enqueued
    }

    fn load_admins(&self) -> RepoResult<Vec<Account>> {
        let session = self.storage.begin(SessionMode::Read)?;
        let admins = session.list_admins()?;
        session.rollback()?;
        Ok(admins)
    }
}

fn add_cost(total: Decimal, item: &Item, quantity: u32) -> Result<Decimal, CheckoutError> {
    total
        .checked_add(item.cost_of(quantity)?)
        .ok_or(CheckoutError::Validation(CartError::AmountOverflow { item_id: item.id }))
}

fn locked_lines<'a>(
    items: &'a BTreeMap<ItemId, Item>,
    demand: &BTreeMap<ItemId, u32>,
) -> Result<Vec<(&'a Item, u32)>, CheckoutError> {
    demand
        .iter()
        .map(|(item_id, &quantity)| {
            items
                .get(item_id)
                .map(|item| (item, quantity))
                .ok_or(CheckoutError::NotFound(EntityRef::Item(*item_id)))
        })
        .collect()
}
