//! Monthly spending summary and the job that distributes it.
//!
//! # Responsibility
//! - Aggregate one account's transaction records for the previous calendar
//!   month.
//! - Enqueue one summary per account handle through the registry.
//!
//! # Invariants
//! - The period is the full previous calendar month, both ends inclusive.
//! - Products are keyed by item name; records whose item no longer resolves
//!   are grouped under `UNKNOWN_PRODUCT`.
//! - A storage failure for one account does not stop the run.

use crate::model::{Account, ItemId, TransactionRecord};
use crate::notify::{ChannelSelection, NotificationRegistry};
use crate::repo::{RepoResult, SessionMode, Storage, StorageSession};
use chrono::{Datelike, Days, Local, NaiveDate};
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const UNKNOWN_PRODUCT: &str = "Unknown product";

/// Per-product totals inside one summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProductSummary {
    pub quantity: u32,
    pub total_cost: Decimal,
}

/// Spending of one account over one period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlySummary {
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub total_spent: Decimal,
    pub transaction_count: usize,
    pub products: BTreeMap<String, ProductSummary>,
}

impl MonthlySummary {
    /// Aggregates the records that fall inside `[period_start, period_end]`.
    ///
    /// `product_names` resolves item ids; missing ids count as
    /// `UNKNOWN_PRODUCT`.
    pub fn from_records(
        period_start: NaiveDate,
        period_end: NaiveDate,
        records: &[TransactionRecord],
        product_names: &BTreeMap<ItemId, String>,
    ) -> Self {
        let mut summary = Self {
            period_start,
            period_end,
            total_spent: Decimal::ZERO,
            transaction_count: 0,
            products: BTreeMap::new(),
        };

        for record in records {
            let day = record.occurred_at.date();
            if day < period_start || day > period_end {
                continue;
            }
            summary.total_spent = summary.total_spent.saturating_add(record.cost);
            summary.transaction_count += 1;

            let name = product_names
                .get(&record.item_id)
                .map(String::as_str)
                .unwrap_or(UNKNOWN_PRODUCT);
            let product = summary.products.entry(name.to_string()).or_default();
            product.quantity = product.quantity.saturating_add(record.quantity);
            product.total_cost = product.total_cost.saturating_add(record.cost);
        }

        summary
    }
}

/// First and last day of the calendar month before `today`.
pub fn previous_month_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first_of_month = today - Days::new(u64::from(today.day0()));
    let period_end = first_of_month - Days::new(1);
    let period_start = period_end - Days::new(u64::from(period_end.day0()));
    (period_start, period_end)
}

/// Outcome of one summary run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonthlySummaryReport {
    pub accounts: usize,
    pub summaries_enqueued: usize,
    pub skipped_without_handle: usize,
    pub failed_accounts: usize,
}

/// Builds and enqueues the previous month's summary for every account.
pub struct MonthlySummaryJob {
    storage: Arc<dyn Storage>,
    registry: Arc<NotificationRegistry>,
    language: String,
}

impl MonthlySummaryJob {
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<NotificationRegistry>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            registry,
            language: language.into(),
        }
    }

    /// Runs the job as if the current date were `today`.
    pub fn run(&self, today: NaiveDate) -> RepoResult<MonthlySummaryReport> {
        let (period_start, period_end) = previous_month_bounds(today);
        info!(
            "event=monthly_summary module=schedule status=start period_start={period_start} period_end={period_end}"
        );

        let mut report = MonthlySummaryReport::default();
        let summaries = {
            let session = self.storage.begin(SessionMode::Read)?;
            let accounts = session.list_accounts()?;
            let mut product_names = BTreeMap::new();
            let mut summaries = Vec::with_capacity(accounts.len());
            for account in accounts {
                report.accounts += 1;
                if !account.has_handles() {
                    info!(
                        "event=monthly_summary module=schedule status=skipped reason=no_handle account_id={}",
                        account.id
                    );
                    report.skipped_without_handle += 1;
                    continue;
                }
                match summarize_account(
                    session.as_ref(),
                    &account,
                    period_start,
                    period_end,
                    &mut product_names,
                ) {
                    Ok(summary) => summaries.push((account, summary)),
                    Err(err) => {
                        warn!(
                            "event=monthly_summary module=schedule status=error account_id={} error={err}",
                            account.id
                        );
                        report.failed_accounts += 1;
                    }
                }
            }
            session.rollback()?;
            summaries
        };

        for (account, summary) in &summaries {
            for (channel, recipient) in &account.handles {
                report.summaries_enqueued += self.registry.send_monthly_summary_all(
                    recipient,
                    summary,
                    &self.language,
                    &ChannelSelection::single(channel.as_str()),
                );
            }
        }

        info!(
            "event=monthly_summary module=schedule status=ok accounts={} enqueued={} skipped={} failed={}",
            report.accounts,
            report.summaries_enqueued,
            report.skipped_without_handle,
            report.failed_accounts
        );
        Ok(report)
    }

    /// Wraps the job as a trigger callback that runs against the local date.
    pub fn into_trigger_job(self) -> impl FnMut() + Send + 'static {
        move || {
            let today = Local::now().date_naive();
            if let Err(err) = self.run(today) {
                error!("event=monthly_summary module=schedule status=error error={err}");
            }
        }
    }
}

fn summarize_account(
    session: &dyn StorageSession,
    account: &Account,
    period_start: NaiveDate,
    period_end: NaiveDate,
    product_names: &mut BTreeMap<ItemId, String>,
) -> RepoResult<MonthlySummary> {
    let records = session.list_transactions_for_account(account.id)?;
    for record in &records {
        let day = record.occurred_at.date();
        if day < period_start || day > period_end || product_names.contains_key(&record.item_id) {
            continue;
        }
        if let Some(item) = session.get_item_by_id(record.item_id)? {
            product_names.insert(item.id, item.name);
        }
    }
    Ok(MonthlySummary::from_records(
        period_start,
        period_end,
        &records,
        product_names,
    ))
}
