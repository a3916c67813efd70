mod common;

use chrono::{Datelike, Local, Months, NaiveDate};
use common::{memory_storage, seed_account, seed_item, Delivery, RecordingChannel, WAIT};
use kiosk_core::model::NewAccount;
use kiosk_core::notify::ChannelWorker;
use kiosk_core::schedule::{previous_month_bounds, MonthlySummaryReport, ProductSummary};
use kiosk_core::{
    CartLine, MonthlySummaryJob, NotificationPolicy, NotificationRegistry, PeriodicJobTrigger,
    Schedule, TransactionEngine,
};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

const POLL: Duration = Duration::from_millis(20);

fn registry_with(channels: &[&Arc<RecordingChannel>]) -> Arc<NotificationRegistry> {
    let registry = Arc::new(NotificationRegistry::new());
    for channel in channels {
        let worker = ChannelWorker::spawn_with_poll_interval(channel.as_channel(), POLL).unwrap();
        registry.register(worker, None).unwrap();
    }
    registry
}

/// A date in the month after the current one, so that today's checkouts fall
/// inside the summarized period.
fn first_of_next_month() -> NaiveDate {
    let today = Local::now().date_naive();
    NaiveDate::from_ymd_opt(today.year(), today.month(), 1).unwrap() + Months::new(1)
}

#[test]
fn job_summarizes_last_month_for_every_handle() {
    let storage = memory_storage();
    let mate = seed_item(&storage, "Club-Mate", dec!(1.50), 20);
    let bar = seed_item(&storage, "Chocolate Bar", dec!(0.80), 20);
    let ada = seed_account(
        &storage,
        NewAccount::new("Ada", "0a01", dec!(50.00))
            .with_handle("email", "ada@example.org")
            .with_handle("chat", "@ada"),
    );
    seed_account(
        &storage,
        NewAccount::new("Bob", "0a02", dec!(5.00)).with_handle("email", "bob@example.org"),
    );
    seed_account(&storage, NewAccount::new("Carol", "0a03", dec!(5.00)));

    let engine = TransactionEngine::new(storage.clone(), NotificationPolicy::default());
    engine
        .checkout(ada.id, &[CartLine::new(mate.id, 2), CartLine::new(bar.id, 1)])
        .unwrap();
    engine
        .checkout(ada.id, &[CartLine::new(mate.id, 1)])
        .unwrap();

    let email = RecordingChannel::new("email");
    let chat = RecordingChannel::new("chat");
    let registry = registry_with(&[&email, &chat]);
    let job = MonthlySummaryJob::new(storage.clone(), Arc::clone(&registry), "de");

    let report = job.run(first_of_next_month()).unwrap();

    assert_eq!(
        report,
        MonthlySummaryReport {
            accounts: 3,
            summaries_enqueued: 3,
            skipped_without_handle: 1,
            failed_accounts: 0,
        }
    );

    let email_deliveries = email.wait_for(2);
    let chat_deliveries = chat.wait_for(1);
    assert!(registry.stop_all(Some(WAIT)));

    let Delivery::Summary { recipient, summary } = &chat_deliveries[0] else {
        panic!("expected a summary, got {:?}", chat_deliveries[0]);
    };
    assert_eq!(recipient, "@ada");
    let (period_start, period_end) = previous_month_bounds(first_of_next_month());
    assert_eq!(summary.period_start, period_start);
    assert_eq!(summary.period_end, period_end);
    assert_eq!(summary.total_spent, dec!(5.30));
    assert_eq!(summary.transaction_count, 3);
    assert_eq!(
        summary.products.get("Club-Mate"),
        Some(&ProductSummary {
            quantity: 3,
            total_cost: dec!(4.50),
        })
    );
    assert_eq!(
        summary.products.get("Chocolate Bar"),
        Some(&ProductSummary {
            quantity: 1,
            total_cost: dec!(0.80),
        })
    );

    let bob_summary = email_deliveries
        .iter()
        .find_map(|delivery| match delivery {
            Delivery::Summary { recipient, summary } if recipient == "bob@example.org" => {
                Some(summary)
            }
            _ => None,
        })
        .unwrap();
    assert_eq!(bob_summary.total_spent, dec!(0));
    assert_eq!(bob_summary.transaction_count, 0);
    assert!(bob_summary.products.is_empty());
}

#[test]
fn records_outside_the_period_are_ignored() {
    let storage = memory_storage();
    let item = seed_item(&storage, "Coffee", dec!(2.00), 10);
    let ada = seed_account(
        &storage,
        NewAccount::new("Ada", "0a01", dec!(50.00)).with_handle("email", "ada@example.org"),
    );
    TransactionEngine::new(storage.clone(), NotificationPolicy::default())
        .checkout(ada.id, &[CartLine::new(item.id, 1)])
        .unwrap();

    let email = RecordingChannel::new("email");
    let registry = registry_with(&[&email]);
    let job = MonthlySummaryJob::new(storage.clone(), Arc::clone(&registry), "en");

    // Two months ahead: the summarized month is next month, which has no
    // records yet.
    let report = job.run(first_of_next_month() + Months::new(1)).unwrap();
    assert_eq!(report.summaries_enqueued, 1);

    let deliveries = email.wait_for(1);
    assert!(registry.stop_all(Some(WAIT)));
    let Delivery::Summary { summary, .. } = &deliveries[0] else {
        panic!("expected a summary, got {:?}", deliveries[0]);
    };
    assert_eq!(summary.transaction_count, 0);
    assert_eq!(summary.total_spent, dec!(0));
}

#[test]
fn handles_on_unregistered_channels_are_not_counted() {
    let storage = memory_storage();
    seed_account(
        &storage,
        NewAccount::new("Ada", "0a01", dec!(5.00)).with_handle("pager", "ada-pager"),
    );
    let email = RecordingChannel::new("email");
    let registry = registry_with(&[&email]);
    let job = MonthlySummaryJob::new(storage.clone(), Arc::clone(&registry), "en");

    let report = job.run(first_of_next_month()).unwrap();

    assert_eq!(report.accounts, 1);
    assert_eq!(report.summaries_enqueued, 0);
    assert_eq!(report.skipped_without_handle, 0);
    assert!(registry.stop_all(Some(WAIT)));
    assert!(email.deliveries().is_empty());
}

#[test]
fn trigger_runs_the_summary_job_until_shut_down() {
    let storage = memory_storage();
    seed_account(
        &storage,
        NewAccount::new("Ada", "0a01", dec!(5.00)).with_handle("email", "ada@example.org"),
    );
    let email = RecordingChannel::new("email");
    let registry = registry_with(&[&email]);
    let job = MonthlySummaryJob::new(storage.clone(), Arc::clone(&registry), "en");

    let trigger = PeriodicJobTrigger::new(
        "monthly-summary",
        Schedule::Interval(Duration::from_millis(30)),
        job.into_trigger_job(),
    )
    .unwrap();
    trigger.start().unwrap();

    let deliveries = email.wait_for(2);
    assert!(trigger.shutdown(Some(WAIT)));
    assert!(trigger.fire_count() >= 2);
    assert!(matches!(deliveries[0], Delivery::Summary { .. }));

    let fired = trigger.fire_count();
    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(trigger.fire_count(), fired);
    assert!(registry.stop_all(Some(WAIT)));
}
