mod common;

use common::{memory_storage, seed_account, seed_item, Delivery, RecordingChannel, WAIT};
use kiosk_core::model::NewAccount;
use kiosk_core::notify::Channel;
use kiosk_core::reader::{HardwareError, TokenDriver};
use chrono::NaiveDate;
use kiosk_core::{CartLine, ContextError, KioskConfig, KioskContext};
use rust_decimal_macros::dec;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn test_config() -> KioskConfig {
    KioskConfig::from_json_str(
        r#"{
            "notifications": { "channels": ["email"] },
            "worker": { "poll_interval_ms": 20 },
            "reader": { "after_read_ms": 10, "idle_ms": 5, "error_backoff_ms": 5 }
        }"#,
    )
    .unwrap()
}

/// Presents one token once, then nothing.
struct OneShotDriver(Option<Vec<u8>>);

impl TokenDriver for OneShotDriver {
    fn scan_once(&mut self) -> Result<Option<Vec<u8>>, HardwareError> {
        Ok(self.0.take())
    }
}

#[test]
fn scanned_token_logs_in_and_checks_out() {
    let storage = memory_storage();
    let item = seed_item(&storage, "Sandwich", dec!(4.00), 5);
    let account = seed_account(
        &storage,
        NewAccount::new("Grace", "DEADBEEF", dec!(10.00)).with_handle("email", "grace@example.org"),
    );
    let email = RecordingChannel::new("email");
    let context =
        KioskContext::build_with_channels(test_config(), storage.clone(), vec![email.as_channel()])
            .unwrap();
    assert_eq!(context.registry().channel_names(), vec!["email"]);

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    context
        .attach_reader(OneShotDriver(Some(vec![0xDE, 0xAD, 0xBE, 0xEF])), move |token| {
            let _ = tx.lock().unwrap().send(token.to_string());
        })
        .unwrap();

    let token = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(token, "deadbeef");
    assert_eq!(context.latest_token_hex().as_deref(), Some("deadbeef"));

    let user = context.login(&token).unwrap().unwrap();
    assert_eq!(user.id, account.id);
    let receipt = context
        .engine()
        .checkout(user.id, &[CartLine::new(item.id, 2)])
        .unwrap();
    assert_eq!(receipt.new_credit, dec!(2.00));
    assert_eq!(receipt.notifications_enqueued, 1);

    assert!(matches!(email.wait_for(1)[0], Delivery::LowBalance { .. }));
    assert!(context.shutdown(Some(WAIT)));
}

#[test]
fn unknown_token_does_not_log_in() {
    let storage = memory_storage();
    let context = KioskContext::build_with_channels(test_config(), storage, Vec::new()).unwrap();

    assert!(context.login("0badc0de").unwrap().is_none());
    assert!(context.shutdown(Some(WAIT)));
}

#[test]
fn shutdown_is_prompt_idempotent_and_final() {
    let storage = memory_storage();
    let email = RecordingChannel::new("email");
    let context =
        KioskContext::build_with_channels(test_config(), storage, vec![email.as_channel()])
            .unwrap();
    context.attach_reader(OneShotDriver(None), |_| {}).unwrap();
    assert!(matches!(
        context.attach_reader(OneShotDriver(None), |_| {}),
        Err(ContextError::ReaderAlreadyAttached)
    ));

    let started = Instant::now();
    assert!(context.shutdown(Some(WAIT)));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(context.shutdown(Some(WAIT)));

    assert!(matches!(
        context.attach_reader(OneShotDriver(None), |_| {}),
        Err(ContextError::ShutDown)
    ));
    assert!(context.latest_token_hex().is_none());
    assert_eq!(
        context
            .registry()
            .send("ada", "late", None, &kiosk_core::ChannelSelection::All),
        0
    );
}

#[test]
fn invalid_config_is_rejected_before_anything_starts() {
    let mut config = test_config();
    config.worker.poll_interval_ms = 0;

    let result = KioskContext::build_with_channels(config, memory_storage(), Vec::new());

    assert!(matches!(result, Err(ContextError::Config(_))));
}

#[test]
fn duplicate_channel_names_fail_the_build() {
    let first: Arc<dyn Channel> = RecordingChannel::new("email").as_channel();
    let second: Arc<dyn Channel> = RecordingChannel::new("email").as_channel();

    let result =
        KioskContext::build_with_channels(test_config(), memory_storage(), vec![first, second]);

    assert!(matches!(result, Err(ContextError::Registry(_))));
}

#[test]
fn build_registers_one_log_channel_per_configured_name() {
    let config = KioskConfig::from_json_str(
        r#"{
            "notifications": { "channels": ["log", "audit"] },
            "monthly_summary": { "enabled": false }
        }"#,
    )
    .unwrap();

    let context = KioskContext::build(config, memory_storage()).unwrap();

    assert_eq!(context.registry().channel_names(), vec!["audit", "log"]);
    let report = context
        .monthly_summary_job()
        .run(chrono::Local::now().date_naive())
        .unwrap();
    assert_eq!(report.accounts, 0);
    assert!(context.shutdown(Some(WAIT)));
}

#[test]
fn shutdown_delivers_queued_notifications_first() {
    let storage = memory_storage();
    for index in 0..20 {
        seed_account(
            &storage,
            NewAccount::new(format!("member-{index}"), format!("{index:04x}"), dec!(5.00))
                .with_handle("email", format!("member-{index}@example.org")),
        );
    }
    let email = RecordingChannel::slow("email", Duration::from_millis(20));
    let context =
        KioskContext::build_with_channels(test_config(), storage, vec![email.as_channel()])
            .unwrap();

    let report = context
        .monthly_summary_job()
        .run(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        .unwrap();
    assert_eq!(report.summaries_enqueued, 20);

    assert!(context.shutdown(Some(WAIT)));
    assert_eq!(email.deliveries().len(), 20);
}

#[test]
fn shutdown_past_its_deadline_reports_dropped_notifications() {
    let storage = memory_storage();
    for index in 0..20 {
        seed_account(
            &storage,
            NewAccount::new(format!("member-{index}"), format!("{index:04x}"), dec!(5.00))
                .with_handle("email", format!("member-{index}@example.org")),
        );
    }
    let email = RecordingChannel::slow("email", Duration::from_millis(50));
    let context =
        KioskContext::build_with_channels(test_config(), storage, vec![email.as_channel()])
            .unwrap();
    context
        .monthly_summary_job()
        .run(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
        .unwrap();

    assert!(!context.shutdown(Some(Duration::from_millis(120))));
    // The join was bounded; give the in-flight delivery time to finish.
    std::thread::sleep(Duration::from_millis(200));
    let delivered = email.deliveries().len();
    assert!(delivered < 20, "delivered {delivered}");
    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(email.deliveries().len(), delivered);
}

#[test]
fn configured_network_channels_are_built_from_their_sections() {
    let config = KioskConfig::from_json_str(
        r#"{
            "notifications": { "channels": ["email", "mattermost", "log"] },
            "email": { "smtp_server": "smtp.example.org", "login": "kiosk@example.org", "password": "pw" },
            "mattermost": { "base_url": "http://127.0.0.1:9", "bot_token": "token" },
            "monthly_summary": { "enabled": false }
        }"#,
    )
    .unwrap();

    let context = KioskContext::build(config, memory_storage()).unwrap();

    assert_eq!(
        context.registry().channel_names(),
        vec!["email", "log", "mattermost"]
    );
    assert!(context.shutdown(Some(WAIT)));
}

#[test]
fn network_channel_without_its_section_falls_back_to_the_log() {
    let context = KioskContext::build(test_config(), memory_storage()).unwrap();

    assert_eq!(context.registry().channel_names(), vec!["email"]);
    assert!(context.shutdown(Some(WAIT)));
}

#[test]
fn unusable_email_sender_fails_the_build() {
    let config = KioskConfig::from_json_str(
        r#"{
            "notifications": { "channels": ["email"] },
            "email": { "smtp_server": "smtp.example.org", "login": "kiosk@example.org", "from_address": "kiosk@" }
        }"#,
    )
    .unwrap();

    let result = KioskContext::build(config, memory_storage());

    assert!(matches!(result, Err(ContextError::Channel(_))));
}
