use kiosk_core::reader::{EventSource, HardwareError, ReaderTiming, TokenCallback, TokenDriver};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

enum Step {
    Token(Vec<u8>),
    Empty,
    Fail,
    Panic,
}

/// Replays steps pushed by the test; reports "no token" while the script is
/// empty.
struct ScriptedDriver {
    steps: mpsc::Receiver<Step>,
}

fn scripted() -> (mpsc::Sender<Step>, ScriptedDriver) {
    let (tx, rx) = mpsc::channel();
    (tx, ScriptedDriver { steps: rx })
}

impl TokenDriver for ScriptedDriver {
    fn scan_once(&mut self) -> Result<Option<Vec<u8>>, HardwareError> {
        match self.steps.recv_timeout(Duration::from_millis(5)) {
            Ok(Step::Token(token)) => Ok(Some(token)),
            Ok(Step::Empty) => Ok(Some(Vec::new())),
            Ok(Step::Fail) => Err(HardwareError::Driver("antenna timeout".to_string())),
            Ok(Step::Panic) => panic!("driver crashed"),
            Err(_) => Ok(None),
        }
    }
}

/// Presents the same token on every scan.
struct RepeatingDriver(Vec<u8>);

impl TokenDriver for RepeatingDriver {
    fn scan_once(&mut self) -> Result<Option<Vec<u8>>, HardwareError> {
        Ok(Some(self.0.clone()))
    }
}

fn fast_timing() -> ReaderTiming {
    ReaderTiming {
        after_read: Duration::from_millis(5),
        idle: Duration::from_millis(5),
        error_backoff: Duration::from_millis(5),
    }
}

#[test]
fn callbacks_receive_lowercase_hex_tokens_in_order() {
    let (script, driver) = scripted();
    let source = EventSource::start(driver, fast_timing()).unwrap();
    let (first_tx, first_rx) = mpsc::channel();
    let (second_tx, second_rx) = mpsc::channel();
    let first_tx = Mutex::new(first_tx);
    let second_tx = Mutex::new(second_tx);
    source.register_callback(move |token| {
        let _ = first_tx.lock().unwrap().send(token.to_string());
    });
    source.register_callback(move |token| {
        let _ = second_tx.lock().unwrap().send(token.to_string());
    });
    assert!(source.latest_token().is_none());

    script.send(Step::Token(vec![0x04, 0xA1, 0xB2])).unwrap();
    script.send(Step::Token(vec![0xDE, 0xAD, 0xBE, 0xEF])).unwrap();

    for rx in [&first_rx, &second_rx] {
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "04a1b2");
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "deadbeef");
    }
    assert_eq!(source.latest_token(), Some(vec![0xDE, 0xAD, 0xBE, 0xEF]));
    assert_eq!(source.latest_token_hex().as_deref(), Some("deadbeef"));
    assert!(source.stop(Some(WAIT)));
}

#[test]
fn every_read_is_delivered_to_a_registered_callback() {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let source = EventSource::start(RepeatingDriver(vec![0x01, 0xFF]), fast_timing()).unwrap();
    source.register_callback(move |token| {
        let _ = tx.lock().unwrap().send(token.to_string());
    });

    for _ in 0..3 {
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), "01ff");
    }
    assert!(source.stop(Some(WAIT)));
}

#[test]
fn driver_errors_panics_and_empty_ids_do_not_end_the_loop() {
    let (script, driver) = scripted();
    let source = EventSource::start(driver, fast_timing()).unwrap();
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    source.register_callback(move |token| {
        let _ = tx.lock().unwrap().send(token.to_string());
    });

    for step in [Step::Empty, Step::Fail, Step::Panic, Step::Empty, Step::Fail] {
        script.send(step).unwrap();
    }
    script.send(Step::Token(vec![0x0A])).unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "0a");
    assert!(rx.try_recv().is_err());
    assert!(source.is_running());
    assert_eq!(source.latest_token_hex().as_deref(), Some("0a"));
    assert!(source.stop(Some(WAIT)));
}

#[test]
fn panicking_callback_does_not_starve_the_next_one() {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let source = EventSource::start(RepeatingDriver(vec![0x42]), fast_timing()).unwrap();
    source.register_callback(|_| panic!("ui handler bug"));
    source.register_callback(move |token| {
        let _ = tx.lock().unwrap().send(token.to_string());
    });

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "42");
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "42");
    assert!(source.is_running());
    assert!(source.stop(Some(WAIT)));
}

#[test]
fn no_callback_runs_after_stop_returns() {
    let calls = Arc::new(AtomicUsize::new(0));
    let source = EventSource::start(RepeatingDriver(vec![0x07]), fast_timing()).unwrap();
    let counter = Arc::clone(&calls);
    source.register_callback(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    while calls.load(Ordering::SeqCst) == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(source.stop(Some(WAIT)));
    assert!(!source.is_running());

    let after_stop = calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(calls.load(Ordering::SeqCst), after_stop);
}

#[test]
fn callback_can_stop_its_own_reader() {
    let source = Arc::new(EventSource::start(RepeatingDriver(vec![0x99]), fast_timing()).unwrap());
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let handle = Arc::downgrade(&source);
    source.register_callback(move |_| {
        if let Some(source) = handle.upgrade() {
            let stopped = source.stop(Some(WAIT));
            let _ = tx.lock().unwrap().send(stopped);
        }
    });

    assert!(rx.recv_timeout(WAIT).unwrap());
    assert!(source.stop(Some(WAIT)));
    assert!(!source.is_running());
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
}

#[test]
fn callbacks_given_at_start_see_the_first_read() {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback: TokenCallback = Arc::new(move |token: &str| {
        let _ = tx.lock().unwrap().send(token.to_string());
    });
    let (script, driver) = scripted();
    script.send(Step::Token(vec![0xC0, 0xFF, 0xEE])).unwrap();

    let source = EventSource::start_with_callbacks(driver, fast_timing(), vec![callback]).unwrap();

    assert_eq!(rx.recv_timeout(WAIT).unwrap(), "c0ffee");
    assert!(source.stop(Some(WAIT)));
}
