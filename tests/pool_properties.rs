//! End-to-end pool scenarios. Run with
//! `cargo test --features test-support` — these exercise
//! `dbpool::testsupport`, which is only compiled in under that feature (or
//! under `cfg(test)` for the crate's own unit tests).

use std::thread;
use std::time::Duration;

use dbpool::connection::{new_connection_pool, new_connection_pool_with, ConnectionPoolConfig};
use dbpool::discipline::AccessDiscipline;
use dbpool::events::PoolEvent;
use dbpool::testsupport::{FailAfterNValidator, MockDriver};
use dbpool::validator::Validator;
use dbpool::EventListener;

struct RecordingListener {
    events: std::sync::Mutex<Vec<String>>,
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &PoolEvent) {
        self.events.lock().unwrap().push(event.to_string());
    }
}

fn config(name: &str, pool_size: u32, max_size: u32) -> ConnectionPoolConfig {
    ConnectionPoolConfig {
        name: name.into(),
        url: "mock://test".into(),
        pool_size,
        max_size,
        access: AccessDiscipline::Lifo,
        ..ConnectionPoolConfig::default()
    }
}

#[test]
fn s1_max_size_limit_error_event_and_timeout() {
    let pool = new_connection_pool(config("s1", 2, 2), MockDriver::default());
    let events = std::sync::Arc::new(RecordingListener {
        events: std::sync::Mutex::new(Vec::new()),
    });
    // `add_listener` takes ownership of a boxed trait object; keep a
    // second handle to the same recorder via a thin forwarding wrapper.
    struct Forward(std::sync::Arc<RecordingListener>);
    impl EventListener for Forward {
        fn on_event(&self, event: &PoolEvent) {
            self.0.on_event(event);
        }
    }
    pool.add_listener(Box::new(Forward(events.clone())));

    let _a = pool.check_out().unwrap();
    let _b = pool.check_out().unwrap();

    let started = std::time::Instant::now();
    let c = pool.check_out_timeout(Duration::from_millis(100)).unwrap();
    assert!(c.is_none());
    assert!(started.elapsed() >= Duration::from_millis(90));

    let recorded = events.events.lock().unwrap();
    assert!(recorded.iter().any(|e| e.contains("MAX_SIZE_LIMIT_ERROR")));
}

#[test]
fn s3_idle_entries_expire_without_traffic() {
    let pool = new_connection_pool(config("s3", 4, 0), MockDriver::default());
    pool.init(4);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while pool.free_count() < 4 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    assert_eq!(pool.free_count(), 4);

    pool.set_parameters(4, 0, 200);
    thread::sleep(Duration::from_secs(1));
    assert_eq!(pool.free_count(), 0);
}

#[test]
fn s6_validator_eventually_yields_fresh_item() {
    let validator = Box::new(FailAfterNValidator::new(3));
    let pool = new_connection_pool_with(
        config("s6", 1, 0),
        MockDriver::default(),
        validator as Box<dyn Validator<MockDriver>>,
        Box::new(dbpool::decoder::IdentityDecoder),
    );

    let mut last_id = None;
    let mut saw_new_id = false;
    for _ in 0..5 {
        let session = pool.check_out().unwrap();
        let id = session.with_raw(|raw| raw.id).unwrap();
        if let Some(prev) = last_id {
            if id != prev {
                saw_new_id = true;
            }
        }
        last_id = Some(id);
        session.close().unwrap();
    }
    assert!(saw_new_id, "expected the pool to eventually mint a fresh session");
}

#[test]
fn invariant_no_leak_after_release() {
    let pool = new_connection_pool(config("release", 2, 2), MockDriver::default());
    let a = pool.check_out().unwrap();
    let b = pool.check_out().unwrap();
    a.close().unwrap();
    b.close().unwrap();
    pool.release(false);
    assert_eq!(pool.size(), 0);
    assert!(pool.check_out().is_err());
}

#[test]
fn foreign_item_is_rejected() {
    let pool_a = new_connection_pool(config("a", 1, 0), MockDriver::default());
    let pool_b = new_connection_pool(config("b", 1, 0), MockDriver::default());
    let from_b = pool_b.check_out().unwrap();
    let err = pool_a.check_in(from_b).unwrap_err();
    assert!(matches!(err, dbpool::Error::ForeignItem));
}
