use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

/// Advisory notifications emitted by a pool as it crosses size thresholds
/// or performs lifecycle transitions. Listeners are fan-out only: the pool
/// never lets a listener's behaviour affect its own state transition, and
/// a panicking listener is caught and logged rather than propagated.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    /// An item was successfully checked out.
    Checkout { pool: String },
    /// An item was checked back in.
    Checkin { pool: String },
    /// `|used|+|free|` crossed `poolSize` upward.
    MaxPoolLimitReached { pool: String },
    /// `|used|+|free|` crossed `poolSize` upward while already above it.
    MaxPoolLimitExceeded { pool: String },
    /// `|used|` crossed `maxSize` upward (a hard cap is in effect).
    MaxSizeLimitReached { pool: String },
    /// A check-out failed outright because `maxSize` was already reached.
    MaxSizeLimitError { pool: String },
    /// A free item failed validation during check-out and was discarded.
    ValidationError { pool: String },
    /// The pool has completed `release`/`releaseAsync`.
    PoolReleased { pool: String },
}

impl fmt::Display for PoolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolEvent::Checkout { pool } => write!(f, "[{pool}] checkout"),
            PoolEvent::Checkin { pool } => write!(f, "[{pool}] checkin"),
            PoolEvent::MaxPoolLimitReached { pool } => {
                write!(f, "[{pool}] MAX_POOL_LIMIT_REACHED")
            }
            PoolEvent::MaxPoolLimitExceeded { pool } => {
                write!(f, "[{pool}] MAX_POOL_LIMIT_EXCEEDED")
            }
            PoolEvent::MaxSizeLimitReached { pool } => {
                write!(f, "[{pool}] MAX_SIZE_LIMIT_REACHED")
            }
            PoolEvent::MaxSizeLimitError { pool } => {
                write!(f, "[{pool}] MAX_SIZE_LIMIT_ERROR")
            }
            PoolEvent::ValidationError { pool } => write!(f, "[{pool}] VALIDATION_ERROR"),
            PoolEvent::PoolReleased { pool } => write!(f, "[{pool}] POOL_RELEASED"),
        }
    }
}

/// Receives [`PoolEvent`]s from a pool. Implementations must return
/// quickly; the pool calls listeners synchronously, with its own mutex not
/// held, from whichever thread caused the transition.
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &PoolEvent);
}

/// A listener that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopListener;

impl EventListener for NopListener {
    fn on_event(&self, _event: &PoolEvent) {}
}

/// A listener that logs every event at `debug` level via the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl EventListener for LogListener {
    fn on_event(&self, event: &PoolEvent) {
        log::debug!("{event}");
    }
}

/// Fan-out to a list of listeners, isolating each from the others' panics.
#[derive(Default)]
pub(crate) struct ListenerSet {
    listeners: Mutex<Vec<Box<dyn EventListener>>>,
}

impl ListenerSet {
    pub(crate) fn add(&self, listener: Box<dyn EventListener>) {
        self.listeners.lock().unwrap().push(listener);
    }

    pub(crate) fn clear(&self) {
        self.listeners.lock().unwrap().clear();
    }

    pub(crate) fn fire(&self, event: PoolEvent) {
        // Snapshot the listener count under the lock, then invoke outside
        // of any pool-state lock. A listener that panics is isolated so a
        // single bad subscriber can't roll back the transition that
        // already happened.
        let listeners = self.listeners.lock().unwrap();
        for listener in listeners.iter() {
            let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
            if let Err(panic) = result {
                log::error!("event listener panicked handling {event}: {panic:?}");
            }
        }
    }
}
