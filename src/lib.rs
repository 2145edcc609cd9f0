//! A generic pooled-resource manager, specialised to database connections
//! with per-connection statement caching.
//!
//! Three layers, each usable on its own:
//! - [`pool`]: a bounded, thread-safe pool of anything implementing
//!   [`manage::Manage`] — access discipline, idle expiry, soft/hard caps,
//!   event listeners.
//! - [`connection`]: plugs a [`driver::Driver`] into the generic pool,
//!   producing a pool of [`caching_session::CachingSession`]s.
//! - [`caching_session`]/[`statement`]: per-connection caching of
//!   simple/prepared/callable statements, keyed on SQL and the full
//!   result-set-type/concurrency/holdability mode triple.

pub mod caching_session;
pub mod config;
pub mod connection;
pub mod decoder;
pub mod discipline;
pub mod driver;
pub mod error;
pub mod events;
pub mod logsink;
pub mod manage;
pub mod pool;
pub mod registry;
pub mod statement;
pub mod validator;

#[cfg(any(test, feature = "test-support"))]
pub mod testsupport;

pub use caching_session::CachingSession;
pub use connection::{new_connection_pool, new_connection_pool_with, ConnectionManager, ConnectionPoolConfig};
pub use discipline::AccessDiscipline;
pub use error::{Error, Result};
pub use events::{EventListener, PoolEvent};
pub use logsink::FileLogSink;
pub use manage::{Manage, PoolIdentity, Reusable};
pub use pool::{PoolBuilder, PoolParams, ResourcePool};
pub use registry::PoolManager;
pub use statement::StatementHandle;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::driver::StatementMode;
    use crate::testsupport::MockDriver;

    fn test_pool(pool_size: u32, max_size: u32) -> ResourcePool<ConnectionManager<MockDriver>> {
        let config = ConnectionPoolConfig {
            name: "test".into(),
            url: "mock://test".into(),
            pool_size,
            max_size,
            ..ConnectionPoolConfig::default()
        };
        new_connection_pool(config, MockDriver::default())
    }

    #[test]
    fn checkout_and_checkin_roundtrip() {
        let pool = test_pool(2, 2);
        let session = pool.check_out().unwrap();
        assert_eq!(pool.checked_out(), 1);
        session.close().unwrap();
        assert_eq!(pool.checked_out(), 0);
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn lifo_reuse_hits_cache() {
        // S2: poolSize=1, maxSize=0 — return A, borrow B is the same
        // underlying object under LIFO, and hitRate ends up 50%.
        let pool = test_pool(1, 0);
        let a = pool.check_out().unwrap();
        let a_id = a.with_raw(|raw| raw.id).unwrap();
        a.close().unwrap();
        let b = pool.check_out().unwrap();
        let b_id = b.with_raw(|raw| raw.id).unwrap();
        assert_eq!(a_id, b_id);
        assert_eq!(pool.hit_rate(), 0.5);
    }

    #[test]
    fn max_size_limit_times_out() {
        // S1: poolSize=2, maxSize=2 — a third borrow with a short timeout
        // returns None rather than blocking forever.
        let pool = test_pool(2, 2);
        let _a = pool.check_out().unwrap();
        let _b = pool.check_out().unwrap();
        let c = pool.check_out_timeout(Duration::from_millis(100)).unwrap();
        assert!(c.is_none());
    }

    #[test]
    fn double_close_is_idempotent() {
        let pool = test_pool(1, 0);
        let session = pool.check_out().unwrap();
        session.close().unwrap();
        let err = session.close().unwrap_err();
        assert!(matches!(err, Error::ReleaseFailed { .. }));
    }

    #[test]
    fn prepared_statement_cache_hit() {
        // S4.
        let pool = test_pool(1, 0);
        let session = pool.check_out().unwrap();
        let mode = StatementMode::default();
        let mut stmt = session.prepare_statement("SELECT 1", mode).unwrap();
        stmt.close().unwrap();
        let stmt2 = session.prepare_statement("SELECT 1", mode).unwrap();
        let (req, hit) = session.family_stats(crate::driver::Family::Prepared);
        assert_eq!(req, 2);
        assert_eq!(hit, 1);
        drop(stmt2);
    }

    #[test]
    fn leaked_statement_is_force_closed_on_recycle() {
        // S5: a client leaks a statement (never closes it) then closes the
        // session; the next vend of that same session (LIFO, single-entry
        // pool, so it's the identical `CachingSession`) must find the
        // leaked statement forcibly closed and gone from both the in-use
        // set and the idle cache, not quietly recycled into the cache.
        let pool = test_pool(1, 0);
        let session = pool.check_out().unwrap();
        let leaked = session.prepare_statement("SELECT 1", StatementMode::default()).unwrap();
        std::mem::forget(leaked);
        session.close().unwrap();
        let session = pool.check_out().unwrap();
        assert_eq!(session.idle_for(crate::driver::Family::Prepared).len(), 0);
        assert!(session
            .in_use_for(crate::driver::Family::Prepared)
            .lock()
            .unwrap()
            .is_empty());
    }
}
