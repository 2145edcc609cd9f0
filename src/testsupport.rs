//! Minimal in-memory `Driver`/`Session`/`RawStatement` implementations used
//! by this crate's own test suite. Not part of the public API surface in a
//! normal build.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::caching_session::CachingSession;
use crate::driver::{Driver, RawStatement, Session, StatementMode};
use crate::error::Error;
use crate::validator::Validator;

pub struct MockStatement {
    pub id: u64,
    pub closed: bool,
}

impl RawStatement for MockStatement {
    fn close(&mut self) -> Result<(), Error> {
        self.closed = true;
        Ok(())
    }
}

struct MockSessionState {
    closed: bool,
    auto_commit: bool,
    next_stmt_id: u64,
}

/// A fake session backed by shared state so tests can observe a session's
/// identity (`id`) surviving across `CachingSession` recycle/close cycles.
pub struct MockSession {
    pub id: u64,
    state: Arc<Mutex<MockSessionState>>,
}

impl Session for MockSession {
    type Statement = MockStatement;

    fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn close(&mut self) -> Result<(), Error> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }

    fn auto_commit(&self) -> bool {
        self.state.lock().unwrap().auto_commit
    }

    fn set_auto_commit(&mut self, value: bool) -> Result<(), Error> {
        self.state.lock().unwrap().auto_commit = value;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn clear_warnings(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn create_statement(&mut self, _mode: StatementMode) -> Result<Self::Statement, Error> {
        let mut state = self.state.lock().unwrap();
        state.next_stmt_id += 1;
        Ok(MockStatement {
            id: state.next_stmt_id,
            closed: false,
        })
    }

    fn prepare_statement(&mut self, _sql: &str, _mode: StatementMode) -> Result<Self::Statement, Error> {
        let mut state = self.state.lock().unwrap();
        state.next_stmt_id += 1;
        Ok(MockStatement {
            id: state.next_stmt_id,
            closed: false,
        })
    }

    fn prepare_call(&mut self, _sql: &str, _mode: StatementMode) -> Result<Self::Statement, Error> {
        let mut state = self.state.lock().unwrap();
        state.next_stmt_id += 1;
        Ok(MockStatement {
            id: state.next_stmt_id,
            closed: false,
        })
    }
}

/// A fake driver that hands out [`MockSession`]s, optionally failing the
/// next `connect` call on demand (`fail_next`) to exercise
/// `Error::CreateFailed` paths.
#[derive(Default)]
pub struct MockDriver {
    pub sessions_created: AtomicU64,
    pub fail_next: AtomicBool,
}

impl MockDriver {
    fn open(&self) -> Result<MockSession, Error> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(Error::CreateFailed("mock driver: forced connect failure".into()));
        }
        let id = self.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            id,
            state: Arc::new(Mutex::new(MockSessionState {
                closed: false,
                auto_commit: true,
                next_stmt_id: 0,
            })),
        })
    }
}

impl Driver for MockDriver {
    type Session = MockSession;

    fn connect(&self, _url: &str, _user: Option<&str>, _password: Option<&str>) -> Result<Self::Session, Error> {
        self.open()
    }

    fn connect_with_properties(
        &self,
        _url: &str,
        _properties: &HashMap<String, String>,
    ) -> Result<Self::Session, Error> {
        self.open()
    }
}

/// A validator that fails the `n`-th and every subsequent validation of a
/// given underlying session id — useful for exercising a pool's behavior
/// when a validator starts rejecting the same underlying item repeatedly.
pub struct FailAfterNValidator {
    threshold: u32,
    counts: Mutex<HashMap<u64, u32>>,
}

impl FailAfterNValidator {
    pub fn new(threshold: u32) -> Self {
        FailAfterNValidator {
            threshold,
            counts: Mutex::new(HashMap::new()),
        }
    }
}

impl Validator<MockDriver> for FailAfterNValidator {
    fn validate(&self, session: &mut CachingSession<MockDriver>) -> bool {
        if session.is_closed() {
            return false;
        }
        let Some(id) = session.with_raw(|raw| raw.id) else {
            return false;
        };
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(id).or_insert(0);
        *count += 1;
        *count < self.threshold
    }
}
