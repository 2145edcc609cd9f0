//! Pluggable session validation.

use crate::caching_session::CachingSession;
use crate::driver::Driver;

pub trait Validator<D: Driver>: Send + Sync + 'static {
    fn validate(&self, session: &mut CachingSession<D>) -> bool;
}

/// `¬isClosed()` — the default.
pub struct DefaultValidator;

impl<D: Driver> Validator<D> for DefaultValidator {
    fn validate(&self, session: &mut CachingSession<D>) -> bool {
        !session.is_closed()
    }
}

/// Attempts `setAutoCommit(true)` and returns whether it succeeded.
pub struct AutoCommitValidator;

impl<D: Driver> Validator<D> for AutoCommitValidator {
    fn validate(&self, session: &mut CachingSession<D>) -> bool {
        !session.is_closed() && session.try_set_auto_commit(true)
    }
}

/// "Always valid" — configured by leaving `validator` unset.
pub struct NullValidator;

impl<D: Driver> Validator<D> for NullValidator {
    fn validate(&self, _session: &mut CachingSession<D>) -> bool {
        true
    }
}
