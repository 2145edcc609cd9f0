//! The pass-through surface this crate sits on top of: a `Session` is a
//! raw database session (what the driver actually gives you), and a
//! `RawStatement` is a raw, driver-owned statement handle. These are
//! treated as external collaborators — the design detail here is
//! intentionally thin, since the interesting engineering is in the
//! caching layer wrapped around them (`crate::caching_session`).

use std::collections::HashMap;

use crate::error::Error;

/// How a result set produced by a statement behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultSetType {
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

/// Whether a result set's rows may be updated in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Concurrency {
    ReadOnly,
    Updatable,
}

/// Whether cursors survive a transaction commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Holdability {
    HoldOverCommit,
    CloseAtCommit,
}

/// The full "mode triple": two statements for the same SQL are only
/// interchangeable if these are all equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatementMode {
    pub result_set_type: ResultSetType,
    pub concurrency: Concurrency,
    pub holdability: Holdability,
}

impl Default for StatementMode {
    fn default() -> Self {
        StatementMode {
            result_set_type: ResultSetType::ForwardOnly,
            concurrency: Concurrency::ReadOnly,
            holdability: Holdability::CloseAtCommit,
        }
    }
}

/// Extra statement-creation intent that always forces the non-cachable
/// path: variants that request auto-generated keys or specific column
/// lists are never cachable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheIntent {
    Cachable,
    GeneratedKeys,
    ColumnIndexes(Vec<u32>),
    ColumnNames(Vec<String>),
}

impl CacheIntent {
    pub(crate) fn is_cachable(&self) -> bool {
        matches!(self, CacheIntent::Cachable)
    }
}

/// One of the three statement families a caching session indexes
/// separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Family {
    Simple,
    Prepared,
    Callable,
}

impl Family {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Family::Simple => "simple",
            Family::Prepared => "prepared",
            Family::Callable => "callable",
        }
    }
}

/// A raw, driver-owned statement handle.
///
/// `recycle` restores driver-default state (closes any open result set,
/// clears warnings/batch/parameters); implementations should treat
/// failures here as best-effort, as some drivers are known to misbehave
/// on some of these calls when there is nothing to clear.
pub trait RawStatement: Send + 'static {
    fn close(&mut self) -> Result<(), Error>;
    fn close_open_result_set(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn clear_warnings(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn clear_batch(&mut self) -> Result<(), Error> {
        Ok(())
    }
    fn clear_parameters(&mut self) -> Result<(), Error> {
        Ok(())
    }
}

/// A raw database session as handed back by a driver.
pub trait Session: Send + 'static {
    type Statement: RawStatement;

    fn is_closed(&self) -> bool;
    fn close(&mut self) -> Result<(), Error>;

    fn auto_commit(&self) -> bool;
    fn set_auto_commit(&mut self, value: bool) -> Result<(), Error>;
    fn rollback(&mut self) -> Result<(), Error>;
    fn clear_warnings(&mut self) -> Result<(), Error>;

    fn create_statement(&mut self, mode: StatementMode) -> Result<Self::Statement, Error>;
    fn prepare_statement(
        &mut self,
        sql: &str,
        mode: StatementMode,
    ) -> Result<Self::Statement, Error>;
    fn prepare_call(&mut self, sql: &str, mode: StatementMode) -> Result<Self::Statement, Error>;
}

/// Opens raw sessions. Implementing this is how a real database driver
/// plugs into `dbpool`; registering drivers by name (the `drivers`
/// config option) is left to the caller.
pub trait Driver: Send + Sync + 'static {
    type Session: Session;

    fn connect(
        &self,
        url: &str,
        user: Option<&str>,
        password: Option<&str>,
    ) -> Result<Self::Session, Error>;

    fn connect_with_properties(
        &self,
        url: &str,
        properties: &HashMap<String, String>,
    ) -> Result<Self::Session, Error>;
}
