use std::fmt;

use thiserror::Error;

/// Errors produced by the resource pool, the connection pool, and the
/// caching session.
///
/// Per the design: construction failures (`CreateFailed`, `CreateInvalid`)
/// surface the root cause unchanged, `ReleaseFailed` aggregates every
/// failure encountered while tearing something down, and `ValidationError`
/// is advisory only (emitted as a [`crate::events::PoolEvent`], never
/// returned from a public call).
#[derive(Error, Debug)]
pub enum Error {
    /// Operation attempted on a pool or session that has already been
    /// released / closed.
    #[error("pool or session has been released")]
    Released,

    /// `checkIn` was called with an item the pool never vended.
    #[error("checkIn called with an item this pool did not vend")]
    ForeignItem,

    /// The underlying driver refused to open a session.
    #[error("failed to create a new pooled item: {0}")]
    CreateFailed(String),

    /// A freshly created item failed validation immediately.
    #[error("newly created item failed validation")]
    CreateInvalid,

    /// Hard cap reached: `maxSize` simultaneous items are already checked
    /// out and none are free.
    #[error("pool '{0}' has reached its hard size limit")]
    MaxSizeLimit(String),

    /// One or more failures occurred while tearing down a session or pool.
    /// All causes remain attached and reachable via [`Error::causes`].
    #[error("release failed with {} underlying error(s)", .causes.len())]
    ReleaseFailed { causes: Vec<String> },

    /// A numeric configuration option failed to parse. Logged by the
    /// caller and defaulted to zero; never returned to a public API caller
    /// that isn't explicitly parsing configuration.
    #[error("invalid configuration value for '{key}': {value}")]
    ConfigInvalid { key: String, value: String },

    /// Propagated I/O failure (e.g. reading a properties file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::ReleaseFailed`] from a non-empty list of underlying
    /// failures collected during a best-effort teardown.
    pub fn release_failed<I, E>(causes: I) -> Error
    where
        I: IntoIterator<Item = E>,
        E: fmt::Display,
    {
        Error::ReleaseFailed {
            causes: causes.into_iter().map(|e| e.to_string()).collect(),
        }
    }

    /// The individual causes of a [`Error::ReleaseFailed`], empty for any
    /// other variant.
    pub fn causes(&self) -> &[String] {
        match self {
            Error::ReleaseFailed { causes } => causes,
            _ => &[],
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
