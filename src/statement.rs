//! Statement wrappers and the per-family cache structures they live in:
//! the vending/return-path algorithm behind `CachingSession`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::driver::{Family, RawStatement, StatementMode};
use crate::error::Error;

/// The raw statement handle shared between the `StatementHandle` a caller
/// holds and the session's bookkeeping (idle cache / in-use set). Shared
/// so the session can forcibly reclaim a leaked statement during recycle
/// even though the `StatementHandle` value itself is owned by whichever
/// thread borrowed it.
pub(crate) struct RawSlot<R: RawStatement> {
    pub(crate) raw: Mutex<Option<R>>,
}

pub(crate) type SharedRaw<R> = Arc<RawSlot<R>>;

pub(crate) fn close_raw<R: RawStatement>(shared: &SharedRaw<R>) -> Result<(), Error> {
    let mut guard = shared.raw.lock().unwrap();
    match guard.take() {
        Some(mut raw) => raw.close(),
        None => Ok(()),
    }
}

/// Best-effort: used when tearing down a leaked or cache-disabled
/// statement, where a failure is logged rather than propagated.
pub(crate) fn force_close_raw<R: RawStatement>(shared: &SharedRaw<R>, context: &str) {
    if let Err(e) = close_raw(shared) {
        log::warn!("{context}: failed to close statement: {e}");
    }
}

/// Restore driver-default state on a raw statement before caching it.
/// Every step is best-effort: some drivers misbehave on
/// `clear_parameters` when there are no parameters to clear, so failures
/// here are logged and ignored rather than failing the recycle.
pub(crate) fn recycle_raw<R: RawStatement>(shared: &SharedRaw<R>) -> bool {
    let mut guard = shared.raw.lock().unwrap();
    let Some(raw) = guard.as_mut() else {
        return false;
    };
    if let Err(e) = raw.close_open_result_set() {
        log::debug!("statement recycle: close_open_result_set failed: {e}");
    }
    if let Err(e) = raw.clear_warnings() {
        log::debug!("statement recycle: clear_warnings failed: {e}");
    }
    if let Err(e) = raw.clear_batch() {
        log::debug!("statement recycle: clear_batch failed: {e}");
    }
    if let Err(e) = raw.clear_parameters() {
        log::debug!("statement recycle: clear_parameters failed: {e}");
    }
    true
}

struct CacheEntry<R: RawStatement> {
    id: u64,
    shared: SharedRaw<R>,
    mode: StatementMode,
}

/// The idle cache for the `Simple` family: a single ordered list, no SQL
/// key.
pub(crate) struct SimpleCache<R: RawStatement> {
    idle: Vec<CacheEntry<R>>,
    pub(crate) requests: u64,
    pub(crate) hits: u64,
}

impl<R: RawStatement> Default for SimpleCache<R> {
    fn default() -> Self {
        SimpleCache {
            idle: Vec::new(),
            requests: 0,
            hits: 0,
        }
    }
}

impl<R: RawStatement> SimpleCache<R> {
    /// First-match policy: an equally valid alternative would walk the
    /// whole list and keep the *last* match, but that's equivalent to
    /// first-match as long as mode triples are unique per SQL — true in
    /// practice, and simpler to reason about.
    fn take(&mut self, mode: StatementMode) -> Option<(u64, SharedRaw<R>)> {
        let pos = self.idle.iter().position(|e| e.mode == mode)?;
        let entry = self.idle.remove(pos);
        Some((entry.id, entry.shared))
    }

    fn put(&mut self, id: u64, shared: SharedRaw<R>, mode: StatementMode) {
        self.idle.push(CacheEntry { id, shared, mode });
    }

    fn drain(&mut self) -> Vec<(u64, SharedRaw<R>)> {
        self.idle.drain(..).map(|e| (e.id, e.shared)).collect()
    }

    fn len(&self) -> usize {
        self.idle.len()
    }
}

/// The idle cache for `Prepared`/`Callable`: a map from SQL text to an
/// ordered list of idle wrappers for that SQL.
pub(crate) struct KeyedCache<R: RawStatement> {
    idle: HashMap<String, Vec<CacheEntry<R>>>,
    pub(crate) requests: u64,
    pub(crate) hits: u64,
}

impl<R: RawStatement> Default for KeyedCache<R> {
    fn default() -> Self {
        KeyedCache {
            idle: HashMap::new(),
            requests: 0,
            hits: 0,
        }
    }
}

impl<R: RawStatement> KeyedCache<R> {
    fn take(&mut self, sql: &str, mode: StatementMode) -> Option<(u64, SharedRaw<R>)> {
        let list = self.idle.get_mut(sql)?;
        let pos = list.iter().position(|e| e.mode == mode)?;
        let entry = list.remove(pos);
        // Keep the map bounded: purge the key once its list empties out.
        if list.is_empty() {
            self.idle.remove(sql);
        }
        Some((entry.id, entry.shared))
    }

    fn put(&mut self, sql: String, id: u64, shared: SharedRaw<R>, mode: StatementMode) {
        self.idle
            .entry(sql)
            .or_insert_with(Vec::new)
            .push(CacheEntry { id, shared, mode });
    }

    fn drain(&mut self) -> Vec<(u64, SharedRaw<R>)> {
        self.idle
            .drain()
            .flat_map(|(_, list)| list.into_iter().map(|e| (e.id, e.shared)))
            .collect()
    }

    fn len(&self) -> usize {
        self.idle.values().map(|l| l.len()).sum()
    }
}

/// The idle side of one statement family, abstracting over the
/// SQL-keyed-vs-not difference between `Simple` and `Prepared`/`Callable`.
pub(crate) enum FamilyIdle<R: RawStatement> {
    Simple(Mutex<SimpleCache<R>>),
    Keyed(Mutex<KeyedCache<R>>),
}

impl<R: RawStatement> FamilyIdle<R> {
    pub(crate) fn new(family: Family) -> Self {
        match family {
            Family::Simple => FamilyIdle::Simple(Mutex::new(SimpleCache::default())),
            Family::Prepared | Family::Callable => FamilyIdle::Keyed(Mutex::new(KeyedCache::default())),
        }
    }

    pub(crate) fn take(
        &self,
        sql: Option<&str>,
        mode: StatementMode,
    ) -> (Option<(u64, SharedRaw<R>)>, u64, u64) {
        match self {
            FamilyIdle::Simple(cache) => {
                let mut cache = cache.lock().unwrap();
                cache.requests += 1;
                let found = cache.take(mode);
                if found.is_some() {
                    cache.hits += 1;
                }
                (found, cache.requests, cache.hits)
            }
            FamilyIdle::Keyed(cache) => {
                let mut cache = cache.lock().unwrap();
                cache.requests += 1;
                let found = sql.and_then(|sql| cache.take(sql, mode));
                if found.is_some() {
                    cache.hits += 1;
                }
                (found, cache.requests, cache.hits)
            }
        }
    }

    pub(crate) fn put(&self, sql: Option<String>, id: u64, shared: SharedRaw<R>, mode: StatementMode) {
        match self {
            FamilyIdle::Simple(cache) => cache.lock().unwrap().put(id, shared, mode),
            FamilyIdle::Keyed(cache) => {
                if let Some(sql) = sql {
                    cache.lock().unwrap().put(sql, id, shared, mode);
                }
            }
        }
    }

    pub(crate) fn drain(&self) -> Vec<(u64, SharedRaw<R>)> {
        match self {
            FamilyIdle::Simple(cache) => cache.lock().unwrap().drain(),
            FamilyIdle::Keyed(cache) => cache.lock().unwrap().drain(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            FamilyIdle::Simple(cache) => cache.lock().unwrap().len(),
            FamilyIdle::Keyed(cache) => cache.lock().unwrap().len(),
        }
    }

    pub(crate) fn stats(&self) -> (u64, u64) {
        match self {
            FamilyIdle::Simple(cache) => {
                let c = cache.lock().unwrap();
                (c.requests, c.hits)
            }
            FamilyIdle::Keyed(cache) => {
                let c = cache.lock().unwrap();
                (c.requests, c.hits)
            }
        }
    }
}

/// A handle to a (possibly cached) statement. `close` is idempotent: a
/// second call is a no-op. Field mutation here needs no lock: a
/// wrapper is single-owner by construction — only the thread currently
/// holding it ever touches `open`.
pub struct StatementHandle<R: RawStatement> {
    pub(crate) id: u64,
    pub(crate) sql: Option<String>,
    pub(crate) family: Family,
    pub(crate) mode: StatementMode,
    pub(crate) raw: SharedRaw<R>,
    pub(crate) cachable: bool,
    pub(crate) open: bool,
    pub(crate) on_close: Box<dyn FnMut(u64, Family, bool, SharedRaw<R>, StatementMode, Option<String>) + Send>,
}

impl<R: RawStatement> StatementHandle<R> {
    pub fn sql(&self) -> Option<&str> {
        self.sql.as_deref()
    }

    pub fn mode(&self) -> StatementMode {
        self.mode
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Run a closure against the raw statement, if it's still present.
    /// Returns `None` if the raw handle was already reclaimed (e.g. a
    /// forced pool teardown while this statement was checked out).
    pub fn with_raw<T>(&self, f: impl FnOnce(&mut R) -> T) -> Option<T> {
        let mut guard = self.raw.raw.lock().unwrap();
        guard.as_mut().map(f)
    }

    /// Return this statement to its session (recycling it into the idle
    /// cache, or releasing it outright), or no-op if already closed.
    pub fn close(&mut self) -> Result<(), Error> {
        if !self.open {
            return Ok(());
        }
        self.open = false;
        (self.on_close)(
            self.id,
            self.family,
            self.cachable,
            self.raw.clone(),
            self.mode,
            self.sql.clone(),
        );
        Ok(())
    }
}

impl<R: RawStatement> Drop for StatementHandle<R> {
    fn drop(&mut self) {
        if self.open {
            let _ = self.close();
        }
    }
}
