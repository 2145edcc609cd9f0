//! Layer 3: the thin facade over a raw session that vends cached
//! statement handles and routes `close()` back to the connection pool.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::connection::ConnectionManager;
use crate::driver::{CacheIntent, Driver, Family, Session, StatementMode};
use crate::error::Error;
use crate::manage::{PoolIdentity, Reusable};
use crate::pool::ResourcePool;
use crate::statement::{close_raw, force_close_raw, recycle_raw, FamilyIdle, RawSlot, SharedRaw, StatementHandle};

type Stmt<D> = <<D as Driver>::Session as Session>::Statement;

struct SessionInner<D: Driver> {
    pool_id: u64,
    pool: ResourcePool<ConnectionManager<D>>,
    raw: Mutex<Option<D::Session>>,

    cache_simple: AtomicBool,
    cache_prepared: AtomicBool,
    cache_callable: AtomicBool,
    open: AtomicBool,

    next_stmt_id: AtomicU64,

    simple_idle: FamilyIdle<Stmt<D>>,
    prepared_idle: FamilyIdle<Stmt<D>>,
    callable_idle: FamilyIdle<Stmt<D>>,

    simple_in_use: Mutex<std::collections::HashMap<u64, SharedRaw<Stmt<D>>>>,
    prepared_in_use: Mutex<std::collections::HashMap<u64, SharedRaw<Stmt<D>>>>,
    callable_in_use: Mutex<std::collections::HashMap<u64, SharedRaw<Stmt<D>>>>,

    non_cachable: Mutex<std::collections::HashMap<u64, SharedRaw<Stmt<D>>>>,
}

/// A caching facade over a raw database session. Cheaply `Clone` (it's an
/// `Arc` handle): the value a caller holds and the back-pointer each
/// vended statement keeps both point at the same session state.
pub struct CachingSession<D: Driver> {
    inner: Arc<SessionInner<D>>,
}

impl<D: Driver> Clone for CachingSession<D> {
    fn clone(&self) -> Self {
        CachingSession {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Driver> CachingSession<D> {
    pub(crate) fn new(
        pool: ResourcePool<ConnectionManager<D>>,
        raw: D::Session,
        cache_simple: bool,
        cache_prepared: bool,
        cache_callable: bool,
    ) -> Self {
        CachingSession {
            inner: Arc::new(SessionInner {
                pool_id: 0,
                pool,
                raw: Mutex::new(Some(raw)),
                cache_simple: AtomicBool::new(cache_simple),
                cache_prepared: AtomicBool::new(cache_prepared),
                cache_callable: AtomicBool::new(cache_callable),
                open: AtomicBool::new(true),
                next_stmt_id: AtomicU64::new(1),
                simple_idle: FamilyIdle::new(Family::Simple),
                prepared_idle: FamilyIdle::new(Family::Prepared),
                callable_idle: FamilyIdle::new(Family::Callable),
                simple_in_use: Mutex::new(std::collections::HashMap::new()),
                prepared_in_use: Mutex::new(std::collections::HashMap::new()),
                callable_in_use: Mutex::new(std::collections::HashMap::new()),
                non_cachable: Mutex::new(std::collections::HashMap::new()),
            }),
        }
    }

    /// `pub(crate)` rather than private so the crate's own test suite can
    /// inspect idle-cache occupancy directly (e.g. to confirm a leaked
    /// statement ends up in neither the idle cache nor the in-use set).
    pub(crate) fn idle_for(&self, family: Family) -> &FamilyIdle<Stmt<D>> {
        match family {
            Family::Simple => &self.inner.simple_idle,
            Family::Prepared => &self.inner.prepared_idle,
            Family::Callable => &self.inner.callable_idle,
        }
    }

    pub(crate) fn in_use_for(&self, family: Family) -> &Mutex<std::collections::HashMap<u64, SharedRaw<Stmt<D>>>> {
        match family {
            Family::Simple => &self.inner.simple_in_use,
            Family::Prepared => &self.inner.prepared_in_use,
            Family::Callable => &self.inner.callable_in_use,
        }
    }

    fn cache_enabled(&self, family: Family) -> bool {
        match family {
            Family::Simple => self.inner.cache_simple.load(Ordering::Relaxed),
            Family::Prepared => self.inner.cache_prepared.load(Ordering::Relaxed),
            Family::Callable => self.inner.cache_callable.load(Ordering::Relaxed),
        }
    }

    /// Enable or disable caching for a family at runtime. Disabling does
    /// not evict already-idle entries immediately; they are flushed the
    /// next time a borrowed session is recycled.
    pub fn set_cache_enabled(&self, family: Family, enabled: bool) {
        let flag = match family {
            Family::Simple => &self.inner.cache_simple,
            Family::Prepared => &self.inner.cache_prepared,
            Family::Callable => &self.inner.cache_callable,
        };
        flag.store(enabled, Ordering::Relaxed);
    }

    fn create_raw(&self, family: Family, sql: Option<&str>, mode: StatementMode) -> Result<Stmt<D>, Error> {
        let mut guard = self.inner.raw.lock().unwrap();
        let raw = guard.as_mut().ok_or(Error::Released)?;
        match family {
            Family::Simple => raw.create_statement(mode),
            Family::Prepared => raw.prepare_statement(sql.unwrap_or_default(), mode),
            Family::Callable => raw.prepare_call(sql.unwrap_or_default(), mode),
        }
    }

    fn wrap(
        &self,
        id: u64,
        sql: Option<&str>,
        family: Family,
        mode: StatementMode,
        raw: SharedRaw<Stmt<D>>,
        cachable: bool,
    ) -> StatementHandle<Stmt<D>> {
        let session = self.clone();
        StatementHandle {
            id,
            sql: sql.map(str::to_owned),
            family,
            mode,
            raw,
            cachable,
            open: true,
            on_close: Box::new(move |id, family, cachable, raw, mode, sql| {
                session.statement_closed(id, family, cachable, raw, mode, sql);
            }),
        }
    }

    fn vend(
        &self,
        family: Family,
        sql: Option<&str>,
        mode: StatementMode,
        intent: CacheIntent,
    ) -> Result<StatementHandle<Stmt<D>>, Error> {
        if !self.inner.open.load(Ordering::SeqCst) {
            return Err(Error::Released);
        }

        let cachable = intent.is_cachable() && self.cache_enabled(family);

        if !cachable {
            let raw = self.create_raw(family, sql, mode)?;
            let id = self.inner.next_stmt_id.fetch_add(1, Ordering::Relaxed);
            let shared = Arc::new(RawSlot {
                raw: Mutex::new(Some(raw)),
            });
            self.inner.non_cachable.lock().unwrap().insert(id, shared.clone());
            return Ok(self.wrap(id, sql, family, mode, shared, false));
        }

        let (found, _requests, _hits) = self.idle_for(family).take(sql, mode);
        if let Some((id, shared)) = found {
            self.in_use_for(family).lock().unwrap().insert(id, shared.clone());
            return Ok(self.wrap(id, sql, family, mode, shared, true));
        }

        let raw = self.create_raw(family, sql, mode)?;
        let id = self.inner.next_stmt_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(RawSlot {
            raw: Mutex::new(Some(raw)),
        });
        self.in_use_for(family).lock().unwrap().insert(id, shared.clone());
        Ok(self.wrap(id, sql, family, mode, shared, true))
    }

    fn statement_closed(
        &self,
        id: u64,
        family: Family,
        cachable: bool,
        shared: SharedRaw<Stmt<D>>,
        mode: StatementMode,
        sql: Option<String>,
    ) {
        self.in_use_for(family).lock().unwrap().remove(&id);
        if !cachable || !self.cache_enabled(family) {
            force_close_raw(&shared, "statement returned with caching disabled");
            return;
        }
        if recycle_raw(&shared) {
            self.idle_for(family).put(sql, id, shared, mode);
        } else {
            force_close_raw(&shared, "statement recycle failed");
        }
    }

    pub fn create_statement(&self, mode: StatementMode) -> Result<StatementHandle<Stmt<D>>, Error> {
        self.vend(Family::Simple, None, mode, CacheIntent::Cachable)
    }

    pub fn create_statement_with_generated_keys(
        &self,
        mode: StatementMode,
    ) -> Result<StatementHandle<Stmt<D>>, Error> {
        self.vend(Family::Simple, None, mode, CacheIntent::GeneratedKeys)
    }

    pub fn prepare_statement(&self, sql: &str, mode: StatementMode) -> Result<StatementHandle<Stmt<D>>, Error> {
        self.vend(Family::Prepared, Some(sql), mode, CacheIntent::Cachable)
    }

    pub fn prepare_statement_with_generated_keys(
        &self,
        sql: &str,
        mode: StatementMode,
    ) -> Result<StatementHandle<Stmt<D>>, Error> {
        self.vend(Family::Prepared, Some(sql), mode, CacheIntent::GeneratedKeys)
    }

    /// Prepare a statement that returns only the given column indexes from
    /// generated keys. Like `..._with_generated_keys`, this is never
    /// cachable — there's no simple-statement equivalent (`createStatement`
    /// takes no SQL up front, so a column list has nothing to attach to).
    pub fn prepare_statement_with_column_indexes(
        &self,
        sql: &str,
        mode: StatementMode,
        column_indexes: Vec<u32>,
    ) -> Result<StatementHandle<Stmt<D>>, Error> {
        self.vend(
            Family::Prepared,
            Some(sql),
            mode,
            CacheIntent::ColumnIndexes(column_indexes),
        )
    }

    /// Prepare a statement that returns only the given column names from
    /// generated keys. Never cachable, for the same reason as
    /// `prepare_statement_with_column_indexes`.
    pub fn prepare_statement_with_column_names(
        &self,
        sql: &str,
        mode: StatementMode,
        column_names: Vec<String>,
    ) -> Result<StatementHandle<Stmt<D>>, Error> {
        self.vend(
            Family::Prepared,
            Some(sql),
            mode,
            CacheIntent::ColumnNames(column_names),
        )
    }

    pub fn prepare_call(&self, sql: &str, mode: StatementMode) -> Result<StatementHandle<Stmt<D>>, Error> {
        self.vend(Family::Callable, Some(sql), mode, CacheIntent::Cachable)
    }

    /// `(requests, hits)` for one statement family, advisory accounting.
    pub fn family_stats(&self, family: Family) -> (u64, u64) {
        self.idle_for(family).stats()
    }

    pub fn is_closed(&self) -> bool {
        match self.inner.raw.lock().unwrap().as_ref() {
            Some(raw) => raw.is_closed(),
            None => true,
        }
    }

    pub fn try_set_auto_commit(&self, value: bool) -> bool {
        match self.inner.raw.lock().unwrap().as_mut() {
            Some(raw) => raw.set_auto_commit(value).is_ok(),
            None => false,
        }
    }

    pub fn with_raw<T>(&self, f: impl FnOnce(&mut D::Session) -> T) -> Option<T> {
        self.inner.raw.lock().unwrap().as_mut().map(f)
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Return this session to the pool. Does *not* close the underlying
    /// raw session; only the pool's eventual `destroy` does that.
    pub fn close(&self) -> Result<(), Error> {
        if !self.inner.open.swap(false, Ordering::SeqCst) {
            return Err(Error::release_failed(["session already closed"]));
        }
        self.inner.pool.check_in(self.clone())
    }

    /// Full session teardown: close every idle and in-use statement of
    /// every family plus non-cachable statements, close the raw session,
    /// and aggregate every failure encountered along the way into one
    /// `Error::ReleaseFailed` rather than stopping at the first.
    pub(crate) fn release_all(&self) -> Result<(), Error> {
        let mut causes = Vec::new();

        for family in [Family::Simple, Family::Prepared, Family::Callable] {
            for (_, shared) in self.idle_for(family).drain() {
                if let Err(e) = close_raw(&shared) {
                    causes.push(format!("{}: idle {}", family.name(), e));
                }
            }
            for (_, shared) in self.in_use_for(family).lock().unwrap().drain() {
                if let Err(e) = close_raw(&shared) {
                    causes.push(format!("{}: in-use {}", family.name(), e));
                }
            }
        }
        for (_, shared) in self.inner.non_cachable.lock().unwrap().drain() {
            if let Err(e) = close_raw(&shared) {
                causes.push(format!("non-cachable: {e}"));
            }
        }

        let mut raw_guard = self.inner.raw.lock().unwrap();
        if let Some(mut raw) = raw_guard.take() {
            if let Err(e) = raw.close() {
                causes.push(format!("raw session: {e}"));
            }
        }
        drop(raw_guard);

        if causes.is_empty() {
            Ok(())
        } else {
            Err(Error::release_failed(causes))
        }
    }
}

impl<D: Driver> PoolIdentity for CachingSession<D> {
    fn pool_id(&self) -> u64 {
        self.inner.pool_id
    }

    fn set_pool_id(&mut self, id: u64) {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.pool_id = id,
            None => log::error!("set_pool_id called on an already-shared CachingSession"),
        }
    }
}

impl<D: Driver> Reusable for CachingSession<D> {
    /// Session recycle, called by the pool on check-in.
    fn recycle(&mut self) -> bool {
        for family in [Family::Simple, Family::Prepared, Family::Callable] {
            let enabled = self.cache_enabled(family);
            let leaked: Vec<_> = self.in_use_for(family).lock().unwrap().drain().collect();
            for (_, shared) in leaked {
                force_close_raw(&shared, "session recycle: closing leaked statement");
            }
            if !enabled {
                for (_, shared) in self.idle_for(family).drain() {
                    force_close_raw(&shared, "session recycle: caching disabled, releasing idle statement");
                }
            }
        }
        for (_, shared) in self.inner.non_cachable.lock().unwrap().drain() {
            force_close_raw(&shared, "session recycle: releasing non-cachable statement");
        }

        let mut raw_guard = self.inner.raw.lock().unwrap();
        let Some(raw) = raw_guard.as_mut() else {
            return false;
        };
        if !raw.auto_commit() {
            if let Err(e) = raw.rollback() {
                log::warn!("session recycle: rollback failed: {e}");
            }
            if let Err(e) = raw.set_auto_commit(true) {
                log::warn!("session recycle: restoring autocommit failed: {e}");
            }
        }
        if let Err(e) = raw.clear_warnings() {
            log::debug!("session recycle: clear_warnings failed: {e}");
        }
        true
    }

    fn force_close_handle(&self) -> Option<Box<dyn Fn() + Send + Sync>> {
        let inner = self.inner.clone();
        Some(Box::new(move || {
            inner.open.store(false, Ordering::SeqCst);
            if let Ok(mut raw) = inner.raw.lock() {
                if let Some(mut r) = raw.take() {
                    let _ = r.close();
                }
            }
        }))
    }
}
