//! The generic, bounded resource pool: layer 1 of the design. Everything
//! here is agnostic to what `M::Item` actually is — the database
//! connection pool (`crate::connection`) is just one `Manage`
//! implementation plugged into this machinery.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::discipline::AccessDiscipline;
use crate::error::Error;
use crate::events::{ListenerSet, PoolEvent};
use crate::manage::{Manage, PoolIdentity, Reusable};

/// A free-list entry: an idle item plus the instant at which it expires.
struct Entry<T> {
    item: T,
    death_at: Option<Instant>,
}

/// Bookkeeping kept for every currently checked-out item, so that
/// `release(force = true)` has *something* to act on even though the item
/// value itself is owned by its borrower.
struct UsedEntry {
    force_close: Option<Box<dyn Fn() + Send + Sync>>,
}

struct PoolState<T> {
    free: VecDeque<Entry<T>>,
    used: HashMap<u64, UsedEntry>,
    released: bool,
    requests: u64,
    hits: u64,
    pool_size: u32,
    max_size: u32,
    expiry_ms: u64,
    access: AccessDiscipline,
}

impl<T> PoolState<T> {
    fn pop_free(&mut self, access: AccessDiscipline) -> Option<Entry<T>> {
        match access {
            AccessDiscipline::Lifo => self.free.pop_back(),
            AccessDiscipline::Fifo => self.free.pop_front(),
            AccessDiscipline::Random => {
                if self.free.is_empty() {
                    None
                } else {
                    let idx = rand::rng().random_range(0..self.free.len());
                    self.free.remove(idx)
                }
            }
        }
    }

    fn total(&self) -> u64 {
        self.used.len() as u64 + self.free.len() as u64
    }
}

struct HaltableWorker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl HaltableWorker {
    fn halt(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

struct Shared<M: Manage> {
    name: String,
    manager: M,
    state: Mutex<PoolState<M::Item>>,
    cv: Condvar,
    listeners: ListenerSet,
    next_id: AtomicU64,
    async_destroy: AtomicBool,
    reaper: Mutex<Option<HaltableWorker>>,
    initializer: Mutex<Option<HaltableWorker>>,
}

/// Parameters a pool is constructed or reconfigured with.
#[derive(Debug, Clone)]
pub struct PoolParams {
    pub pool_size: u32,
    pub max_size: u32,
    pub expiry_ms: u64,
    pub access: AccessDiscipline,
    pub async_destroy: bool,
}

impl Default for PoolParams {
    fn default() -> Self {
        PoolParams {
            pool_size: 0,
            max_size: 0,
            expiry_ms: 0,
            access: AccessDiscipline::Lifo,
            async_destroy: false,
        }
    }
}

/// Builds a [`ResourcePool`] with a chained-setter configuration shape
/// (assert-on-construction for parameters that can't be reconciled).
pub struct PoolBuilder<M: Manage> {
    name: String,
    params: PoolParams,
    _marker: std::marker::PhantomData<M>,
}

impl<M: Manage> PoolBuilder<M> {
    pub fn new(name: impl Into<String>) -> Self {
        PoolBuilder {
            name: name.into(),
            params: PoolParams::default(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn pool_size(mut self, pool_size: u32) -> Self {
        self.params.pool_size = pool_size;
        self
    }

    pub fn max_size(mut self, max_size: u32) -> Self {
        self.params.max_size = max_size;
        self
    }

    pub fn expiry_ms(mut self, expiry_ms: u64) -> Self {
        self.params.expiry_ms = expiry_ms;
        self
    }

    pub fn access(mut self, access: AccessDiscipline) -> Self {
        self.params.access = access;
        self
    }

    pub fn async_destroy(mut self, async_destroy: bool) -> Self {
        self.params.async_destroy = async_destroy;
        self
    }

    pub fn build(self, manager: M) -> ResourcePool<M> {
        let mut params = self.params;
        if params.max_size > 0 && params.max_size < params.pool_size {
            params.max_size = params.pool_size;
        }
        ResourcePool::new(self.name, manager, params)
    }
}

/// A bounded, named pool of `Reusable` items with a soft cap, an optional
/// hard cap, idle expiry, and a configurable access discipline.
pub struct ResourcePool<M: Manage> {
    inner: Arc<Shared<M>>,
}

impl<M: Manage> Clone for ResourcePool<M> {
    fn clone(&self) -> Self {
        ResourcePool {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Manage> ResourcePool<M> {
    pub fn builder(name: impl Into<String>) -> PoolBuilder<M> {
        PoolBuilder::new(name)
    }

    pub fn new(name: impl Into<String>, manager: M, params: PoolParams) -> Self {
        let name = name.into();
        let state = PoolState {
            free: VecDeque::new(),
            used: HashMap::new(),
            released: false,
            requests: 0,
            hits: 0,
            pool_size: params.pool_size,
            max_size: params.max_size,
            expiry_ms: params.expiry_ms,
            access: params.access,
        };
        let pool = ResourcePool {
            inner: Arc::new(Shared {
                name,
                manager,
                state: Mutex::new(state),
                cv: Condvar::new(),
                listeners: ListenerSet::default(),
                next_id: AtomicU64::new(1),
                async_destroy: AtomicBool::new(params.async_destroy),
                reaper: Mutex::new(None),
                initializer: Mutex::new(None),
            }),
        };
        if params.expiry_ms > 0 {
            pool.spawn_reaper();
        }
        pool
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Access the pool's manager, e.g. so a `Manage` impl that needs a
    /// back-pointer to its own pool can bind one right after construction
    /// (see `connection::new_connection_pool`'s `OnceLock` bootstrap).
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    pub fn add_listener(&self, listener: Box<dyn crate::events::EventListener>) {
        self.inner.listeners.add(listener);
    }

    fn fire(&self, event: PoolEvent) {
        self.inner.listeners.fire(event);
    }

    fn dispatch_destroy(&self, item: M::Item) {
        if self.inner.async_destroy.load(Ordering::Relaxed) {
            let inner = self.inner.clone();
            thread::spawn(move || inner.manager.destroy(item));
        } else {
            self.inner.manager.destroy(item);
        }
    }

    /// Non-blocking check-out: a single attempt, no waiting. Returns
    /// `Error::MaxSizeLimit` rather than blocking when the hard cap has
    /// been reached; use [`ResourcePool::check_out_timeout`] to wait.
    pub fn check_out(&self) -> Result<M::Item, Error> {
        let mut state = self.inner.state.lock().unwrap();
        if state.released {
            return Err(Error::Released);
        }

        let old_total = state.total();
        let old_used = state.used.len() as u32;

        let mut found: Option<M::Item> = None;
        while let Some(entry) = state.pop_free(state.access) {
            let mut item = entry.item;
            if self.inner.manager.validate(&mut item) {
                found = Some(item);
                break;
            }
            self.fire(PoolEvent::ValidationError {
                pool: self.inner.name.clone(),
            });
            self.dispatch_destroy(item);
        }

        let hit = found.is_some();

        if found.is_none() {
            if state.max_size > 0 && old_used == state.max_size {
                self.fire(PoolEvent::MaxSizeLimitError {
                    pool: self.inner.name.clone(),
                });
                return Err(Error::MaxSizeLimit(self.inner.name.clone()));
            }

            // Drop the lock while we create: the driver call may block on
            // network I/O and must not stall every other pool operation.
            drop(state);
            let mut item = self
                .inner
                .manager
                .create()
                .map_err(|e| Error::CreateFailed(e.to_string()))?;
            if !self.inner.manager.validate(&mut item) {
                return Err(Error::CreateInvalid);
            }

            state = self.inner.state.lock().unwrap();
            if state.released {
                drop(state);
                self.dispatch_destroy(item);
                return Err(Error::Released);
            }
            let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            item.set_pool_id(id);
            found = Some(item);
        }

        let item = found.unwrap();
        let force_close = item.force_close_handle();
        state.used.insert(item.pool_id(), UsedEntry { force_close });
        state.requests += 1;
        if hit {
            state.hits += 1;
        }
        let new_total = state.total();
        let new_used = state.used.len() as u32;
        let pool_size = state.pool_size;
        let max_size = state.max_size;
        drop(state);

        self.fire(PoolEvent::Checkout {
            pool: self.inner.name.clone(),
        });
        self.fire_threshold_events(old_total, new_total, old_used, new_used, pool_size, max_size);

        Ok(item)
    }

    fn fire_threshold_events(
        &self,
        old_total: u64,
        new_total: u64,
        old_used: u32,
        new_used: u32,
        pool_size: u32,
        max_size: u32,
    ) {
        if pool_size > 0 && new_total > old_total {
            let threshold = pool_size as u64;
            if old_total < threshold && new_total >= threshold {
                self.fire(PoolEvent::MaxPoolLimitReached {
                    pool: self.inner.name.clone(),
                });
            } else if old_total >= threshold {
                self.fire(PoolEvent::MaxPoolLimitExceeded {
                    pool: self.inner.name.clone(),
                });
            }
        }
        if max_size > 0 && new_used > old_used {
            let threshold = max_size;
            if old_used < threshold && new_used >= threshold {
                self.fire(PoolEvent::MaxSizeLimitReached {
                    pool: self.inner.name.clone(),
                });
            }
        }
    }

    /// Check out with a bound on how long to wait for a free or newly
    /// creatable item. Returns `Ok(None)` on timeout rather than an error.
    pub fn check_out_timeout(&self, timeout: Duration) -> Result<Option<M::Item>, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.check_out() {
                Ok(item) => return Ok(Some(item)),
                Err(Error::MaxSizeLimit(_)) => {}
                Err(e) => return Err(e),
            }

            let mut state = self.inner.state.lock().unwrap();
            if state.released {
                return Err(Error::Released);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let remaining = deadline - now;
            let (guard, _timeout_result) = self.inner.cv.wait_timeout(state, remaining).unwrap();
            drop(guard);
            if Instant::now() >= deadline {
                // One last attempt before giving up, in case we were woken
                // right at the boundary.
                return match self.check_out() {
                    Ok(item) => Ok(Some(item)),
                    Err(Error::MaxSizeLimit(_)) => Ok(None),
                    Err(e) => Err(e),
                };
            }
        }
    }

    /// Return an item to the pool. Fails with `Error::ForeignItem` if the
    /// pool never vended this item (its id is unknown).
    pub fn check_in(&self, mut item: M::Item) -> Result<(), Error> {
        self.fire(PoolEvent::Checkin {
            pool: self.inner.name.clone(),
        });

        let mut state = self.inner.state.lock().unwrap();
        let id = item.pool_id();
        if state.used.remove(&id).is_none() {
            return Err(Error::ForeignItem);
        }

        let kill = state.released
            || if state.max_size > 0 {
                state.total() >= state.pool_size as u64
            } else {
                state.free.len() as u32 >= state.pool_size
            };

        if kill {
            drop(state);
            self.dispatch_destroy(item);
        } else if item.recycle() {
            let death_at = if state.expiry_ms > 0 {
                Some(Instant::now() + Duration::from_millis(state.expiry_ms))
            } else {
                None
            };
            state.free.push_back(Entry { item, death_at });
            drop(state);
        } else {
            drop(state);
            self.dispatch_destroy(item);
        }

        self.inner.cv.notify_all();
        Ok(())
    }

    /// Reconfigure the pool's capacity and idle expiry. Resets `requests`
    /// and `hits` atomically, and restarts the reaper if the expiry
    /// setting changed.
    pub fn set_parameters(&self, pool_size: u32, max_size: u32, expiry_ms: u64) {
        let max_size = if max_size > 0 {
            max_size.max(pool_size)
        } else {
            0
        };

        let expiry_changed;
        {
            let mut state = self.inner.state.lock().unwrap();
            expiry_changed = state.expiry_ms != expiry_ms;
            state.pool_size = pool_size;
            state.max_size = max_size;
            state.expiry_ms = expiry_ms;
            state.requests = 0;
            state.hits = 0;

            // "deathAt = now+expiryMs at entry-creation *or
            // parameter-change time*" — recompute every idle entry's
            // expiry against the new setting rather than leaving
            // already-free entries on their old (possibly never-expiring)
            // deadline.
            if expiry_changed {
                let new_death_at = if expiry_ms > 0 {
                    Some(Instant::now() + Duration::from_millis(expiry_ms))
                } else {
                    None
                };
                for entry in state.free.iter_mut() {
                    entry.death_at = new_death_at;
                }
            }
        }
        self.inner.cv.notify_all();

        if expiry_changed {
            self.halt_reaper();
            if expiry_ms > 0 {
                self.spawn_reaper();
            }
        }
    }

    pub fn size(&self) -> u32 {
        self.inner.state.lock().unwrap().total() as u32
    }

    pub fn free_count(&self) -> u32 {
        self.inner.state.lock().unwrap().free.len() as u32
    }

    pub fn checked_out(&self) -> u32 {
        self.inner.state.lock().unwrap().used.len() as u32
    }

    pub fn hit_rate(&self) -> f64 {
        let state = self.inner.state.lock().unwrap();
        if state.requests == 0 {
            0.0
        } else {
            state.hits as f64 / state.requests as f64
        }
    }

    pub fn is_released(&self) -> bool {
        self.inner.state.lock().unwrap().released
    }

    /// Drop every currently idle item and destroy it, without releasing
    /// the pool. Items in use are left untouched.
    pub fn flush(&self) {
        let drained: Vec<M::Item> = {
            let mut state = self.inner.state.lock().unwrap();
            state.free.drain(..).map(|e| e.item).collect()
        };
        for item in drained {
            self.dispatch_destroy(item);
        }
    }

    /// Prepopulate the free list up to `n` total entries (clamped to
    /// `[0, poolSize]`), on a one-shot background worker. A new call halts
    /// any initialiser already in flight.
    pub fn init(&self, n: u32) {
        let pool_size = self.inner.state.lock().unwrap().pool_size;
        let target = if pool_size == 0 { n } else { n.min(pool_size) };

        self.halt_initializer();

        let stop = Arc::new(AtomicBool::new(false));
        let inner = self.inner.clone();
        let stop2 = stop.clone();
        let pool_for_thread = ResourcePool {
            inner: inner.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("dbpool-init-{}", inner.name))
            .spawn(move || {
                loop {
                    if stop2.load(Ordering::SeqCst) {
                        return;
                    }
                    {
                        let state = inner.state.lock().unwrap();
                        if state.total() as u32 >= target || state.released {
                            return;
                        }
                    }
                    match inner.manager.create() {
                        Ok(mut item) => {
                            if !inner.manager.validate(&mut item) {
                                pool_for_thread.dispatch_destroy(item);
                                continue;
                            }
                            let mut state = inner.state.lock().unwrap();
                            if state.released || state.total() as u32 >= target {
                                drop(state);
                                pool_for_thread.dispatch_destroy(item);
                                return;
                            }
                            let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
                            item.set_pool_id(id);
                            let death_at = if state.expiry_ms > 0 {
                                Some(Instant::now() + Duration::from_millis(state.expiry_ms))
                            } else {
                                None
                            };
                            state.free.push_back(Entry { item, death_at });
                            drop(state);
                            inner.cv.notify_all();
                        }
                        Err(e) => {
                            log::warn!("pool '{}' initialiser: create failed: {e}", inner.name);
                            return;
                        }
                    }
                    if stop2.load(Ordering::SeqCst) {
                        return;
                    }
                }
            })
            .expect("failed to spawn pool initialiser thread");

        *self.inner.initializer.lock().unwrap() = Some(HaltableWorker {
            stop,
            handle: Some(handle),
        });
    }

    fn halt_initializer(&self) {
        let existing = self.inner.initializer.lock().unwrap().take();
        if let Some(worker) = existing {
            self.inner.cv.notify_all();
            worker.halt();
        }
    }

    fn spawn_reaper(&self) {
        self.halt_reaper();
        let stop = Arc::new(AtomicBool::new(false));
        let inner = self.inner.clone();
        let stop2 = stop.clone();
        let pool_for_thread = ResourcePool {
            inner: inner.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("dbpool-reaper-{}", inner.name))
            .spawn(move || reaper_loop(inner, pool_for_thread, stop2))
            .expect("failed to spawn pool reaper thread");
        *self.inner.reaper.lock().unwrap() = Some(HaltableWorker {
            stop,
            handle: Some(handle),
        });
    }

    fn halt_reaper(&self) {
        let existing = self.inner.reaper.lock().unwrap().take();
        if let Some(worker) = existing {
            self.inner.cv.notify_all();
            worker.halt();
        }
    }

    /// Shut the pool down. Waits for every checked-out item to be returned
    /// (unless `force`, in which case in-use items that registered a
    /// force-close hook are proactively invalidated — see the design note
    /// on forced teardown in `DESIGN.md`). After this returns,
    /// `size() == 0` and every further `check_out` fails with
    /// `Error::Released`.
    pub fn release(&self, force: bool) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.released = true;
        }
        self.inner.cv.notify_all();
        self.halt_reaper();
        self.halt_initializer();

        if force {
            let mut state = self.inner.state.lock().unwrap();
            for used in state.used.values() {
                if let Some(force_close) = &used.force_close {
                    force_close();
                }
            }
            // A force-closed item's borrower may never call `check_in` —
            // e.g. `CachingSession::close` short-circuits once its
            // `force_close_handle` has already flipped it shut, so
            // `check_in` is the one path that would otherwise remove this
            // id from `used`. Clear the bookkeeping here instead: every
            // entry's hook has just run (or there was none to run and the
            // item is simply unreachable until its borrower drops it), so
            // nothing is still legitimately "checked out" once this
            // returns. Without this, `used` keeps stale ids forever and
            // `checked_out()`/`size()` never go back to zero (spec.md §8
            // invariant 3).
            state.used.clear();
        } else {
            let mut state = self.inner.state.lock().unwrap();
            while !state.used.is_empty() {
                state = self.inner.cv.wait(state).unwrap();
            }
        }

        let drained: Vec<M::Item> = {
            let mut state = self.inner.state.lock().unwrap();
            state.free.drain(..).map(|e| e.item).collect()
        };
        for item in drained {
            self.dispatch_destroy(item);
        }

        self.fire(PoolEvent::PoolReleased {
            pool: self.inner.name.clone(),
        });
        self.inner.listeners.clear();
    }

    /// Same as `release`, but runs on a detached background thread so the
    /// caller returns immediately.
    pub fn release_async(&self, force: bool) {
        let pool = self.clone();
        thread::spawn(move || pool.release(force));
    }
}

fn reaper_loop<M: Manage>(inner: Arc<Shared<M>>, pool: ResourcePool<M>, stop: Arc<AtomicBool>) {
    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }

        let expired: Vec<M::Item>;
        let free_is_empty;
        let interval_ms;
        {
            let mut state = inner.state.lock().unwrap();
            if state.released {
                return;
            }
            let expiry_ms = state.expiry_ms;
            if expiry_ms == 0 {
                // Parameters changed under us; this reaper is being
                // replaced momentarily. Park until halted.
                let _ = inner.cv.wait_timeout(state, Duration::from_millis(250));
                continue;
            }
            interval_ms = reaper_interval_ms(expiry_ms);
            let now = Instant::now();
            let mut kept = VecDeque::with_capacity(state.free.len());
            let mut to_destroy = Vec::new();
            while let Some(entry) = state.free.pop_front() {
                if entry.death_at.map_or(false, |d| now > d) {
                    to_destroy.push(entry.item);
                } else {
                    kept.push_back(entry);
                }
            }
            state.free = kept;
            expired = to_destroy;
            free_is_empty = state.free.is_empty();
        }

        for item in expired {
            pool.dispatch_destroy(item);
        }

        if free_is_empty {
            let state = inner.state.lock().unwrap();
            if state.released {
                return;
            }
            let _ = inner
                .cv
                .wait_timeout(state, Duration::from_millis(interval_ms))
                .unwrap();
        } else {
            thread::sleep(Duration::from_millis(interval_ms));
        }
    }
}

/// `min(5000ms, expiryMs/5)`, floored at 1ms so a tiny expiry still polls.
fn reaper_interval_ms(expiry_ms: u64) -> u64 {
    (expiry_ms / 5).min(5_000).max(1)
}
