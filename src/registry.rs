//! A registry of named connection pools loaded from one properties source.
//! A pool's construction failure — a bad URL, a driver that panics while
//! connecting to its config — is fatal to that pool only; the registry
//! logs it and keeps bringing up the rest. A pool whose section (or the
//! top-level config) names a `logfile` gets a [`FileLogSink`] attached as
//! an event listener; failing to open that file is logged and the pool is
//! still brought up without it.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

use crate::config::{PoolSection, RootConfig};
use crate::connection::{new_connection_pool, ConnectionManager};
use crate::driver::Driver;
use crate::logsink::FileLogSink;
use crate::pool::ResourcePool;

pub struct PoolManager<D: Driver> {
    pools: Mutex<HashMap<String, ResourcePool<ConnectionManager<D>>>>,
}

impl<D: Driver> Default for PoolManager<D> {
    fn default() -> Self {
        PoolManager {
            pools: Mutex::new(HashMap::new()),
        }
    }
}

impl<D: Driver> PoolManager<D> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring up every `pool.<name>.*` section in `root`, resolving each
    /// pool's driver via `driver_for(name, section)`. A section that
    /// resolves to `None`, or whose resolution panics, is skipped with a
    /// logged error rather than aborting the whole load.
    pub fn load(&self, root: &RootConfig, mut driver_for: impl FnMut(&str, &PoolSection) -> Option<D>) {
        for (name, section) in &root.pools {
            let driver = match panic::catch_unwind(AssertUnwindSafe(|| driver_for(name, section))) {
                Ok(Some(driver)) => driver,
                Ok(None) => {
                    log::error!("pool '{name}': no driver resolved for this pool, skipping");
                    continue;
                }
                Err(_) => {
                    log::error!("pool '{name}': driver construction panicked, skipping");
                    continue;
                }
            };

            let init = section.clamped_init();
            let logfile = section.logfile.clone().or_else(|| root.logfile.clone());
            let dateformat = section.dateformat.clone().or_else(|| root.dateformat.clone());
            let config = section.clone().into_connection_pool_config(name.clone());
            let pool = new_connection_pool(config, driver);
            if init > 0 {
                pool.init(init);
            }
            if let Some(path) = logfile {
                match FileLogSink::open(&path, dateformat.as_deref()) {
                    Ok(sink) => pool.add_listener(Box::new(sink)),
                    Err(e) => log::error!("pool '{name}': failed to open log file '{path}': {e}"),
                }
            }
            self.pools.lock().unwrap().insert(name.clone(), pool);
        }
    }

    pub fn get(&self, name: &str) -> Option<ResourcePool<ConnectionManager<D>>> {
        self.pools.lock().unwrap().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.lock().unwrap().keys().cloned().collect()
    }

    pub fn shutdown(&self, name: &str, force: bool) {
        let pool = self.pools.lock().unwrap().remove(name);
        if let Some(pool) = pool {
            pool.release(force);
        }
    }

    pub fn shutdown_all(&self, force: bool) {
        let pools: Vec<_> = self.pools.lock().unwrap().drain().map(|(_, pool)| pool).collect();
        for pool in pools {
            pool.release(force);
        }
    }
}
