//! Layer 2: binds the generic resource pool to database sessions.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::caching_session::CachingSession;
use crate::decoder::{IdentityDecoder, PasswordDecoder};
use crate::discipline::AccessDiscipline;
use crate::driver::Driver;
use crate::error::Error;
use crate::manage::Manage;
use crate::pool::ResourcePool;
use crate::validator::{DefaultValidator, Validator};

/// Everything needed to stand up one named connection pool, independent
/// of which driver it talks to. Usually built from a properties source
/// (`crate::config`) rather than by hand.
#[derive(Debug, Clone)]
pub struct ConnectionPoolConfig {
    pub name: String,
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub properties: HashMap<String, String>,
    pub cache_simple: bool,
    pub cache_prepared: bool,
    pub cache_callable: bool,
    pub pool_size: u32,
    pub max_size: u32,
    pub expiry_ms: u64,
    pub access: AccessDiscipline,
    pub async_destroy: bool,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        ConnectionPoolConfig {
            name: String::new(),
            url: String::new(),
            user: None,
            password: None,
            properties: HashMap::new(),
            cache_simple: true,
            cache_prepared: true,
            cache_callable: true,
            pool_size: 0,
            max_size: 0,
            expiry_ms: 0,
            access: AccessDiscipline::Lifo,
            async_destroy: false,
        }
    }
}

/// The `Manage` implementation that turns a `Driver` into a pool of
/// `CachingSession`s.
pub struct ConnectionManager<D: Driver> {
    driver: D,
    url: String,
    user: Option<String>,
    password: Option<String>,
    properties: HashMap<String, String>,
    decoder: Box<dyn PasswordDecoder>,
    validator: Box<dyn Validator<D>>,
    cache_simple: bool,
    cache_prepared: bool,
    cache_callable: bool,

    /// Bound once, immediately after the owning `ResourcePool` is built
    /// (`new_connection_pool`), so `create()` can hand each session a
    /// back-pointer to the pool it belongs to (needed for `close()`).
    pool: OnceLock<ResourcePool<ConnectionManager<D>>>,
}

impl<D: Driver> ConnectionManager<D> {
    fn bind_pool(&self, pool: ResourcePool<ConnectionManager<D>>) {
        if self.pool.set(pool).is_err() {
            log::error!("connection manager: pool already bound");
        }
    }

    fn pool(&self) -> &ResourcePool<ConnectionManager<D>> {
        self.pool
            .get()
            .expect("connection manager used before its pool was bound")
    }
}

impl<D: Driver> Manage for ConnectionManager<D> {
    type Item = CachingSession<D>;

    /// Credential fallback chain:
    /// 1. a configured properties bag wins outright — the (possibly
    ///    decoded) password is injected into a copy of the bag;
    /// 2. else a configured user tries `(url, user, password)`, falling
    ///    back to `(url)` alone (and logging the downgrade) if that fails;
    /// 3. else `(url)` alone.
    fn create(&self) -> Result<Self::Item, Error> {
        let pool = self.pool();

        let mut raw = if !self.properties.is_empty() {
            let mut bag = self.properties.clone();
            if let Some(password) = &self.password {
                bag.insert("password".to_string(), self.decoder.decode(password)?);
            }
            self.driver.connect_with_properties(&self.url, &bag)?
        } else if let Some(user) = &self.user {
            let decoded = match &self.password {
                Some(password) => self.decoder.decode(password)?,
                None => String::new(),
            };
            match self.driver.connect(&self.url, Some(user), Some(&decoded)) {
                Ok(session) => session,
                Err(e) => {
                    log::warn!(
                        "connection pool '{}': authenticated connect failed ({e}), falling back to url-only connect",
                        pool.name()
                    );
                    self.driver.connect(&self.url, None, None)?
                }
            }
        } else {
            self.driver.connect(&self.url, None, None)?
        };

        if let Err(e) = raw.clear_warnings() {
            log::debug!(
                "connection pool '{}': draining warnings on new session failed: {e}",
                pool.name()
            );
        }

        Ok(CachingSession::new(
            pool.clone(),
            raw,
            self.cache_simple,
            self.cache_prepared,
            self.cache_callable,
        ))
    }

    fn validate(&self, item: &mut Self::Item) -> bool {
        self.validator.validate(item)
    }

    fn destroy(&self, item: Self::Item) {
        if let Err(e) = item.release_all() {
            log::error!("connection pool '{}': session release failed: {e}", self.pool().name());
        }
    }
}

/// Build a connection pool with the default validator (`¬isClosed()`) and
/// the default (identity) password decoder.
pub fn new_connection_pool<D: Driver>(config: ConnectionPoolConfig, driver: D) -> ResourcePool<ConnectionManager<D>> {
    new_connection_pool_with(config, driver, Box::new(DefaultValidator), Box::new(IdentityDecoder))
}

/// Build a connection pool with an explicit validator and password decoder.
pub fn new_connection_pool_with<D: Driver>(
    config: ConnectionPoolConfig,
    driver: D,
    validator: Box<dyn Validator<D>>,
    decoder: Box<dyn PasswordDecoder>,
) -> ResourcePool<ConnectionManager<D>> {
    let manager = ConnectionManager {
        driver,
        url: config.url,
        user: config.user,
        password: config.password,
        properties: config.properties,
        decoder,
        validator,
        cache_simple: config.cache_simple,
        cache_prepared: config.cache_prepared,
        cache_callable: config.cache_callable,
        pool: OnceLock::new(),
    };

    let pool = ResourcePool::builder(config.name)
        .pool_size(config.pool_size)
        .max_size(config.max_size)
        .expiry_ms(config.expiry_ms)
        .access(config.access)
        .async_destroy(config.async_destroy)
        .build(manager);

    pool.manager().bind_pool(pool.clone());
    pool
}
