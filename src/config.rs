//! Properties-style configuration loading: `key=value` lines,
//! `#`-comments, blank lines ignored. One top-level file can describe the
//! `drivers` list plus any number of `pool.<name>.<option>` sections.

use std::collections::HashMap;
use std::time::Duration;

use crate::connection::ConnectionPoolConfig;
use crate::discipline::AccessDiscipline;

/// The fully parsed contents of a properties source.
#[derive(Debug, Clone, Default)]
pub struct RootConfig {
    pub drivers: Vec<String>,
    pub logfile: Option<String>,
    pub dateformat: Option<String>,
    pub pools: HashMap<String, PoolSection>,
}

/// One `pool.<name>.*` section. Numeric options that fail to parse are
/// logged and defaulted to zero rather than treated as fatal.
#[derive(Debug, Clone)]
pub struct PoolSection {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub maxpool: u32,
    pub maxconn: u32,
    pub init: u32,
    pub expiry_ms: u64,
    pub validator: Option<String>,
    pub decoder: Option<String>,
    pub cache: bool,
    pub async_destroy: bool,
    pub debug: bool,
    pub logfile: Option<String>,
    pub dateformat: Option<String>,
    pub properties: HashMap<String, String>,
}

impl Default for PoolSection {
    fn default() -> Self {
        PoolSection {
            url: None,
            user: None,
            password: None,
            maxpool: 0,
            maxconn: 0,
            init: 0,
            expiry_ms: 0,
            validator: None,
            decoder: None,
            cache: true,
            async_destroy: false,
            debug: false,
            logfile: None,
            dateformat: None,
            properties: HashMap::new(),
        }
    }
}

fn parse_lines(text: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            out.push((key.trim().to_string(), value.trim().to_string()));
        } else {
            log::warn!("config: ignoring malformed line {line:?}");
        }
    }
    out
}

fn parse_u32(key: &str, value: &str) -> u32 {
    match value.parse::<u32>() {
        Ok(n) => n,
        Err(_) => {
            log::warn!("config: option '{key}' has non-numeric value {value:?}, defaulting to 0");
            0
        }
    }
}

fn parse_u64_seconds_as_millis(key: &str, value: &str) -> u64 {
    match value.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs).as_millis() as u64,
        Err(_) => {
            log::warn!("config: option '{key}' has non-numeric value {value:?}, defaulting to 0");
            0
        }
    }
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => true,
        "false" | "0" | "no" | "off" => false,
        _ => default,
    }
}

fn split_driver_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a whole properties file into a [`RootConfig`].
pub fn parse(text: &str) -> RootConfig {
    let mut root = RootConfig::default();
    let mut pools: HashMap<String, PoolSection> = HashMap::new();

    for (key, value) in parse_lines(text) {
        if key == "drivers" {
            root.drivers = split_driver_list(&value);
            continue;
        }
        if key == "logfile" {
            root.logfile = Some(value);
            continue;
        }
        if key == "dateformat" {
            root.dateformat = Some(value);
            continue;
        }

        let Some(rest) = key.strip_prefix("pool.") else {
            log::warn!("config: ignoring unrecognised top-level option '{key}'");
            continue;
        };
        let Some((name, option)) = rest.split_once('.') else {
            log::warn!("config: ignoring malformed pool option '{key}'");
            continue;
        };
        let section = pools.entry(name.to_string()).or_default();

        if let Some(prop) = option.strip_prefix("prop.") {
            section.properties.insert(prop.to_string(), value);
            continue;
        }

        match option {
            "url" => section.url = Some(value),
            "user" => section.user = Some(value),
            "password" => section.password = Some(value),
            "maxpool" => section.maxpool = parse_u32(&key, &value),
            "maxconn" => section.maxconn = parse_u32(&key, &value),
            "init" => section.init = parse_u32(&key, &value),
            "expiry" => section.expiry_ms = parse_u64_seconds_as_millis(&key, &value),
            "validator" => section.validator = Some(value),
            "decoder" => section.decoder = Some(value),
            "cache" => section.cache = parse_bool(&value, true),
            "async" => section.async_destroy = parse_bool(&value, false),
            "debug" => section.debug = parse_bool(&value, false),
            "logfile" => section.logfile = Some(value),
            "dateformat" => section.dateformat = Some(value),
            other => log::warn!("config: ignoring unrecognised pool option '{other}' for pool '{name}'"),
        }
    }

    root.pools = pools;
    root
}

impl PoolSection {
    /// Clamp `init` to `[0, poolSize]`; `maxconn`, if set,
    /// is raised to at least `poolSize` by `PoolBuilder::build` already,
    /// so it isn't repeated here.
    pub fn clamped_init(&self) -> u32 {
        if self.maxpool == 0 {
            self.init
        } else {
            self.init.min(self.maxpool)
        }
    }

    /// Turn this section into a [`ConnectionPoolConfig`], leaving the
    /// access discipline at its default (LIFO) — there's no per-pool
    /// option to configure it.
    pub fn into_connection_pool_config(self, name: String) -> ConnectionPoolConfig {
        ConnectionPoolConfig {
            name,
            url: self.url.unwrap_or_default(),
            user: self.user,
            password: self.password,
            properties: self.properties,
            cache_simple: self.cache,
            cache_prepared: self.cache,
            cache_callable: self.cache,
            pool_size: self.maxpool,
            max_size: self.maxconn,
            expiry_ms: self.expiry_ms,
            access: AccessDiscipline::Lifo,
            async_destroy: self.async_destroy,
        }
    }
}
