//! Environment-driven configuration. The option set is closed: any
//! other `RILL_*` variable is rejected instead of silently ignored.

use crate::error::SyncError;
use crate::uploader::RetryPolicy;
use rill::KvStore;
use std::env;
use std::str::FromStr;
use std::time::Duration;

const ENV_PREFIX: &str = "RILL_";

const KNOWN_OPTIONS: &[&str] = &[
    "RILL_ENDPOINT",
    "RILL_NAMESPACE",
    "RILL_DATABASE",
    "RILL_STORE",
    "RILL_TOKEN",
    "RILL_CLIENT_ID",
    "RILL_TTL_DEFAULT",
    "RILL_LOG_LEVEL",
    "RILL_SNAPSHOT_DEBOUNCE_MS",
    "RILL_RETRY_MAX",
    "RILL_RETRY_BASE_MS",
    "RILL_RETRY_CAP_MS",
    "RILL_K_MAX",
    "RILL_RPC_TIMEOUT",
];

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Where the key-value layer lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreKind {
    #[default]
    Memory,
    Persistent,
}

impl FromStr for StoreKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(StoreKind::Memory),
            "persistent" => Ok(StoreKind::Persistent),
            other => Err(SyncError::Config(format!(
                "store must be 'memory' or 'persistent', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Remote URL; absent means local-only operation.
    pub endpoint: Option<String>,
    pub namespace: String,
    pub database: String,
    pub store: StoreKind,
    /// Bearer credential for the remote.
    pub token: Option<String>,
    /// Stable client identifier; generated and persisted when absent.
    pub client_id: Option<String>,
    /// Default view TTL when a registration does not carry one.
    pub ttl_default: Duration,
    pub log_level: String,
    pub snapshot_debounce_ms: u64,
    pub retry_max: u32,
    pub retry_base_ms: u64,
    pub retry_cap_ms: u64,
    /// Iteration bound of the convergence loop.
    pub k_max: u32,
    pub rpc_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            namespace: "app".to_string(),
            database: "main".to_string(),
            store: StoreKind::Memory,
            token: None,
            client_id: None,
            ttl_default: Duration::from_secs(600),
            log_level: "info".to_string(),
            snapshot_debounce_ms: 2_000,
            retry_max: 8,
            retry_base_ms: 10,
            retry_cap_ms: 5_000,
            k_max: 10,
            rpc_timeout: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Read the closed option set from the environment (a `.env` file
    /// is honored when present).
    pub fn from_env() -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();

        for (key, _) in env::vars() {
            if key.starts_with(ENV_PREFIX) && !KNOWN_OPTIONS.contains(&key.as_str()) {
                return Err(SyncError::Config(format!(
                    "unrecognized option {}",
                    key
                )));
            }
        }

        let mut config = Config::default();
        config.endpoint = read("RILL_ENDPOINT");
        if let Some(ns) = read("RILL_NAMESPACE") {
            config.namespace = ns;
        }
        if let Some(db) = read("RILL_DATABASE") {
            config.database = db;
        }
        if let Some(store) = read("RILL_STORE") {
            config.store = store.parse()?;
        }
        config.token = read("RILL_TOKEN");
        config.client_id = read("RILL_CLIENT_ID");
        if let Some(ttl) = read("RILL_TTL_DEFAULT") {
            config.ttl_default = parse_duration("RILL_TTL_DEFAULT", &ttl)?;
        }
        if let Some(level) = read("RILL_LOG_LEVEL") {
            if !LOG_LEVELS.contains(&level.as_str()) {
                return Err(SyncError::Config(format!(
                    "log level must be one of {}, got '{}'",
                    LOG_LEVELS.join("|"),
                    level
                )));
            }
            config.log_level = level;
        }
        if let Some(ms) = read("RILL_SNAPSHOT_DEBOUNCE_MS") {
            config.snapshot_debounce_ms = parse_number("RILL_SNAPSHOT_DEBOUNCE_MS", &ms)?;
        }
        if let Some(n) = read("RILL_RETRY_MAX") {
            config.retry_max = parse_number("RILL_RETRY_MAX", &n)? as u32;
        }
        if let Some(ms) = read("RILL_RETRY_BASE_MS") {
            config.retry_base_ms = parse_number("RILL_RETRY_BASE_MS", &ms)?;
        }
        if let Some(ms) = read("RILL_RETRY_CAP_MS") {
            config.retry_cap_ms = parse_number("RILL_RETRY_CAP_MS", &ms)?;
        }
        if let Some(k) = read("RILL_K_MAX") {
            config.k_max = parse_number("RILL_K_MAX", &k)? as u32;
        }
        if let Some(t) = read("RILL_RPC_TIMEOUT") {
            config.rpc_timeout = parse_duration("RILL_RPC_TIMEOUT", &t)?;
        }
        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max,
            base: Duration::from_millis(self.retry_base_ms),
            cap: Duration::from_millis(self.retry_cap_ms),
        }
    }

    pub fn reconcile_limits(&self) -> crate::reconcile::ReconcileLimits {
        crate::reconcile::ReconcileLimits {
            k_max: self.k_max,
            rpc_timeout: self.rpc_timeout,
        }
    }

    /// Open the key-value layer selected by `store`, namespaced by
    /// `namespace`/`database` for the persistent variant.
    pub fn open_kv(&self, base_dir: &std::path::Path) -> Result<std::sync::Arc<dyn KvStore>, SyncError> {
        match self.store {
            StoreKind::Memory => Ok(std::sync::Arc::new(rill::MemoryKv::new())),
            StoreKind::Persistent => {
                let dir = base_dir.join(&self.namespace).join(&self.database);
                Ok(std::sync::Arc::new(rill::FileKv::new(dir)?))
            }
        }
    }
}

fn read(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_duration(key: &str, value: &str) -> Result<Duration, SyncError> {
    humantime::parse_duration(value)
        .map_err(|e| SyncError::Config(format!("{}: {}", key, e)))
}

fn parse_number(key: &str, value: &str) -> Result<u64, SyncError> {
    value
        .parse::<u64>()
        .map_err(|e| SyncError::Config(format!("{}: {}", key, e)))
}

const CLIENT_ID_KEY: &str = "rill/client-id";

/// Stable client id: configured value, persisted value, or a freshly
/// generated ulid that is stored for the next start.
pub fn load_or_create_client_id(
    kv: &dyn KvStore,
    configured: Option<&str>,
) -> Result<String, SyncError> {
    if let Some(id) = configured {
        return Ok(id.to_string());
    }
    if let Some(bytes) = kv.get(CLIENT_ID_KEY)? {
        if let Ok(id) = String::from_utf8(bytes) {
            return Ok(id);
        }
    }
    let id = ulid::Ulid::new().to_string();
    kv.set(CLIENT_ID_KEY, id.as_bytes())?;
    Ok(id)
}
