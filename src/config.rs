use std::env;

/// Process configuration. All values come from environment variables with
/// defaults suitable for local development; tests construct this directly.
///
/// Environment variables:
/// - `LISTEN_ADDR` — bind address, `host:port` (default: `0.0.0.0:8000`)
/// - `DATABASE_DSN` — SQLite database path (default: `data/chatwire.db`)
/// - `MASTER_API_KEY` — key for `/admin/tenants` (default: dev-only key)
/// - `WORKER_INTERVAL` — delivery worker tick, seconds (default: 30)
/// - `RETRY_MAX_ATTEMPTS` — ceiling on per-tenant retry limits (default: 5)
/// - `RETRY_INTERVAL` — minimum seconds between attempts per row (default: 30)
/// - `CHECKPOINT_INTERVAL` — WAL checkpoint period, seconds (default: 300)
/// - `SHUTDOWN_DRAIN_TIMEOUT` — graceful-shutdown window, seconds (default: 10)
/// - `LOG_LEVEL` — tracing filter directive (default: `info`)
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub database_dsn: String,
    pub master_api_key: String,
    pub worker_interval_secs: u64,
    pub retry_max_attempts: i64,
    pub retry_interval_secs: u64,
    pub checkpoint_interval_secs: u64,
    pub shutdown_drain_timeout_secs: u64,
    pub log_level: String,
    /// Rows fetched per tenant per worker tick (undelivered and notifications).
    pub worker_batch: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            database_dsn: "data/chatwire.db".to_string(),
            master_api_key: "master-dev-key".to_string(),
            worker_interval_secs: 30,
            retry_max_attempts: 5,
            retry_interval_secs: 30,
            checkpoint_interval_secs: 300,
            shutdown_drain_timeout_secs: 10,
            log_level: "info".to_string(),
            worker_batch: 50,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("LISTEN_ADDR")
            && !val.is_empty()
        {
            config.listen_addr = val;
        }
        if let Ok(val) = env::var("DATABASE_DSN")
            && !val.is_empty()
        {
            config.database_dsn = val;
        }
        if let Ok(val) = env::var("MASTER_API_KEY")
            && !val.is_empty()
        {
            config.master_api_key = val;
        }
        if let Ok(val) = env::var("WORKER_INTERVAL")
            && let Ok(n) = val.parse::<u64>()
        {
            config.worker_interval_secs = n;
        }
        if let Ok(val) = env::var("RETRY_MAX_ATTEMPTS")
            && let Ok(n) = val.parse::<i64>()
        {
            config.retry_max_attempts = n;
        }
        if let Ok(val) = env::var("RETRY_INTERVAL")
            && let Ok(n) = val.parse::<u64>()
        {
            config.retry_interval_secs = n;
        }
        if let Ok(val) = env::var("CHECKPOINT_INTERVAL")
            && let Ok(n) = val.parse::<u64>()
        {
            config.checkpoint_interval_secs = n;
        }
        if let Ok(val) = env::var("SHUTDOWN_DRAIN_TIMEOUT")
            && let Ok(n) = val.parse::<u64>()
        {
            config.shutdown_drain_timeout_secs = n;
        }
        if let Ok(val) = env::var("LOG_LEVEL")
            && !val.is_empty()
        {
            config.log_level = val;
        }

        config
    }

    /// Split `LISTEN_ADDR` into the address/port pair Rocket's figment wants.
    /// Falls back to the default bind when the value does not parse.
    pub fn bind_parts(&self) -> (String, u16) {
        match self.listen_addr.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(p) => {
                    let host = if host.is_empty() { "0.0.0.0" } else { host };
                    (host.to_string(), p)
                }
                Err(_) => ("0.0.0.0".to_string(), 8000),
            },
            None => ("0.0.0.0".to_string(), 8000),
        }
    }
}
