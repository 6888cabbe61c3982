//! Runtime configuration for the warehouse service.
//!
//! All options are loaded from environment variables with production
//! defaults. Scheduler knobs use the `SILO_WAREHOUSE_` prefix; the
//! metadata-DB connection settings keep their fixed `WAREHOUSE_JOBS_DB_*`
//! names for compatibility with existing deployments. In embedded mode the
//! service reuses the host process's jobs-DB settings (`JOBS_DB_*`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mode::WarehouseMode;

/// Configuration for the warehouse service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarehouseConfig {
    /// HTTP port for ingress and health endpoints.
    pub web_port: u16,

    /// Deployment mode (master/slave/master_and_slave/embedded).
    pub mode: WarehouseMode,

    /// Global cap on concurrently running upload batches, across all
    /// destination types.
    pub no_of_workers: usize,

    /// Parsing routines per slave process.
    pub no_of_slave_worker_routines: usize,

    /// Staging files grouped into a single upload.
    pub staging_files_batch_size: usize,

    /// Default minimum seconds between upload starts for a
    /// (source, destination) pair. Destinations may override via their
    /// `syncFrequency` config (minutes).
    pub upload_freq_secs: u64,

    /// Sleep between router main-loop ticks, in seconds.
    pub main_loop_sleep_secs: u64,

    /// Sleep before re-checking the global worker cap, in seconds.
    pub worker_retry_sleep_secs: u64,

    /// Pending uploads are retried while attempts stay below this count.
    pub min_retry_attempts: i64,

    /// Pending uploads are also retried while wall-clock time since the
    /// first attempt stays below this window, in minutes.
    pub retry_time_window_mins: u64,

    /// Bypass the frequency gate entirely.
    pub warehouse_sync_freq_ignore: bool,

    /// Upload statuses fetched per live-status sync.
    pub warehouse_sync_pre_fetch_count: usize,

    /// Page size for staging-file schema reads.
    pub staging_files_schema_pagination_size: usize,

    /// Metadata database connection settings.
    pub db: DbConfig,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            web_port: 8082,
            mode: WarehouseMode::Embedded,
            no_of_workers: 8,
            no_of_slave_worker_routines: 4,
            staging_files_batch_size: 240,
            upload_freq_secs: 1800,
            main_loop_sleep_secs: 60,
            worker_retry_sleep_secs: 5,
            min_retry_attempts: 3,
            retry_time_window_mins: 180,
            warehouse_sync_freq_ignore: false,
            warehouse_sync_pre_fetch_count: 10,
            staging_files_schema_pagination_size: 100,
            db: DbConfig::default(),
        }
    }
}

impl WarehouseConfig {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `SILO_WAREHOUSE_WEB_PORT`
    /// - `SILO_WAREHOUSE_MODE` (`master` | `slave` | `master_and_slave` | `embedded`)
    /// - `SILO_WAREHOUSE_NO_OF_WORKERS`
    /// - `SILO_WAREHOUSE_NO_OF_SLAVE_WORKER_ROUTINES`
    /// - `SILO_WAREHOUSE_STAGING_FILES_BATCH_SIZE`
    /// - `SILO_WAREHOUSE_UPLOAD_FREQ_SECS`
    /// - `SILO_WAREHOUSE_MAIN_LOOP_SLEEP_SECS`
    /// - `SILO_WAREHOUSE_WORKER_RETRY_SLEEP_SECS`
    /// - `SILO_WAREHOUSE_MIN_RETRY_ATTEMPTS`
    /// - `SILO_WAREHOUSE_RETRY_TIME_WINDOW_MINS`
    /// - `SILO_WAREHOUSE_SYNC_FREQ_IGNORE`
    /// - `SILO_WAREHOUSE_SYNC_PRE_FETCH_COUNT`
    /// - `SILO_WAREHOUSE_STAGING_FILES_SCHEMA_PAGINATION_SIZE`
    /// - `WAREHOUSE_JOBS_DB_{HOST,PORT,USER,PASSWORD,DB_NAME,SSL_MODE}`
    ///
    /// # Errors
    ///
    /// Returns an error if any variable is present but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = env_u16("SILO_WAREHOUSE_WEB_PORT")? {
            config.web_port = port;
        }
        if let Some(mode) = env_string("SILO_WAREHOUSE_MODE") {
            config.mode = mode.parse()?;
        }
        if let Some(n) = env_usize("SILO_WAREHOUSE_NO_OF_WORKERS")? {
            if n == 0 {
                return Err(Error::InvalidInput(
                    "SILO_WAREHOUSE_NO_OF_WORKERS must be greater than 0".to_string(),
                ));
            }
            config.no_of_workers = n;
        }
        if let Some(n) = env_usize("SILO_WAREHOUSE_NO_OF_SLAVE_WORKER_ROUTINES")? {
            config.no_of_slave_worker_routines = n;
        }
        if let Some(n) = env_usize("SILO_WAREHOUSE_STAGING_FILES_BATCH_SIZE")? {
            if n == 0 {
                return Err(Error::InvalidInput(
                    "SILO_WAREHOUSE_STAGING_FILES_BATCH_SIZE must be greater than 0".to_string(),
                ));
            }
            config.staging_files_batch_size = n;
        }
        if let Some(secs) = env_u64("SILO_WAREHOUSE_UPLOAD_FREQ_SECS")? {
            config.upload_freq_secs = secs;
        }
        if let Some(secs) = env_u64("SILO_WAREHOUSE_MAIN_LOOP_SLEEP_SECS")? {
            config.main_loop_sleep_secs = secs;
        }
        if let Some(secs) = env_u64("SILO_WAREHOUSE_WORKER_RETRY_SLEEP_SECS")? {
            config.worker_retry_sleep_secs = secs;
        }
        if let Some(n) = env_i64("SILO_WAREHOUSE_MIN_RETRY_ATTEMPTS")? {
            config.min_retry_attempts = n;
        }
        if let Some(mins) = env_u64("SILO_WAREHOUSE_RETRY_TIME_WINDOW_MINS")? {
            config.retry_time_window_mins = mins;
        }
        if let Some(ignore) = env_bool("SILO_WAREHOUSE_SYNC_FREQ_IGNORE")? {
            config.warehouse_sync_freq_ignore = ignore;
        }
        if let Some(n) = env_usize("SILO_WAREHOUSE_SYNC_PRE_FETCH_COUNT")? {
            config.warehouse_sync_pre_fetch_count = n;
        }
        if let Some(n) = env_usize("SILO_WAREHOUSE_STAGING_FILES_SCHEMA_PAGINATION_SIZE")? {
            config.staging_files_schema_pagination_size = n;
        }

        config.db = DbConfig::from_env(config.mode)?;

        Ok(config)
    }

    /// Sleep between router main-loop ticks.
    #[must_use]
    pub const fn main_loop_sleep(&self) -> Duration {
        Duration::from_secs(self.main_loop_sleep_secs)
    }

    /// Sleep before re-checking the global worker cap.
    #[must_use]
    pub const fn worker_retry_sleep(&self) -> Duration {
        Duration::from_secs(self.worker_retry_sleep_secs)
    }

    /// Retry window for pending uploads.
    #[must_use]
    pub const fn retry_time_window(&self) -> Duration {
        Duration::from_secs(self.retry_time_window_mins * 60)
    }
}

/// Metadata database connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database user.
    pub user: String,
    /// Database password.
    #[serde(skip_serializing, default)]
    pub password: String,
    /// Database name.
    pub db_name: String,
    /// SSL mode (`disable`, `require`, ...).
    pub ssl_mode: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            user: "silo".to_string(),
            password: "silo".to_string(),
            db_name: "silo".to_string(),
            ssl_mode: "disable".to_string(),
        }
    }
}

impl DbConfig {
    /// Loads DB settings from `WAREHOUSE_JOBS_DB_*`.
    ///
    /// In embedded mode the service shares the host process's jobs DB, so
    /// each setting falls back to the corresponding `JOBS_DB_*` variable
    /// before the default.
    ///
    /// # Errors
    ///
    /// Returns an error if the port variable cannot be parsed.
    pub fn from_env(mode: WarehouseMode) -> Result<Self> {
        let mut config = Self::default();

        let lookup = |suffix: &str| -> Option<String> {
            env_string(&format!("WAREHOUSE_JOBS_DB_{suffix}")).or_else(|| {
                if mode.is_standalone() {
                    None
                } else {
                    env_string(&format!("JOBS_DB_{suffix}"))
                }
            })
        };

        if let Some(host) = lookup("HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("PORT") {
            config.port = port
                .parse::<u16>()
                .map_err(|e| Error::InvalidInput(format!("WAREHOUSE_JOBS_DB_PORT must be a u16: {e}")))?;
        }
        if let Some(user) = lookup("USER") {
            config.user = user;
        }
        if let Some(password) = lookup("PASSWORD") {
            config.password = password;
        }
        if let Some(db_name) = lookup("DB_NAME") {
            config.db_name = db_name;
        }
        if let Some(ssl_mode) = lookup("SSL_MODE") {
            config.ssl_mode = ssl_mode;
        }

        Ok(config)
    }

    /// Postgres connection URL for this configuration.
    #[must_use]
    pub fn connection_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.user, self.password, self.host, self.port, self.db_name, self.ssl_mode
        )
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u16(name: &str) -> Result<Option<u16>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u16>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn env_i64(name: &str) -> Result<Option<i64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<i64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be an i64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(Some(true)),
        "false" | "0" | "no" | "n" => Ok(Some(false)),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_values() {
        let config = WarehouseConfig::default();
        assert_eq!(config.web_port, 8082);
        assert_eq!(config.mode, WarehouseMode::Embedded);
        assert_eq!(config.no_of_workers, 8);
        assert_eq!(config.no_of_slave_worker_routines, 4);
        assert_eq!(config.staging_files_batch_size, 240);
        assert_eq!(config.upload_freq_secs, 1800);
        assert_eq!(config.main_loop_sleep_secs, 60);
        assert_eq!(config.worker_retry_sleep_secs, 5);
        assert_eq!(config.min_retry_attempts, 3);
        assert_eq!(config.retry_time_window_mins, 180);
        assert!(!config.warehouse_sync_freq_ignore);
        assert_eq!(config.warehouse_sync_pre_fetch_count, 10);
        assert_eq!(config.staging_files_schema_pagination_size, 100);
    }

    #[test]
    fn duration_accessors() {
        let config = WarehouseConfig::default();
        assert_eq!(config.main_loop_sleep(), Duration::from_secs(60));
        assert_eq!(config.worker_retry_sleep(), Duration::from_secs(5));
        assert_eq!(config.retry_time_window(), Duration::from_secs(180 * 60));
    }

    #[test]
    fn connection_url_includes_ssl_mode() {
        let db = DbConfig::default();
        let url = db.connection_url();
        assert!(url.starts_with("postgres://"));
        assert!(url.ends_with("?sslmode=disable"));
        assert!(url.contains("localhost:5432"));
    }

    #[test]
    fn password_is_not_serialized() {
        let db = DbConfig {
            password: "super-secret".to_string(),
            ..DbConfig::default()
        };
        let json = serde_json::to_string(&db).unwrap();
        assert!(!json.contains("super-secret"));
    }
}
