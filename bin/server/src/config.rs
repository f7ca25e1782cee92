//! Centralized server configuration.
//!
//! Strongly-typed configuration loaded via the `config` crate from
//! environment variables, e.g. `DATABASE_URL`, `WORKERS__COUNT`,
//! `ADMISSION__MAX_ACTIVE_JOBS`.

use serde::Deserialize;

/// Top-level server configuration.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Worker pool configuration.
    #[serde(default)]
    pub workers: WorkerPoolConfig,

    /// Admission configuration.
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Retention janitor configuration.
    #[serde(default)]
    pub janitor: JanitorConfig,
}

/// Worker pool sizing and timing.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn.
    #[serde(default = "default_worker_count")]
    pub count: usize,

    /// Idle sleep between empty polls, in milliseconds.
    #[serde(default = "default_idle_wait_ms")]
    pub idle_wait_ms: u64,
}

/// Admission gate tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum pending + processing jobs per tenant.
    #[serde(default = "default_max_active_jobs")]
    pub max_active_jobs: u64,

    /// Fallback monthly execution quota for tenants without a limits
    /// row.
    #[serde(default = "default_monthly_executions")]
    pub default_monthly_executions: u64,

    /// How long cached tier limits stay fresh, in seconds.
    #[serde(default = "default_limit_cache_ttl_seconds")]
    pub limit_cache_ttl_seconds: i64,
}

/// Retention janitor timing.
#[derive(Debug, Clone, Deserialize)]
pub struct JanitorConfig {
    /// Interval between purge runs, in seconds.
    #[serde(default = "default_janitor_interval_seconds")]
    pub interval_seconds: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_worker_count() -> usize {
    4
}

fn default_idle_wait_ms() -> u64 {
    1000
}

fn default_max_active_jobs() -> u64 {
    100
}

fn default_monthly_executions() -> u64 {
    1000
}

fn default_limit_cache_ttl_seconds() -> i64 {
    300
}

fn default_janitor_interval_seconds() -> u64 {
    3600
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            idle_wait_ms: default_idle_wait_ms(),
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: default_max_active_jobs(),
            default_monthly_executions: default_monthly_executions(),
            limit_cache_ttl_seconds: default_limit_cache_ttl_seconds(),
        }
    }
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_janitor_interval_seconds(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
