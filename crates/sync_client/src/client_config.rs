use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

use crate::coordinator::SyncOptions;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClientConfig {
    /// Base URL of the sync API, e.g. http://localhost:8000
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Path of the local mutation store file
    #[serde(default = "default_store_path")]
    pub store_path: String,

    /// Permanent failures allowed before a record stops being dispatched
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Reload the read cache from the server after each successful drain
    #[serde(default = "default_refresh_mirror")]
    pub refresh_mirror: bool,

    /// Hours an unreferenced local→server id mapping is kept after reconciling
    #[serde(default = "default_reconciled_retention_hours")]
    pub reconciled_retention_hours: u32,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_server_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_store_path() -> String {
    "fieldsync/queue.redb".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_refresh_mirror() -> bool {
    true
}

fn default_reconciled_retention_hours() -> u32 {
    24 * 7
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("FIELDSYNC_CLIENT"))
            .build()?
            .try_deserialize()
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            max_attempts: self.max_attempts,
            refresh_mirror: self.refresh_mirror,
            reconciled_retention: chrono::Duration::hours(i64::from(
                self.reconciled_retention_hours,
            )),
        }
    }
}
