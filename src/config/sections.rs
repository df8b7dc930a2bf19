use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Basic (core) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicConfig {
    /// Directory for the database file and the persisted backend preference.
    /// TOML: `basic.data_dir`. Default: `./atelier-data`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level hint for the embedding process (e.g., "error", "warn", "info").
    /// TOML: `basic.loglevel`. Default: `info`. The library itself never
    /// installs a subscriber.
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
}

impl Default for BasicConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            loglevel: default_loglevel(),
        }
    }
}

/// Embedded engine configuration. Only meaningful in the host process.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalConfig {
    /// Database URL for SQLite.
    /// TOML: `local.database_url`. Default: `sqlite://atelier-data/atelier.db`.
    #[serde(default = "default_database_url")]
    pub database_url: String,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
        }
    }
}

/// Remote backend configuration.
///
/// `url` and `api_key` are required before `CloudAdapter::initialize` will
/// succeed; empty values fail fast with a configuration error.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CloudConfig {
    /// Base URL of the remote backend (e.g., `https://project.example.co`).
    /// TOML: `cloud.url`.
    #[serde(default)]
    pub url: String,

    /// API key sent as both `apikey` and bearer token.
    /// TOML: `cloud.api_key`.
    #[serde(default)]
    pub api_key: String,

    /// Per-request timeout in seconds.
    /// TOML: `cloud.request_timeout_secs`. Default: `30`.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Connectivity probe configuration used by environment detection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// URL probed to decide internet reachability.
    /// TOML: `probe.url`. Default: `https://clients3.google.com/generate_204`.
    #[serde(default = "default_probe_url")]
    pub url: String,

    /// Probe timeout in milliseconds. The probe never blocks longer.
    /// TOML: `probe.timeout_ms`. Default: `3000`.
    #[serde(default = "default_probe_timeout_ms")]
    pub timeout_ms: u64,

    /// Treat the machine as offline without probing. The cheap local signal
    /// checked before any network traffic.
    /// TOML: `probe.assume_offline`. Default: `false`.
    #[serde(default)]
    pub assume_offline: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            url: default_probe_url(),
            timeout_ms: default_probe_timeout_ms(),
            assume_offline: false,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("atelier-data")
}

fn default_loglevel() -> String {
    "info".to_string()
}

fn default_database_url() -> String {
    "sqlite://atelier-data/atelier.db".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_probe_url() -> String {
    "https://clients3.google.com/generate_204".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    3000
}
