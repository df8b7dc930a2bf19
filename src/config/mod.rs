//! Crate configuration managed by Figment.
//!
//! Layout mirrors `config.toml`:
//! - `[basic]`: data directory and log level
//! - `[local]`: embedded engine settings
//! - `[cloud]`: remote backend settings
//! - `[probe]`: connectivity probe settings

mod sections;

pub use sections::{BasicConfig, CloudConfig, LocalConfig, ProbeConfig};

use figment::{
    Figment,
    providers::{Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Core settings (see `basic` table in config.toml).
    #[serde(default)]
    pub basic: BasicConfig,

    /// Embedded engine settings (see `local` table in config.toml).
    #[serde(default)]
    pub local: LocalConfig,

    /// Remote backend settings (see `cloud` table in config.toml).
    #[serde(default)]
    pub cloud: CloudConfig,

    /// Connectivity probe settings (see `probe` table in config.toml).
    #[serde(default)]
    pub probe: ProbeConfig,
}

const DEFAULT_CONFIG_FILE: &str = "config.toml";

impl Config {
    /// Builds a Figment that merges defaults and a config TOML file.
    pub fn figment() -> Figment {
        let figment = Figment::new().merge(Serialized::defaults(Config::default()));
        if PathBuf::from(DEFAULT_CONFIG_FILE).is_file() {
            figment.merge(Toml::file(DEFAULT_CONFIG_FILE))
        } else {
            figment
        }
    }

    /// Loads configuration by merging defaults and `config.toml` if present.
    ///
    /// Cloud credentials are not validated here; `CloudAdapter::initialize`
    /// fails fast when they are required but missing.
    pub fn from_optional_toml() -> Self {
        Self::figment().extract().unwrap_or_else(|err| {
            panic!("failed to extract configuration (defaults + optional config.toml): {err}")
        })
    }
}
