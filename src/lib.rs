//! Storage abstraction layer for the Atelier interface builder.
//!
//! One contract ([`db::DbAdapter`]) over three backends: the embedded SQLite
//! engine (host process), a bridge proxy for processes without direct engine
//! access, and a REST-backed cloud service. The [`db::AdapterFactory`] picks
//! between them from environment signals and an optional user preference.

pub mod config;
pub mod db;
pub mod env;
pub mod error;
pub mod prefs;

pub use config::Config;
pub use db::{
    AdapterFactory, BackendKind, DbAdapter, EngineAccess, Fidelity, Migration, MigrationMode,
    MigrationRegistry, MigrationReport, Outcome, Row, SelectOptions,
};
pub use env::{Environment, EnvironmentDetector, EnvironmentInfo};
pub use error::{IsRetryable, StorageError};
pub use prefs::PreferenceStore;
