//! Versioned schema migrations and the selection logic shared by all
//! backends.
//!
//! Version strings must sort lexicographically into application order
//! (zero-padded date-time prefixes). The catalogue is append-only; editing a
//! shipped migration's SQL after it has been applied anywhere is a
//! correctness violation this layer trusts callers not to commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// One versioned, named unit of schema change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Migration {
    pub version: String,
    pub name: String,
    pub sql: String,
}

/// Tracking-table row persisted by the embedded engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedMigration {
    pub version: String,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// How `run_migrations` discharged its obligation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationMode {
    /// DDL executed directly, tracking rows written (embedded engine).
    Direct,
    /// Each pending migration handed to the server's `apply_migration`
    /// routine (cloud backend).
    Delegated,
    /// Nothing done: migrations are the host process's responsibility
    /// (bridge proxy).
    HostManaged,
}

#[derive(Debug)]
pub struct MigrationReport {
    /// Versions applied (or delegated) during this run, in order.
    pub applied: Vec<String>,
    pub mode: MigrationMode,
}

/// Ordered, append-only migration catalogue.
#[derive(Debug, Clone)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Builds a registry, rejecting catalogues that are not strictly
    /// ascending by version.
    pub fn new(migrations: Vec<Migration>) -> Result<Self, StorageError> {
        for pair in migrations.windows(2) {
            if pair[0].version >= pair[1].version {
                return Err(StorageError::Configuration(format!(
                    "migration catalogue out of order: {:?} must sort before {:?}",
                    pair[0].version, pair[1].version
                )));
            }
        }
        if let Some(m) = migrations.iter().find(|m| m.version.is_empty()) {
            return Err(StorageError::Configuration(format!(
                "migration {:?} has an empty version",
                m.name
            )));
        }
        Ok(Self { migrations })
    }

    pub fn all(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// The suffix of the catalogue strictly newer than `current`, in
    /// catalogue order. `None` selects everything.
    pub fn pending_since(&self, current: Option<&str>) -> &[Migration] {
        match current {
            None => &self.migrations,
            Some(version) => {
                let start = self
                    .migrations
                    .partition_point(|m| m.version.as_str() <= version);
                &self.migrations[start..]
            }
        }
    }
}
