//! Persisted backend preference.
//!
//! One value under one well-known file in the data directory. Only
//! meaningful when the environment is desktop-with-internet; the factory
//! ignores it everywhere else.

use std::path::{Path, PathBuf};

use crate::db::adapter::BackendKind;
use crate::error::StorageError;

const PREFERENCE_FILE: &str = "atelier-db-preference";

pub struct PreferenceStore {
    path: PathBuf,
}

impl PreferenceStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(PREFERENCE_FILE),
        }
    }

    /// Reads the stored preference. Anything other than the two known values
    /// (including a missing or unreadable file) is treated as absent.
    pub async fn get(&self) -> Option<BackendKind> {
        let content = tokio::fs::read_to_string(&self.path).await.ok()?;
        match content.trim() {
            "local" => Some(BackendKind::Local),
            "cloud" => Some(BackendKind::Cloud),
            _ => None,
        }
    }

    pub async fn set(&self, backend: BackendKind) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, backend.to_string()).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), StorageError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
