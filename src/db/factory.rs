//! Backend selection and adapter lifecycle.
//!
//! The factory is constructor-injected state, not a module singleton: tests
//! build a fresh factory per case, and the embedding process decides at
//! startup whether it has direct engine access or a bridge.

use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{CloudConfig, Config, LocalConfig};
use crate::db::adapter::{BackendKind, DbAdapter};
use crate::db::bridge::BridgeTransport;
use crate::db::cloud::CloudAdapter;
use crate::db::local::SqliteAdapter;
use crate::db::proxy::BridgeAdapter;
use crate::env::{Environment, EnvironmentDetector, EnvironmentInfo};
use crate::error::StorageError;
use crate::prefs::PreferenceStore;

/// How this process reaches the embedded engine, fixed at startup.
pub enum EngineAccess {
    /// This process owns the database file (desktop host).
    Direct(LocalConfig),
    /// Some other process owns it; calls go over the bridge.
    Bridged(Arc<dyn BridgeTransport>),
    /// No engine in reach (browser-sandboxed process).
    None,
}

pub struct AdapterFactory {
    detector: EnvironmentDetector,
    prefs: PreferenceStore,
    engine: EngineAccess,
    cloud: CloudConfig,
    current: tokio::sync::Mutex<Option<Arc<dyn DbAdapter>>>,
}

impl AdapterFactory {
    pub fn new(config: &Config, engine: EngineAccess) -> Self {
        // A process with any engine access is inside the desktop shell;
        // detection only needs the probe for the connectivity half.
        let is_desktop = !matches!(engine, EngineAccess::None);
        Self {
            detector: EnvironmentDetector::with_desktop_override(
                config.probe.clone(),
                Some(is_desktop),
            ),
            prefs: PreferenceStore::new(&config.basic.data_dir),
            engine,
            cloud: config.cloud.clone(),
            current: tokio::sync::Mutex::new(None),
        }
    }

    pub fn preferences(&self) -> &PreferenceStore {
        &self.prefs
    }

    /// The pure decision table. The preference only matters in the one
    /// ambiguous case; `web` and `desktop-closed` each have exactly one
    /// backend that can work.
    pub fn decide(env: &EnvironmentInfo, preference: Option<BackendKind>) -> BackendKind {
        match env.environment {
            Environment::Web => BackendKind::Cloud,
            Environment::DesktopClosed => BackendKind::Local,
            Environment::DesktopInternet => preference.unwrap_or(env.preferred_backend),
        }
    }

    pub async fn determine_backend(&self) -> BackendKind {
        let env = self.detector.detect().await;
        let preference = if env.environment == Environment::DesktopInternet {
            self.prefs.get().await
        } else {
            None
        };
        let backend = Self::decide(&env, preference);
        info!(environment = ?env.environment, ?preference, %backend, "backend decided");
        backend
    }

    /// The memoized process-wide adapter. First call resolves the backend,
    /// constructs the matching adapter, initializes it, and caches it.
    pub async fn adapter(&self) -> Result<Arc<dyn DbAdapter>, StorageError> {
        let mut slot = self.current.lock().await;
        if let Some(adapter) = slot.as_ref() {
            return Ok(adapter.clone());
        }

        let backend = self.determine_backend().await;
        let adapter = self.construct(backend)?;
        adapter.initialize().await?;
        *slot = Some(adapter.clone());
        Ok(adapter)
    }

    /// Replaces the active adapter. In-flight operations on the old adapter
    /// are not guaranteed to complete; callers drain before switching.
    pub async fn switch(&self, backend: BackendKind) -> Result<Arc<dyn DbAdapter>, StorageError> {
        let mut slot = self.current.lock().await;

        if let Some(old) = slot.take() {
            if let Err(error) = old.close().await {
                warn!(%error, "closing previous adapter failed");
            }
        }

        let adapter = self.construct(backend)?;
        adapter.initialize().await?;
        info!(%backend, "adapter switched");
        *slot = Some(adapter.clone());
        Ok(adapter)
    }

    fn construct(&self, backend: BackendKind) -> Result<Arc<dyn DbAdapter>, StorageError> {
        match backend {
            BackendKind::Cloud => Ok(Arc::new(CloudAdapter::new(self.cloud.clone()))),
            BackendKind::Local => match &self.engine {
                EngineAccess::Direct(local) => Ok(Arc::new(SqliteAdapter::new(local))),
                EngineAccess::Bridged(transport) => {
                    Ok(Arc::new(BridgeAdapter::new(transport.clone())))
                }
                EngineAccess::None => Err(StorageError::Configuration(
                    "local backend selected but this process has no engine access".to_string(),
                )),
            },
        }
    }
}
