//! Runtime environment detection.
//!
//! Classifies the current process (browser-sandboxed vs. desktop shell, with
//! or without internet) so the factory can pick a backend. Detection is not
//! cached here: connectivity changes, and callers that need a stable answer
//! must hold on to the `EnvironmentInfo` themselves.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::ProbeConfig;
use crate::db::adapter::BackendKind;

/// Environment marker set by the desktop shell for its processes.
const DESKTOP_HOST_ENV: &str = "ATELIER_DESKTOP_HOST";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Environment {
    /// Browser-sandboxed process; the embedded engine cannot exist here.
    Web,
    /// Desktop shell without internet access.
    DesktopClosed,
    /// Desktop shell with internet access; the one case a user preference
    /// can override.
    DesktopInternet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvironmentInfo {
    pub environment: Environment,
    pub is_desktop_host: bool,
    pub has_internet: bool,
    pub preferred_backend: BackendKind,
}

pub struct EnvironmentDetector {
    probe: ProbeConfig,
    desktop_override: Option<bool>,
    http: reqwest::Client,
}

impl EnvironmentDetector {
    pub fn new(probe: ProbeConfig) -> Self {
        Self::with_desktop_override(probe, None)
    }

    /// The embedding process usually knows what it is; passing `Some` skips
    /// the environment-marker lookup entirely.
    pub fn with_desktop_override(probe: ProbeConfig, desktop_override: Option<bool>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(probe.timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            probe,
            desktop_override,
            http,
        }
    }

    pub fn is_desktop_host(&self) -> bool {
        self.desktop_override.unwrap_or_else(|| {
            std::env::var(DESKTOP_HOST_ENV).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        })
    }

    /// Best-effort reachability check. Connectivity failure is data, not an
    /// error: every failure mode (timeout, DNS, refusal) is simply `false`,
    /// and nothing here blocks past the probe timeout.
    pub async fn has_internet_access(&self) -> bool {
        if self.probe.assume_offline {
            return false;
        }
        let Ok(url) = url::Url::parse(&self.probe.url) else {
            return false;
        };
        // Any HTTP answer proves reachability; the status does not matter.
        let reachable = self.http.head(url).send().await.is_ok();
        debug!(url = %self.probe.url, reachable, "connectivity probe");
        reachable
    }

    pub async fn detect(&self) -> EnvironmentInfo {
        let is_desktop_host = self.is_desktop_host();
        let has_internet = self.has_internet_access().await;

        let environment = match (is_desktop_host, has_internet) {
            (false, _) => Environment::Web,
            (true, false) => Environment::DesktopClosed,
            (true, true) => Environment::DesktopInternet,
        };

        // Web always prefers cloud: the embedded engine is unavailable in a
        // sandboxed process by construction, whatever the connectivity says.
        let preferred_backend = match environment {
            Environment::Web => BackendKind::Cloud,
            Environment::DesktopClosed | Environment::DesktopInternet => BackendKind::Local,
        };

        EnvironmentInfo {
            environment,
            is_desktop_host,
            has_internet,
            preferred_backend,
        }
    }
}
