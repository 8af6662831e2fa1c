// src/state/backend.rs
use serde::{Deserialize, Serialize};

/// Identity of an upstream: a (host, port) pair. Structural equality,
/// immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Backend {
    pub host: String,
    pub port: u16,
}

impl Backend {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("http://{}:{}{}", self.host, self.port, path)
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Tri-state health as seen by the last probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Unknown,
    Healthy,
    Unhealthy,
}

/// A backend's last-observed health and version. `version` is defined
/// only when `health == Healthy`; every unhealthy or unknown transition
/// clears it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendState {
    pub health: Health,
    pub version: Option<String>,
    pub last_checked: Option<chrono::DateTime<chrono::Utc>>,
}

impl BackendState {
    pub fn unknown() -> Self {
        Self {
            health: Health::Unknown,
            version: None,
            last_checked: None,
        }
    }

    pub fn healthy(version: String) -> Self {
        Self {
            health: Health::Healthy,
            version: Some(version),
            last_checked: Some(chrono::Utc::now()),
        }
    }

    pub fn unhealthy() -> Self {
        Self {
            health: Health::Unhealthy,
            version: None,
            last_checked: Some(chrono::Utc::now()),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health == Health::Healthy
    }
}
