use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Default location of the configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/taxtrack.toml";

// ── Remote service ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Web-app URL of the spreadsheet service.  Empty (the default) keeps the
    /// tracker in local-only mode.  `TAXTRACK_REMOTE_URL` takes precedence.
    pub base_url: String,
    pub timeout_secs: u64,
    /// Page key → sheet name.  Pages without an entry use the page key as
    /// the sheet name.
    pub sheet_names: BTreeMap<String, String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            timeout_secs: 10,
            sheet_names: BTreeMap::new(),
        }
    }
}

impl RemoteConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }
}

// ── Local store ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON file per store key.
    pub data_dir: String,
    /// Namespace prepended to every key (pages, session, audit log).
    pub key_prefix: String,
    /// JSON document with the default personnel of every page.
    pub seed_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: ".taxtrack/data".to_string(),
            key_prefix: "vat_tax_".to_string(),
            seed_path: "data/seed.json".to_string(),
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions older than this are discarded on the next restore.
    pub max_age_hours: u64,
    /// PIN required for administrator login.  `TAXTRACK_ADMIN_PIN` takes
    /// precedence.
    pub admin_pin: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            admin_pin: "1919".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Seconds between remote pulls (or reconnect attempts while offline).
    pub poll_interval_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Most recent entries kept in the persisted audit log.
    pub max_entries: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self { max_entries: 1000 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteConfig,
    pub store: StoreConfig,
    pub session: SessionConfig,
    pub sync: SyncConfig,
    pub audit: AuditConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(url) = env::var("TAXTRACK_REMOTE_URL") {
            if !url.is_empty() {
                config.remote.base_url = url;
            }
        }

        if let Ok(pin) = env::var("TAXTRACK_ADMIN_PIN") {
            if !pin.is_empty() {
                config.session.admin_pin = pin;
            }
        }

        if let Ok(dir) = env::var("TAXTRACK_DATA_DIR") {
            if !dir.is_empty() {
                config.store.data_dir = dir;
            }
        }

        Ok(config)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
