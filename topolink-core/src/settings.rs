//! Client settings.
//!
//! Settings are layered: compiled defaults, then the TOML settings file,
//! then environment overrides for the values a launcher usually wants to
//! force (`TOPOLINK_SERVER_URL`, `TOPOLINK_AUTO_START`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ControllerError, Result};

/// Directory under the platform config dir.
pub const SETTINGS_DIR_NAME: &str = "topolink";
/// Settings file name.
pub const SETTINGS_FILE_NAME: &str = "settings.toml";
/// Overrides the server URL.
pub const ENV_SERVER_URL: &str = "TOPOLINK_SERVER_URL";
/// Overrides `server.auto_start` (`true`/`false`, `1`/`0`).
pub const ENV_AUTO_START: &str = "TOPOLINK_AUTO_START";

/// Everything the client reads from its settings file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    /// Server location.
    pub server: ServerSettings,
    /// Handshake and request behaviour.
    pub controller: ControllerSettings,
    /// Asset cache.
    pub cache: CacheSettings,
    /// Cloud provider account.
    pub cloud: CloudSettings,
}

/// Where the simulation server lives and whether we launch it ourselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// `http` or `https`.
    pub protocol: String,
    /// Host name or address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// When true the client starts a local server itself; a controller
    /// configured this way is not considered remote.
    pub auto_start: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 3080,
            auto_start: true,
        }
    }
}

impl ServerSettings {
    /// `protocol://host:port`.
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }

    /// Overwrite protocol/host/port from a URL such as
    /// `http://10.0.0.2:3080`. A URL without a port keeps the current one.
    pub fn apply_url(&mut self, raw: &str) -> Result<()> {
        let with_scheme = if raw.contains("://") {
            raw.to_string()
        } else {
            format!("http://{raw}")
        };
        let url = Url::parse(&with_scheme).map_err(|e| {
            ControllerError::Config(format!("invalid server URL '{raw}': {e}"))
        })?;
        let host = url.host_str().ok_or_else(|| {
            ControllerError::Config(format!("server URL '{raw}' has no host"))
        })?;
        self.protocol = url.scheme().to_string();
        self.host = host.to_string();
        if let Some(port) = url.port() {
            self.port = port;
        }
        Ok(())
    }
}

/// Handshake and request tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Path probed by the version handshake.
    pub handshake_path: String,
    /// Delay between handshake attempts.
    pub retry_delay_ms: u64,
    /// Timeout of ordinary requests.
    pub request_timeout_secs: u64,
    /// Default timeout of synchronous GETs.
    pub synchronous_timeout_secs: u64,
    /// Path prefix added to relative request paths; empty disables it.
    pub api_version: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            handshake_path: "/version".to_string(),
            retry_delay_ms: 1000,
            request_timeout_secs: 30,
            synchronous_timeout_secs: 2,
            api_version: "v2".to_string(),
        }
    }
}

impl ControllerSettings {
    /// [`retry_delay_ms`](Self::retry_delay_ms) as a duration.
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// [`request_timeout_secs`](Self::request_timeout_secs) as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// [`synchronous_timeout_secs`](Self::synchronous_timeout_secs) as a
    /// duration.
    pub fn synchronous_timeout(&self) -> Duration {
        Duration::from_secs(self.synchronous_timeout_secs)
    }
}

/// Asset cache behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Share one download between concurrent misses of the same URL.
    pub dedupe_in_flight: bool,
    /// Persistent cache directory. `None` means a temporary directory that
    /// is removed together with the controller.
    pub directory: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dedupe_in_flight: true,
            directory: None,
        }
    }
}

/// Cloud provider account and instance defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudSettings {
    /// Account user name.
    pub cloud_user_name: String,
    /// Account API key.
    pub cloud_api_key: String,
    /// Region to use; empty picks the first one listed.
    pub cloud_region: String,
    /// Identity service endpoint.
    pub ias_url: String,
    /// Idle time after which a started server shuts itself down.
    pub dead_time_secs: u64,
    /// Cloud jobs allowed to run at once.
    pub worker_threads: usize,
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            cloud_user_name: String::new(),
            cloud_api_key: String::new(),
            cloud_region: String::new(),
            ias_url: String::new(),
            dead_time_secs: 60 * 60,
            worker_threads: 2,
        }
    }
}

impl ClientSettings {
    /// Default location of the settings file, if the platform has a config
    /// directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
    }

    /// Load settings from the default location plus environment overrides.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load_from(&path),
            None => {
                let mut settings = Self::default();
                settings.apply_env()?;
                Ok(settings)
            }
        }
    }

    /// Load settings from `path` (missing file means defaults), then apply
    /// environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut settings = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml(&content).map_err(|e| {
                ControllerError::Config(format!("{}: {e}", path.display()))
            })?
        } else {
            log::debug!(
                "[Settings] No settings file at {}, using defaults",
                path.display()
            );
            Self::default()
        };
        settings.apply_env()?;
        Ok(settings)
    }

    /// Parse settings from TOML text, without environment overrides.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| ControllerError::Config(e.to_string()))
    }

    /// Pretty TOML rendering.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ControllerError::Config(e.to_string()))
    }

    /// Write the settings to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(
            std::env::var(ENV_SERVER_URL).ok().as_deref(),
            std::env::var(ENV_AUTO_START).ok().as_deref(),
        )
    }

    /// Apply override values as they would come from the environment.
    pub fn apply_overrides(
        &mut self,
        server_url: Option<&str>,
        auto_start: Option<&str>,
    ) -> Result<()> {
        if let Some(url) = server_url.filter(|u| !u.trim().is_empty()) {
            self.server.apply_url(url.trim())?;
        }
        if let Some(raw) = auto_start {
            self.server.auto_start = parse_bool(raw).ok_or_else(|| {
                ControllerError::Config(format!(
                    "{ENV_AUTO_START} must be a boolean, got '{raw}'"
                ))
            })?;
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
