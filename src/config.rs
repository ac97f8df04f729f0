use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable holding the qBittorrent Web UI base URL.
pub const ENV_TORRENT_URL: &str = "QBITTORRENT_URL";
/// Environment variable holding the Jellyfin base URL.
pub const ENV_MEDIA_URL: &str = "JELLYFIN_URL";
/// Environment variable holding the Jellyfin API key.
pub const ENV_MEDIA_API_KEY: &str = "JELLYFIN_API_KEY";

/// Top-level configuration loaded from quietseed.toml.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DaemonConfig {
    pub torrent: TorrentConfig,
    pub media: MediaConfig,
    pub monitor: MonitorConfig,
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TorrentConfig {
    pub url: Option<String>,
    pub timeout_secs: u64,
    /// Log pause/resume requests instead of sending them.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Minimum concurrent sessions that keep torrents paused.
    pub threshold: u32,
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServeConfig {
    pub bind: String,
    pub port: u16,
}

// --- Default implementations ---

impl Default for TorrentConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 10,
            dry_run: false,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            url: None,
            api_key: None,
            timeout_secs: 10,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            threshold: 2,
            poll_interval_secs: 2,
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 4001,
        }
    }
}

/// Errors raised while assembling the daemon configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// A required value was not provided by the file or the environment.
    Missing(&'static str),
    /// A value was provided but is out of range.
    Invalid { field: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Missing(name) => write!(f, "missing required setting {name}"),
            ConfigError::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Missing(_) | ConfigError::Invalid { .. } => None,
        }
    }
}

/// Endpoints and credentials the daemon cannot run without.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub torrent_url: String,
    pub media_url: String,
    pub media_api_key: String,
}

impl DaemonConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };

        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Overlay non-empty environment values on top of the file settings.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_TORRENT_URL) {
            self.torrent.url = Some(url);
        }
        if let Some(url) = get(ENV_MEDIA_URL) {
            self.media.url = Some(url);
        }
        if let Some(key) = get(ENV_MEDIA_API_KEY) {
            self.media.api_key = Some(key);
        }
    }

    /// Check ranges and return the required endpoints.
    pub fn validate(&self) -> Result<Endpoints, ConfigError> {
        if self.monitor.threshold < 1 {
            return Err(ConfigError::Invalid {
                field: "monitor.threshold",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.monitor.poll_interval_secs < 1 {
            return Err(ConfigError::Invalid {
                field: "monitor.poll_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        let torrent_url = required(&self.torrent.url, ENV_TORRENT_URL)?;
        let media_url = required(&self.media.url, ENV_MEDIA_URL)?;
        let media_api_key = required(&self.media.api_key, ENV_MEDIA_API_KEY)?;

        Ok(Endpoints {
            torrent_url: torrent_url.trim_end_matches('/').to_string(),
            media_url: media_url.trim_end_matches('/').to_string(),
            media_api_key: media_api_key.to_string(),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.poll_interval_secs)
    }
}

fn required<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}
