use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;
use thiserror::Error;

use crate::classify::Thresholds;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{name} must be within (0, 10], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
    #[error("love_threshold ({love}) must be greater than hate_threshold ({hate})")]
    InvertedThresholds { love: f64, hate: f64 },
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
    #[error("{service} is enabled but these settings are missing: {}", .fields.join(", "))]
    MissingCredentials {
        service: &'static str,
        fields: Vec<&'static str>,
    },
    #[error("No destination service is configured (add a [lastfm] or [listenbrainz] section)")]
    NoDestinations,
}

/// Application configuration loaded from TOML config file.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Rating at or above which a track is loved (0-10 scale).
    pub love_threshold: f64,
    /// Rating at or below which a rated track is hated. Unset disables hates.
    pub hate_threshold: Option<f64>,
    /// Custom ledger database path (overrides XDG default).
    pub db_path: Option<PathBuf>,
    /// Timeout applied to every HTTP request, in seconds.
    pub request_timeout_secs: u64,
    pub plex: PlexConfig,
    pub lastfm: Option<LastFmConfig>,
    pub listenbrainz: Option<ListenBrainzConfig>,
    pub musicbrainz: MusicBrainzConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            love_threshold: 10.0,
            hate_threshold: None,
            db_path: None,
            request_timeout_secs: 30,
            plex: PlexConfig::default(),
            lastfm: None,
            listenbrainz: None,
            musicbrainz: MusicBrainzConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlexConfig {
    /// Base server URL, e.g. `http://192.168.1.10:32400`.
    pub url: Option<String>,
    pub token: Option<String>,
    /// Name of the music library section.
    pub library: String,
}

impl Default for PlexConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            library: "Music".to_string(),
        }
    }
}

impl PlexConfig {
    /// Server URL and token, both required.
    pub fn connection(&self) -> Result<(&str, &str), ConfigError> {
        Ok((require(&self.url, "plex.url")?, require(&self.token, "plex.token")?))
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LastFmConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for LastFmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            api_secret: None,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ListenBrainzConfig {
    pub enabled: bool,
    pub token: Option<String>,
    /// Set to false to keep hates out of ListenBrainz even when a hate threshold is set.
    pub relay_hates: bool,
}

impl Default for ListenBrainzConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: None,
            relay_hates: true,
        }
    }
}

/// MusicBrainz lookup settings (recording ids for ListenBrainz).
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MusicBrainzConfig {
    /// Delay between API requests in milliseconds. MusicBrainz allows one per second.
    pub rate_limit_ms: u64,
    /// MusicBrainz asks for an application name plus a contact URL or address.
    pub user_agent: String,
}

impl Default for MusicBrainzConfig {
    fn default() -> Self {
        Self {
            rate_limit_ms: 1000,
            user_agent: crate::http::USER_AGENT.to_string(),
        }
    }
}

/// Immutable settings handed to the reconciliation engine.
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub thresholds: Thresholds,
    pub library: String,
}

impl AppConfig {
    /// Load config from `path`, or from `~/.config/ratingrelay/config.toml`
    /// when no path is given. A missing default file yields the defaults; an
    /// explicit path must exist.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match Self::config_path() {
                Some(p) if p.exists() => p,
                _ => {
                    log::debug!("No config file found, using defaults");
                    return Ok(Self::default());
                }
            },
        };

        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Validate thresholds and derive the engine settings. Runs before any I/O.
    pub fn relay_settings(&self) -> Result<RelaySettings, ConfigError> {
        Ok(RelaySettings {
            thresholds: Thresholds::new(self.love_threshold, self.hate_threshold)?,
            library: self.plex.library.clone(),
        })
    }

    /// Full pre-run validation: thresholds, source and enabled destinations.
    pub fn validate(&self) -> Result<RelaySettings, ConfigError> {
        let settings = self.relay_settings()?;
        self.plex.connection()?;

        let mut destinations = 0;
        if let Some(lfm) = self.lastfm.as_ref().filter(|c| c.enabled) {
            lfm.credentials()?;
            destinations += 1;
        }
        if let Some(lbz) = self.listenbrainz.as_ref().filter(|c| c.enabled) {
            lbz.credentials()?;
            destinations += 1;
        }
        if destinations == 0 {
            return Err(ConfigError::NoDestinations);
        }
        Ok(settings)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Get the config file path.
    fn config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", crate::APP_NAME)
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }
}

/// Last.fm credentials, all four required.
pub struct LastFmCredentials<'a> {
    pub api_key: &'a str,
    pub api_secret: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

impl LastFmConfig {
    pub fn credentials(&self) -> Result<LastFmCredentials<'_>, ConfigError> {
        let fields = [
            ("api_key", self.api_key.as_deref()),
            ("api_secret", self.api_secret.as_deref()),
            ("username", self.username.as_deref()),
            ("password", self.password.as_deref()),
        ];
        let missing: Vec<&'static str> = fields
            .iter()
            .filter(|(_, v)| v.is_none_or(|s| s.trim().is_empty()))
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingCredentials {
                service: "Last.fm",
                fields: missing,
            });
        }
        Ok(LastFmCredentials {
            api_key: fields[0].1.unwrap_or_default(),
            api_secret: fields[1].1.unwrap_or_default(),
            username: fields[2].1.unwrap_or_default(),
            password: fields[3].1.unwrap_or_default(),
        })
    }
}

impl ListenBrainzConfig {
    pub fn credentials(&self) -> Result<&str, ConfigError> {
        match self.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ConfigError::MissingCredentials {
                service: "ListenBrainz",
                fields: vec!["token"],
            }),
        }
    }
}

fn require<'a>(value: &'a Option<String>, name: &'static str) -> Result<&'a str, ConfigError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(ConfigError::Missing(name)),
    }
}

/// Resolve the default database path using XDG data directory.
pub fn default_db_path() -> PathBuf {
    if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
        let data_dir = dirs.data_dir();
        std::fs::create_dir_all(data_dir).ok();
        data_dir.join("ratingrelay.db")
    } else {
        // Fallback: current directory
        PathBuf::from("ratingrelay.db")
    }
}
