//! Configuration for ember clients.
//!
//! TOML file plus `EMBER_*` environment overrides, translated into the
//! runtime [`SyncConfig`] that ember-core consumes. The session token is
//! usually supplied via `EMBER_TOKEN` rather than written to disk.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use ember_core::{Credentials, SyncConfig};

// ── Error ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no session token configured (set EMBER_TOKEN or `token` in the config file)")]
    NoToken,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config ──────────────────────────────────────────────────────

/// On-disk configuration, merged with `EMBER_*` env overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Sync service endpoint.
    #[serde(default = "default_service_url")]
    pub service_url: String,

    /// Session token. Prefer `EMBER_TOKEN` over persisting this.
    #[serde(default)]
    pub token: Option<String>,

    /// Fallback poll cadence in seconds.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

fn default_service_url() -> String {
    "wss://sync.ember.app/v1".into()
}

fn default_poll_interval_secs() -> u64 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            token: None,
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Default config file location (`~/.config/ember/config.toml` on
/// Linux).
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("app", "ember", "ember").map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load from the default location, applying env overrides. A missing
/// file yields the defaults.
pub fn load() -> Result<Config, ConfigError> {
    let figment = match default_config_path() {
        Some(path) => base_figment().merge(Toml::file(path)),
        None => base_figment(),
    };
    Ok(figment.merge(Env::prefixed("EMBER_")).extract()?)
}

/// Load from an explicit file, applying env overrides.
pub fn load_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(base_figment()
        .merge(Toml::file(path))
        .merge(Env::prefixed("EMBER_"))
        .extract()?)
}

fn base_figment() -> Figment {
    Figment::from(Serialized::defaults(Config::default()))
}

impl Config {
    /// Write to disk as TOML. The token is persisted only if set here.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Validate and translate into the runtime config ember-core takes.
    pub fn into_sync_config(self) -> Result<SyncConfig, ConfigError> {
        let url = self
            .service_url
            .parse()
            .map_err(|e| ConfigError::Validation {
                field: "service_url".into(),
                reason: format!("{e}"),
            })?;
        let token = self.token.ok_or(ConfigError::NoToken)?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "poll_interval_secs".into(),
                reason: "must be at least 1".into(),
            });
        }

        Ok(SyncConfig::new(Credentials {
            url,
            token: SecretString::from(token),
        })
        .with_poll_interval(Duration::from_secs(self.poll_interval_secs)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = Config::default();
        assert_eq!(config.service_url, "wss://sync.ember.app/v1");
        assert_eq!(config.poll_interval_secs, 30);
        assert!(config.token.is_none());
    }

    #[test]
    fn toml_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.token = Some("tok_123".into());
        config.poll_interval_secs = 10;
        config.save_to(&path).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.token.as_deref(), Some("tok_123"));
        assert_eq!(loaded.poll_interval_secs, 10);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(loaded.service_url, default_service_url());
    }

    #[test]
    fn sync_config_requires_a_token() {
        let err = Config::default().into_sync_config().unwrap_err();
        assert!(matches!(err, ConfigError::NoToken));
    }

    #[test]
    fn sync_config_rejects_bad_values() {
        let config = Config {
            service_url: "not a url".into(),
            token: Some("tok".into()),
            ..Config::default()
        };
        assert!(matches!(
            config.into_sync_config(),
            Err(ConfigError::Validation { .. })
        ));

        let config = Config {
            token: Some("tok".into()),
            poll_interval_secs: 0,
            ..Config::default()
        };
        assert!(matches!(
            config.into_sync_config(),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn valid_config_translates() {
        let config = Config {
            token: Some("tok".into()),
            poll_interval_secs: 5,
            ..Config::default()
        };
        let sync = config.into_sync_config().unwrap();
        assert_eq!(sync.poll_interval, Duration::from_secs(5));
        assert_eq!(sync.credentials.url.scheme(), "wss");
    }
}
