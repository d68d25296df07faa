//! TOML configuration for the engine and client.
//!
//! ```toml
//! [api]
//! base_url = "https://pricing.internal"
//! auth_token = "..."
//!
//! [broker]
//! broker_id = "b-17"
//!
//! [dispatch]
//! max_retries = 2
//! initial_delay_ms = 500
//! max_delay_ms = 8000
//! actor_poll_interval_ms = 150
//! actor_poll_ceiling_ms = 5000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, fmt};

use serde::Deserialize;

use ratesheet_client::retry::RetryConfig;
use ratesheet_client::ApiConfig;
use ratesheet_types::BrokerId;

use crate::EngineSettings;
use crate::actor::{ACTOR_POLL_CEILING, ACTOR_POLL_INTERVAL};

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Default, Deserialize)]
pub struct RatesheetConfig {
    pub api: Option<ApiSection>,
    pub broker: Option<BrokerSection>,
    pub dispatch: Option<DispatchSection>,
}

#[derive(Default, Deserialize)]
pub struct ApiSection {
    pub base_url: Option<String>,
    pub auth_token: Option<String>,
}

// Manual Debug impl to prevent leaking the auth token in logs.
impl fmt::Debug for ApiSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSection")
            .field("base_url", &self.base_url)
            .field(
                "auth_token",
                &if self.auth_token.is_some() {
                    "[REDACTED]"
                } else {
                    "None"
                },
            )
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BrokerSection {
    pub broker_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DispatchSection {
    pub max_retries: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub actor_poll_interval_ms: Option<u64>,
    pub actor_poll_ceiling_ms: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl RatesheetConfig {
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn api_config(&self) -> ApiConfig {
        let api = self.api.as_ref();
        let base_url = api
            .and_then(|section| section.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let auth_token = api.and_then(|section| section.auth_token.clone());
        ApiConfig::new(base_url, auth_token)
    }

    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        let defaults = RetryConfig::default();
        let Some(dispatch) = self.dispatch.as_ref() else {
            return defaults;
        };
        RetryConfig {
            max_retries: dispatch.max_retries.unwrap_or(defaults.max_retries),
            initial_delay: dispatch
                .initial_delay_ms
                .map_or(defaults.initial_delay, Duration::from_millis),
            max_delay: dispatch
                .max_delay_ms
                .map_or(defaults.max_delay, Duration::from_millis),
            jitter_factor: defaults.jitter_factor,
        }
    }

    #[must_use]
    pub fn engine_settings(&self) -> EngineSettings {
        let dispatch = self.dispatch.as_ref();
        EngineSettings {
            broker_id: self
                .broker
                .as_ref()
                .and_then(|section| section.broker_id.clone())
                .map(BrokerId::new),
            actor_poll_interval: dispatch
                .and_then(|section| section.actor_poll_interval_ms)
                .map_or(ACTOR_POLL_INTERVAL, Duration::from_millis),
            actor_poll_ceiling: dispatch
                .and_then(|section| section.actor_poll_ceiling_ms)
                .map_or(ACTOR_POLL_CEILING, Duration::from_millis),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let config: RatesheetConfig = toml::from_str(
            r#"
            [api]
            base_url = "https://pricing.internal/"
            auth_token = "sekrit"

            [broker]
            broker_id = "b-17"

            [dispatch]
            max_retries = 4
            initial_delay_ms = 250
            actor_poll_ceiling_ms = 2000
            "#,
        )
        .expect("valid config");

        assert_eq!(config.retry_config().max_retries, 4);
        assert_eq!(
            config.retry_config().initial_delay,
            Duration::from_millis(250)
        );
        let settings = config.engine_settings();
        assert_eq!(settings.broker_id, Some(BrokerId::new("b-17")));
        assert_eq!(settings.actor_poll_ceiling, Duration::from_millis(2000));
        assert_eq!(settings.actor_poll_interval, ACTOR_POLL_INTERVAL);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: RatesheetConfig = toml::from_str("").expect("empty config is valid");
        assert_eq!(config.retry_config().max_retries, 2);
        assert!(config.engine_settings().broker_id.is_none());
    }

    #[test]
    fn debug_masks_auth_token() {
        let config: RatesheetConfig =
            toml::from_str("[api]\nauth_token = \"sekrit\"").expect("valid config");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sekrit"));
        assert!(rendered.contains("REDACTED"));
    }

    #[test]
    fn read_and_parse_errors_carry_the_path() {
        let missing = Path::new("/nonexistent/ratesheet.toml");
        let err = RatesheetConfig::load_from_path(missing).expect_err("missing file");
        assert_eq!(err.path(), &missing.to_path_buf());
        assert!(matches!(err, ConfigError::Read { .. }));

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("ratesheet.toml");
        fs::write(&path, "not = [valid").expect("write fixture");
        let err = RatesheetConfig::load_from_path(&path).expect_err("invalid toml");
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert_eq!(err.path(), &path);
    }
}
