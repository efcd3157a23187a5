//! Configuration for loginbridge.
//!
//! Settings are loaded with priority: env var > config.toml > default.
//! `./.env` and `~/.loginbridge/.env` are loaded via dotenvy before any
//! value is resolved.

mod deployment;
mod gateway;
pub(crate) mod helpers;
mod login;
mod sessions;

use std::path::Path;

use crate::error::ConfigError;
use crate::settings::Settings;

pub use self::deployment::DeploymentConfig;
pub use self::gateway::GatewayConfig;
pub use self::login::LoginHelperConfig;
pub use self::sessions::SessionConfig;

/// Main configuration for the service.
#[derive(Debug, Clone)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub sessions: SessionConfig,
    pub login_helper: LoginHelperConfig,
    pub deployment: Option<DeploymentConfig>,
}

/// Log output format selected by `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl LogFormat {
    /// Resolve from the environment. Read before the rest of the config so
    /// that config loading itself is logged in the chosen format.
    pub fn from_env() -> Result<Self, ConfigError> {
        match helpers::optional_env("LOG_FORMAT")?
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            None | Some("pretty") | Some("text") => Ok(Self::Pretty),
            Some("json") => Ok(Self::Json),
            Some(other) => Err(ConfigError::InvalidValue {
                key: "LOG_FORMAT".to_string(),
                message: format!("expected 'pretty' or 'json', got '{other}'"),
            }),
        }
    }
}

impl Config {
    /// Load configuration from env vars with an optional TOML config file.
    ///
    /// If `toml_path` is `Some`, the file must exist. Otherwise the default
    /// `~/.loginbridge/config.toml` is used when present.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        crate::bootstrap::load_env_files();
        let settings = Self::load_settings(toml_path)?;
        Self::build(&settings)
    }

    fn load_settings(explicit_path: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(settings)) => {
                tracing::debug!("Loaded TOML config from {}", path.display());
                Ok(settings)
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                Ok(Settings::default())
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Failed to load config file {}: {}",
                        path.display(),
                        e
                    )));
                }
                tracing::warn!("Failed to load default config file: {}", e);
                Ok(Settings::default())
            }
        }
    }

    /// Build config from settings, applying env overrides.
    pub(crate) fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            gateway: GatewayConfig::resolve(settings)?,
            sessions: SessionConfig::resolve(settings)?,
            login_helper: LoginHelperConfig::resolve(settings)?,
            deployment: DeploymentConfig::resolve(settings)?,
        })
    }

    /// Human-readable summary with secrets masked.
    pub fn summary_lines(&self) -> Vec<String> {
        fn mask(present: bool) -> &'static str {
            if present { "[set]" } else { "[unset]" }
        }

        vec![
            format!("gateway.host = {}", self.gateway.host),
            format!("gateway.port = {}", self.gateway.port),
            format!(
                "gateway.auth_token = {}",
                mask(self.gateway.auth_token.is_some())
            ),
            format!("sessions.max_concurrent = {}", self.sessions.max_concurrent),
            format!("sessions.ttl_secs = {}", self.sessions.ttl.as_secs()),
            format!(
                "sessions.sweep_interval_secs = {}",
                self.sessions.sweep_interval.as_secs()
            ),
            format!(
                "sessions.max_transient_restarts = {}",
                self.sessions.max_transient_restarts
            ),
            format!(
                "login_helper.command = {}",
                self.login_helper.command.as_deref().unwrap_or("[unset]")
            ),
            format!(
                "login_helper.api_id = {}",
                self.login_helper
                    .default_api_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "[unset]".to_string())
            ),
            format!(
                "login_helper.api_hash = {}",
                mask(self.login_helper.default_api_hash.is_some())
            ),
            format!(
                "deployment.api_url = {}",
                self.deployment
                    .as_ref()
                    .map(|d| d.api_url.to_string())
                    .unwrap_or_else(|| "[unset]".to_string())
            ),
            format!(
                "deployment.api_token = {}",
                mask(
                    self.deployment
                        .as_ref()
                        .is_some_and(|d| d.api_token.is_some())
                )
            ),
        ]
    }
}
