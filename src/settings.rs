//! Settings file persistence.
//!
//! Stores operator settings in `~/.loginbridge/config.toml`. Settings are
//! resolved with env var > config.toml > default priority (see
//! [`crate::config`]).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Operator settings persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub gateway: GatewaySettings,

    #[serde(default)]
    pub sessions: SessionSettings,

    #[serde(default)]
    pub login_helper: LoginHelperSettings,

    #[serde(default)]
    pub deployment: DeploymentSettings,
}

/// HTTP gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySettings {
    #[serde(default = "default_gateway_host")]
    pub host: String,

    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bearer token for the `/api/auth` routes. Generated at startup if unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    3100
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            auth_token: None,
        }
    }
}

/// Login session limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    /// Maximum number of live login sessions.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Inactivity period after which a session is swept.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often the sweeper looks for expired sessions.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// How many times a login attempt is restarted after a transient failure
    /// while still connecting.
    #[serde(default = "default_max_transient_restarts")]
    pub max_transient_restarts: u32,
}

fn default_max_concurrent() -> usize {
    50
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_sweep_interval_secs() -> u64 {
    60
}

fn default_max_transient_restarts() -> u32 {
    3
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_transient_restarts: default_max_transient_restarts(),
        }
    }
}

/// External login helper settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoginHelperSettings {
    /// Shell command that runs one login attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Default application id used when a request does not carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_id: Option<i32>,

    /// Default application hash used when a request does not carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_hash: Option<String>,
}

/// Deployment API settings used to activate agents after login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,

    #[serde(default = "default_deployment_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_deployment_timeout_ms() -> u64 {
    15_000
}

impl Default for DeploymentSettings {
    fn default() -> Self {
        Self {
            api_url: None,
            api_token: None,
            timeout_ms: default_deployment_timeout_ms(),
        }
    }
}

impl Settings {
    /// Default TOML config file path (`~/.loginbridge/config.toml`).
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::loginbridge_home().join("config.toml")
    }

    /// Load settings from a TOML file.
    ///
    /// Returns `None` if the file doesn't exist. Returns an error only
    /// if the file exists but can't be parsed.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {}", path.display(), e)),
        };

        let settings: Self = toml::from_str(&data)
            .map_err(|e| format!("invalid TOML in {}: {}", path.display(), e))?;
        Ok(Some(settings))
    }

    /// Write a commented TOML config file with the current settings.
    pub fn save_toml(&self, path: &Path) -> Result<(), String> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| format!("failed to serialize settings: {}", e))?;

        let content = format!(
            "# loginbridge configuration file.\n\
             #\n\
             # Priority: env var > this file > defaults.\n\
             # Run `loginbridge config init` to regenerate this file.\n\
             \n\
             {raw}"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("failed to create {}: {}", parent.display(), e))?;
        }

        std::fs::write(path, content)
            .map_err(|e| format!("failed to write {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn default_toml_path_under_loginbridge() {
        let path = Settings::default_toml_path();
        assert!(path.to_string_lossy().contains(".loginbridge"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn missing_toml_file_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let loaded = Settings::load_toml(&dir.path().join("config.toml")).expect("load");
        assert!(loaded.is_none());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[sessions]\nmax_concurrent = 8\n\n[login_helper]\ncommand = \"./helper\"\n",
        )
        .expect("write");

        let loaded = Settings::load_toml(&path).expect("load").expect("present");
        assert_eq!(loaded.sessions.max_concurrent, 8);
        assert_eq!(loaded.sessions.ttl_secs, 300);
        assert_eq!(loaded.sessions.sweep_interval_secs, 60);
        assert_eq!(loaded.login_helper.command.as_deref(), Some("./helper"));
        assert_eq!(loaded.gateway, GatewaySettings::default());
    }

    #[test]
    fn invalid_toml_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sessions\nmax_concurrent = ").expect("write");
        let err = Settings::load_toml(&path).unwrap_err();
        assert!(err.contains("invalid TOML"));
    }

    #[test]
    fn saved_toml_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let settings = Settings {
            deployment: DeploymentSettings {
                api_url: Some("https://deploy.internal".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        settings.save_toml(&path).expect("save");
        let loaded = Settings::load_toml(&path).expect("load").expect("present");
        assert_eq!(loaded, settings);
    }
}
