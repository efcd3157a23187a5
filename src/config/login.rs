use secrecy::SecretString;

use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// External login helper configuration.
#[derive(Debug, Clone)]
pub struct LoginHelperConfig {
    /// Shell command run once per login attempt. `None` disables serving.
    pub command: Option<String>,
    /// Application id applied when a start request omits one.
    pub default_api_id: Option<i32>,
    /// Application hash applied when a start request omits one.
    pub default_api_hash: Option<SecretString>,
}

impl LoginHelperConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let helper = &settings.login_helper;
        Ok(Self {
            command: optional_env("LOGIN_HELPER_COMMAND")?.or_else(|| helper.command.clone()),
            default_api_id: parse_optional_env("LOGIN_API_ID", "an integer")?.or(helper.api_id),
            default_api_hash: optional_env("LOGIN_API_HASH")?
                .or_else(|| helper.api_hash.clone())
                .map(SecretString::from),
        })
    }

    /// The helper command, or an error explaining how to set it.
    pub fn require_command(&self) -> Result<&str, ConfigError> {
        self.command
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "LOGIN_HELPER_COMMAND".to_string(),
                hint: "Set it in the environment or [login_helper].command in config.toml"
                    .to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;
    use crate::config::helpers::ENV_MUTEX;

    fn clear_login_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("LOGIN_HELPER_COMMAND");
            std::env::remove_var("LOGIN_API_ID");
            std::env::remove_var("LOGIN_API_HASH");
        }
    }

    #[test]
    fn missing_command_is_reported_with_hint() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_login_env();

        let cfg = LoginHelperConfig::resolve(&Settings::default()).expect("resolve");
        let err = cfg.require_command().unwrap_err();
        assert!(err.to_string().contains("LOGIN_HELPER_COMMAND"));
    }

    #[test]
    fn env_overrides_helper_settings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_login_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("LOGIN_API_ID", "12345");
            std::env::set_var("LOGIN_API_HASH", "0123abcd");
        }
        let mut settings = Settings::default();
        settings.login_helper.command = Some("python3 helper.py".to_string());
        settings.login_helper.api_id = Some(1);

        let cfg = LoginHelperConfig::resolve(&settings).expect("resolve");
        assert_eq!(cfg.require_command().unwrap(), "python3 helper.py");
        assert_eq!(cfg.default_api_id, Some(12345));
        assert_eq!(
            cfg.default_api_hash.as_ref().map(|s| s.expose_secret().to_string()),
            Some("0123abcd".to_string())
        );

        clear_login_env();
    }
}
