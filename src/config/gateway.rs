use crate::config::helpers::{optional_env, parse_optional_env};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Web gateway configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token for authentication. Random hex generated at startup if unset.
    pub auth_token: Option<String>,
}

impl GatewayConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            host: optional_env("GATEWAY_HOST")?.unwrap_or_else(|| settings.gateway.host.clone()),
            port: parse_optional_env("GATEWAY_PORT", "a valid port number")?
                .unwrap_or(settings.gateway.port),
            auth_token: optional_env("GATEWAY_AUTH_TOKEN")?
                .or_else(|| settings.gateway.auth_token.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::helpers::ENV_MUTEX;

    fn clear_gateway_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("GATEWAY_HOST");
            std::env::remove_var("GATEWAY_PORT");
            std::env::remove_var("GATEWAY_AUTH_TOKEN");
        }
    }

    #[test]
    fn gateway_defaults_come_from_settings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_gateway_env();

        let cfg = GatewayConfig::resolve(&Settings::default()).expect("resolve");
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 3100);
        assert!(cfg.auth_token.is_none());
    }

    #[test]
    fn gateway_env_overrides_settings() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_gateway_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GATEWAY_PORT", "8088");
            std::env::set_var("GATEWAY_AUTH_TOKEN", "\"tok-123\"");
        }
        let mut settings = Settings::default();
        settings.gateway.host = "0.0.0.0".to_string();

        let cfg = GatewayConfig::resolve(&settings).expect("resolve");
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8088);
        assert_eq!(cfg.auth_token.as_deref(), Some("tok-123"));

        clear_gateway_env();
    }

    #[test]
    fn gateway_rejects_bad_port() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_gateway_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("GATEWAY_PORT", "70000");
        }
        let err = GatewayConfig::resolve(&Settings::default()).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => assert_eq!(key, "GATEWAY_PORT"),
            other => panic!("unexpected error: {other}"),
        }

        clear_gateway_env();
    }
}
