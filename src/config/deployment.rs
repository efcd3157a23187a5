use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::config::helpers::{optional_env, parse_optional_env, require_positive};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Deployment API used to inject credentials into agents and start them.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    pub api_url: Url,
    pub api_token: Option<SecretString>,
    pub timeout: Duration,
}

impl DeploymentConfig {
    /// Returns `None` when no deployment API is configured.
    pub(crate) fn resolve(settings: &Settings) -> Result<Option<Self>, ConfigError> {
        let deployment = &settings.deployment;
        let Some(raw_url) =
            optional_env("DEPLOYMENT_API_URL")?.or_else(|| deployment.api_url.clone())
        else {
            return Ok(None);
        };

        let api_url = Url::parse(raw_url.trim_end_matches('/')).map_err(|e| {
            ConfigError::InvalidValue {
                key: "DEPLOYMENT_API_URL".to_string(),
                message: format!("must be an absolute URL: {e}"),
            }
        })?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidValue {
                key: "DEPLOYMENT_API_URL".to_string(),
                message: format!("unsupported scheme '{}'", api_url.scheme()),
            });
        }

        let timeout_ms = parse_optional_env("DEPLOYMENT_TIMEOUT_MS", "a positive integer")?
            .unwrap_or(deployment.timeout_ms);
        require_positive("DEPLOYMENT_TIMEOUT_MS", timeout_ms)?;

        Ok(Some(Self {
            api_url,
            api_token: optional_env("DEPLOYMENT_API_TOKEN")?
                .or_else(|| deployment.api_token.clone())
                .map(SecretString::from),
            timeout: Duration::from_millis(timeout_ms),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::helpers::ENV_MUTEX;

    fn clear_deployment_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("DEPLOYMENT_API_URL");
            std::env::remove_var("DEPLOYMENT_API_TOKEN");
            std::env::remove_var("DEPLOYMENT_TIMEOUT_MS");
        }
    }

    #[test]
    fn deployment_is_optional() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_deployment_env();

        assert!(
            DeploymentConfig::resolve(&Settings::default())
                .expect("resolve")
                .is_none()
        );
    }

    #[test]
    fn deployment_url_is_validated() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_deployment_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("DEPLOYMENT_API_URL", "ftp://deploy.internal");
        }
        let err = DeploymentConfig::resolve(&Settings::default()).unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("DEPLOYMENT_API_URL", "https://deploy.internal/v1/");
        }
        let cfg = DeploymentConfig::resolve(&Settings::default())
            .expect("resolve")
            .expect("configured");
        assert_eq!(cfg.api_url.as_str(), "https://deploy.internal/v1");
        assert_eq!(cfg.timeout, Duration::from_millis(15_000));

        clear_deployment_env();
    }
}
