use std::time::Duration;

use crate::config::helpers::{parse_optional_env, require_positive};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Limits applied by the login session registry.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum number of live sessions; `create` fails fast beyond it.
    pub max_concurrent: usize,
    /// A session not polled for longer than this is swept.
    pub ttl: Duration,
    /// Period of the expiry sweep.
    pub sweep_interval: Duration,
    /// Restarts allowed for transient failures returned while connecting.
    pub max_transient_restarts: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl SessionConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let defaults = &settings.sessions;

        let max_concurrent = parse_optional_env::<usize>(
            "AUTH_MAX_CONCURRENT_SESSIONS",
            "a positive integer",
        )?
        .unwrap_or(defaults.max_concurrent);
        require_positive("AUTH_MAX_CONCURRENT_SESSIONS", max_concurrent as u64)?;

        let ttl_secs = parse_optional_env("AUTH_SESSION_TTL_SECS", "a positive integer")?
            .unwrap_or(defaults.ttl_secs);
        require_positive("AUTH_SESSION_TTL_SECS", ttl_secs)?;

        let sweep_secs = parse_optional_env("AUTH_SWEEP_INTERVAL_SECS", "a positive integer")?
            .unwrap_or(defaults.sweep_interval_secs);
        require_positive("AUTH_SWEEP_INTERVAL_SECS", sweep_secs)?;

        let max_transient_restarts =
            parse_optional_env("AUTH_MAX_TRANSIENT_RESTARTS", "a non-negative integer")?
                .unwrap_or(defaults.max_transient_restarts);

        Ok(Self {
            max_concurrent,
            ttl: Duration::from_secs(ttl_secs),
            sweep_interval: Duration::from_secs(sweep_secs),
            max_transient_restarts,
        })
    }

    fn from_settings(settings: &Settings) -> Self {
        Self {
            max_concurrent: settings.sessions.max_concurrent,
            ttl: Duration::from_secs(settings.sessions.ttl_secs),
            sweep_interval: Duration::from_secs(settings.sessions.sweep_interval_secs),
            max_transient_restarts: settings.sessions.max_transient_restarts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::helpers::ENV_MUTEX;

    fn clear_session_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("AUTH_MAX_CONCURRENT_SESSIONS");
            std::env::remove_var("AUTH_SESSION_TTL_SECS");
            std::env::remove_var("AUTH_SWEEP_INTERVAL_SECS");
            std::env::remove_var("AUTH_MAX_TRANSIENT_RESTARTS");
        }
    }

    #[test]
    fn session_limits_use_safe_defaults() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_session_env();

        let cfg = SessionConfig::resolve(&Settings::default()).expect("resolve");
        assert_eq!(cfg.max_concurrent, 50);
        assert_eq!(cfg.ttl, Duration::from_secs(300));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(60));
        assert_eq!(cfg.max_transient_restarts, 3);
    }

    #[test]
    fn session_limits_apply_env_overrides() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_session_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("AUTH_MAX_CONCURRENT_SESSIONS", "5");
            std::env::set_var("AUTH_SESSION_TTL_SECS", "30");
        }
        let mut settings = Settings::default();
        settings.sessions.sweep_interval_secs = 10;

        let cfg = SessionConfig::resolve(&settings).expect("resolve");
        assert_eq!(cfg.max_concurrent, 5);
        assert_eq!(cfg.ttl, Duration::from_secs(30));
        assert_eq!(cfg.sweep_interval, Duration::from_secs(10));

        clear_session_env();
    }

    #[test]
    fn session_limits_reject_zero() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_session_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("AUTH_MAX_CONCURRENT_SESSIONS", "0");
        }
        let err = SessionConfig::resolve(&Settings::default()).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => {
                assert_eq!(key, "AUTH_MAX_CONCURRENT_SESSIONS")
            }
            other => panic!("unexpected error: {other}"),
        }

        clear_session_env();
    }
}
