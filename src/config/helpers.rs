//! Env var readers shared by the config resolvers.

use std::str::FromStr;

use crate::error::ConfigError;

/// Serialises tests that mutate process env vars.
#[cfg(test)]
pub(crate) static ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

/// Read an env var, treating unset and blank values the same.
///
/// Surrounding quotes left behind by hand-written `.env` files are stripped.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => {
            let normalized = normalize_env_value(&value);
            if normalized.is_empty() {
                Ok(None)
            } else {
                Ok(Some(normalized))
            }
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

/// Read and parse an env var. `expectation` describes the accepted values in
/// the error message, e.g. "a positive integer".
pub(crate) fn parse_optional_env<T>(key: &str, expectation: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| s.parse::<T>())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be {expectation}: {e}"),
        })
}

/// Reject zero for settings that size timers or pools.
pub(crate) fn require_positive(key: &str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be > 0".to_string(),
        });
    }
    Ok(value)
}

fn normalize_env_value(raw: &str) -> String {
    let trimmed = raw.trim();
    let maybe_unquoted = trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .or_else(|| {
            trimmed
                .strip_prefix('\'')
                .and_then(|inner| inner.strip_suffix('\''))
        })
        .unwrap_or(trimmed);
    maybe_unquoted.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_quotes_and_whitespace() {
        assert_eq!(normalize_env_value("  \"abc\" "), "abc");
        assert_eq!(normalize_env_value("'abc'"), "abc");
        assert_eq!(normalize_env_value("\"abc"), "\"abc");
    }

    #[test]
    fn blank_values_read_as_unset() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("LOGINBRIDGE_TEST_BLANK", "  ");
        }
        assert_eq!(optional_env("LOGINBRIDGE_TEST_BLANK").unwrap(), None);
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("LOGINBRIDGE_TEST_BLANK");
        }
    }

    #[test]
    fn zero_is_rejected_for_positive_settings() {
        let err = require_positive("AUTH_SESSION_TTL_SECS", 0).unwrap_err();
        assert!(err.to_string().contains("must be > 0"));
        assert_eq!(require_positive("AUTH_SESSION_TTL_SECS", 5).unwrap(), 5);
    }
}
