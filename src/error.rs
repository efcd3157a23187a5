//! Error types for loginbridge.

use std::fmt;

use serde::Serialize;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Activation error: {0}")]
    Activation(#[from] ActivationError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// HTTP gateway errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway failed to start: {reason}")]
    StartupFailed { reason: String },

    #[error("Failed to listen for the shutdown signal: {0}")]
    ShutdownSignal(std::io::Error),
}

/// Errors returned by the session registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Maximum concurrent login sessions ({max}) reached, retry later")]
    CapacityExceeded { max: usize },

    #[error("Session {key} not found")]
    NotFound { key: String },

    #[error("Session {key} is {actual}, expected {expected}")]
    StateMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("Session key {key} is already in use")]
    DuplicateKey { key: String },

    #[error("Invalid login request: {0}")]
    InvalidRequest(String),

    #[error("Agent {agent_id} cannot be activated: no deployment API is configured")]
    ActivationUnavailable { agent_id: String },

    #[error("Login service is shutting down")]
    ShuttingDown,
}

/// Failure reported by the external login connection.
///
/// The connection classifies every failure itself. Transient failures (the
/// connection being re-routed to another data center, a dropped socket that
/// the client will re-open) never terminate a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("transient provider error: {reason}")]
    Transient { reason: String },

    #[error("{reason}")]
    Fatal { reason: String },
}

impl ProviderError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient { reason } | Self::Fatal { reason } => reason,
        }
    }
}

/// Errors from the deployment collaborator.
#[derive(Debug, thiserror::Error)]
pub enum ActivationError {
    #[error("Deployment API unreachable ({kind}): {reason}")]
    Unreachable { kind: &'static str, reason: String },

    #[error("Deployment API rejected {operation} for agent {agent_id}: HTTP {status}: {body}")]
    Rejected {
        operation: &'static str,
        agent_id: String,
        status: u16,
        body: String,
    },

    #[error("Invalid deployment API configuration: {0}")]
    InvalidConfig(String),
}

/// Why a session was removed from the registry.
///
/// `ExpiredByTtl` is internal only: later callers observe the removal as
/// [`SessionError::NotFound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupReason {
    Explicit,
    ExpiredByTtl,
    Evicted,
    Shutdown,
}

impl CleanupReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Explicit => "explicit",
            Self::ExpiredByTtl => "expired_by_ttl",
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CleanupReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error body returned to API callers.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApiErrorPayload {
    pub code: &'static str,
    pub retryable: bool,
    pub message: String,
}

impl ApiErrorPayload {
    fn new(code: &'static str, retryable: bool, message: impl Into<String>) -> Self {
        Self {
            code,
            retryable,
            message: message.into(),
        }
    }
}

impl SessionError {
    /// Stable machine-readable code and retry hint for this error.
    pub fn to_payload(&self) -> ApiErrorPayload {
        let message = self.to_string();
        match self {
            Self::CapacityExceeded { .. } => {
                ApiErrorPayload::new("session.capacity_exceeded", true, message)
            }
            Self::NotFound { .. } => ApiErrorPayload::new("session.not_found", false, message),
            Self::StateMismatch { .. } => {
                ApiErrorPayload::new("session.state_mismatch", false, message)
            }
            Self::DuplicateKey { .. } => {
                ApiErrorPayload::new("session.duplicate_key", false, message)
            }
            Self::InvalidRequest(_) => {
                ApiErrorPayload::new("session.invalid_request", false, message)
            }
            Self::ActivationUnavailable { .. } => {
                ApiErrorPayload::new("session.activation_unavailable", false, message)
            }
            Self::ShuttingDown => ApiErrorPayload::new("session.shutting_down", true, message),
        }
    }
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_errors_are_retryable() {
        let payload = SessionError::CapacityExceeded { max: 4 }.to_payload();
        assert_eq!(payload.code, "session.capacity_exceeded");
        assert!(payload.retryable);
        assert!(payload.message.contains("(4)"));
    }

    #[test]
    fn state_mismatch_names_expected_and_actual() {
        let err = SessionError::StateMismatch {
            key: "k1".to_string(),
            expected: "awaiting_code".to_string(),
            actual: "connecting".to_string(),
        };
        let payload = err.to_payload();
        assert_eq!(payload.code, "session.state_mismatch");
        assert!(!payload.retryable);
        assert_eq!(
            payload.message,
            "Session k1 is connecting, expected awaiting_code"
        );
    }

    #[test]
    fn provider_error_classification_is_typed() {
        assert!(ProviderError::transient("migrating to DC4").is_transient());
        assert!(!ProviderError::fatal("PHONE_CODE_INVALID").is_transient());
        assert_eq!(ProviderError::fatal("boom").to_string(), "boom");
        assert_eq!(ProviderError::transient("dc").reason(), "dc");
    }

    #[test]
    fn wraps_domain_errors() {
        let err = Error::from(SessionError::NotFound {
            key: "abc".to_string(),
        });
        assert_eq!(err.to_string(), "Session error: Session abc not found");
        assert_eq!(CleanupReason::ExpiredByTtl.to_string(), "expired_by_ttl");
    }

    #[test]
    fn startup_failures_lift_into_crate_result() {
        fn serve_step(fail_signal: bool) -> Result<()> {
            if fail_signal {
                return Err(GatewayError::ShutdownSignal(std::io::Error::other("no tty")).into());
            }
            let missing: std::result::Result<(), ConfigError> = Err(ConfigError::MissingRequired {
                key: "LOGIN_HELPER_COMMAND".to_string(),
                hint: "set it".to_string(),
            });
            missing?;
            Ok(())
        }

        assert!(matches!(serve_step(true), Err(Error::Gateway(_))));
        let err = serve_step(false).unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingRequired { .. })));
        assert!(err.to_string().contains("LOGIN_HELPER_COMMAND"));
    }
}
