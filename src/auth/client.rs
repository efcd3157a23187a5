//! Boundary with the external messaging-network login client.
//!
//! The network protocol itself is opaque to this crate. A connector opens
//! one live connection per login attempt; the connection drives the
//! challenge/response exchange and calls back into [`LoginPrompts`] whenever
//! the network asks for a code or a password.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::ProviderError;

/// Parameters needed to start one login attempt.
pub struct LoginParams {
    pub session_key: String,
    pub phone_number: String,
    pub api_id: i32,
    pub api_hash: SecretString,
}

impl fmt::Debug for LoginParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginParams")
            .field("session_key", &self.session_key)
            .field("phone_number", &mask_phone(&self.phone_number))
            .field("api_id", &self.api_id)
            .field("api_hash", &"[REDACTED]")
            .finish()
    }
}

/// Keep the last four digits of a phone number for log correlation.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() <= 4 {
        return "****".to_string();
    }
    let tail: String = digits[digits.len() - 4..].iter().collect();
    format!("***{tail}")
}

/// Callbacks the login connection uses while signing in.
#[async_trait]
pub trait LoginPrompts: Send + Sync {
    /// Suspend until the user submits the one-time code.
    async fn request_code(&self) -> Result<SecretString, ProviderError>;

    /// Suspend until the user submits the two-factor password.
    async fn request_password(&self, hint: Option<String>) -> Result<SecretString, ProviderError>;

    /// Report a non-terminal error event. Transient errors are absorbed;
    /// fatal ones end the session.
    async fn report(&self, error: ProviderError);
}

/// One live connection to the messaging network, owned by one session.
#[async_trait]
pub trait AuthConnection: Send + Sync {
    /// Run the interactive sign-in and return the serialized credential.
    async fn sign_in(
        &self,
        params: &LoginParams,
        prompts: &dyn LoginPrompts,
    ) -> Result<SecretString, ProviderError>;

    /// Close the connection. Must be safe to call more than once, and
    /// concurrently with an in-flight `sign_in`.
    async fn disconnect(&self);
}

/// Opens login connections.
#[async_trait]
pub trait AuthConnector: Send + Sync {
    async fn connect(&self, params: &LoginParams) -> Result<Arc<dyn AuthConnection>, ProviderError>;
}
