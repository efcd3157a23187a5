//! Request and response bodies for the gateway API.

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::auth::{SessionStatus, SessionView, StartLogin};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
}

#[derive(Deserialize)]
pub struct StartSessionRequest {
    pub user_id: String,
    pub phone_number: String,
    #[serde(default)]
    pub api_id: Option<i32>,
    #[serde(default)]
    pub api_hash: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub session_key: Option<String>,
}

impl From<StartSessionRequest> for StartLogin {
    fn from(req: StartSessionRequest) -> Self {
        Self {
            user_id: req.user_id,
            phone_number: req.phone_number,
            api_id: req.api_id,
            api_hash: req.api_hash.map(SecretString::from),
            agent_id: req.agent_id,
            session_key: req.session_key,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_key: String,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub session_key: String,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<SessionView> for SessionStatusResponse {
    fn from(view: SessionView) -> Self {
        Self {
            session_key: view.session_key,
            status: view.status,
            error: view.error,
            credential: view
                .credential
                .map(|credential| credential.expose_secret().to_string()),
            password_hint: view.password_hint,
            agent_id: view.agent_id,
            created_at: view.created_at,
        }
    }
}

#[derive(Deserialize)]
pub struct SubmitCodeRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct SubmitPasswordRequest {
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub session_key: String,
    pub status: SessionStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub success: bool,
    pub removed: bool,
}
