//! Per-attempt session record and its state machine.
//!
//! ```text
//! connecting ──► awaiting_code ──► awaiting_2fa ──► completed
//!     │   └──────────────┴──────────────┴──────────►    ▲
//!     │                                                 │
//!     └─────────── any non-terminal ──────────────► error
//! ```
//!
//! `completed` and `error` are terminal. A connection may re-request the code
//! (wrong code entered) or the password (wrong password) without leaving the
//! waiting state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::auth::bridge::{InputKind, InputSlot, ResolveError};
use crate::auth::client::AuthConnection;
use crate::auth::redact::redact_sensitive_detail;
use crate::error::{ProviderError, SessionError};

/// Status of one login attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    AwaitingCode,
    #[serde(rename = "awaiting_2fa")]
    Awaiting2fa,
    Completed,
    Error,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::AwaitingCode => "awaiting_code",
            Self::Awaiting2fa => "awaiting_2fa",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Completed | Error, _) => false,
            (_, Error) => true,
            (Connecting, AwaitingCode | Awaiting2fa | Completed) => true,
            (AwaitingCode, AwaitingCode | Awaiting2fa | Completed) => true,
            (Awaiting2fa, Awaiting2fa | Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of a record, safe to hand to callers.
#[derive(Debug)]
pub struct SessionView {
    pub session_key: String,
    pub status: SessionStatus,
    pub error: Option<String>,
    /// Present only while `status == completed` and no agent consumed it.
    pub credential: Option<SecretString>,
    pub password_hint: Option<String>,
    pub agent_id: Option<String>,
    pub transient_errors: u32,
    pub created_at: DateTime<Utc>,
}

/// Mutable state of one login attempt. Always accessed under its own lock.
pub(crate) struct SessionRecord {
    key: String,
    user_id: String,
    agent_id: Option<String>,
    status: SessionStatus,
    credential: Option<SecretString>,
    error: Option<String>,
    password_hint: Option<String>,
    input: InputSlot,
    created_at: DateTime<Utc>,
    last_touched: Instant,
    connection: Option<Arc<dyn AuthConnection>>,
    task: Option<JoinHandle<()>>,
    transient_errors: u32,
    activating: bool,
    released: bool,
}

impl SessionRecord {
    pub(crate) fn new(key: String, user_id: String, agent_id: Option<String>) -> Self {
        Self {
            key,
            user_id,
            agent_id,
            status: SessionStatus::Connecting,
            credential: None,
            error: None,
            password_hint: None,
            input: InputSlot::default(),
            created_at: Utc::now(),
            last_touched: Instant::now(),
            connection: None,
            task: None,
            transient_errors: 0,
            activating: false,
            released: false,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub(crate) fn status(&self) -> SessionStatus {
        self.status
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released
    }

    /// Reset the inactivity clock.
    pub(crate) fn touch(&mut self) {
        self.last_touched = Instant::now();
    }

    pub(crate) fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_touched)
    }

    fn transition(&mut self, next: SessionStatus) -> bool {
        if !self.status.can_transition_to(next) {
            tracing::debug!(
                session_key = %self.key,
                from = %self.status,
                to = %next,
                "Ignoring invalid session transition"
            );
            return false;
        }
        if self.status != next {
            tracing::info!(
                session_key = %self.key,
                from = %self.status,
                to = %next,
                "Login session status changed"
            );
        }
        self.status = next;
        true
    }

    /// Store the credential and enter `completed`.
    pub(crate) fn complete(&mut self, credential: SecretString) -> bool {
        if self.released || !self.transition(SessionStatus::Completed) {
            return false;
        }
        self.credential = Some(credential);
        self.password_hint = None;
        self.input.close();
        true
    }

    /// Enter `error` with a redacted message. No-op once terminal.
    pub(crate) fn fail(&mut self, message: &str) -> bool {
        if !self.transition(SessionStatus::Error) {
            return false;
        }
        self.error = Some(redact_sensitive_detail(message));
        self.credential = None;
        self.password_hint = None;
        self.input.close();
        true
    }

    /// Register a prompt for `kind` and move into the matching waiting state.
    pub(crate) fn begin_input(
        &mut self,
        kind: InputKind,
        hint: Option<String>,
    ) -> Result<oneshot::Receiver<SecretString>, ProviderError> {
        if self.released {
            return Err(ProviderError::fatal("session was closed"));
        }
        let next = kind.awaiting_status();
        if !self.status.can_transition_to(next) {
            return Err(ProviderError::fatal(format!(
                "{} requested while session is {}",
                kind.label(),
                self.status
            )));
        }
        let rx = self.input.open(kind)?;
        self.transition(next);
        if kind == InputKind::Password {
            self.password_hint = hint;
        }
        Ok(rx)
    }

    /// Deliver a submitted code or password to the waiting login task.
    pub(crate) fn submit(
        &mut self,
        kind: InputKind,
        value: SecretString,
    ) -> Result<SessionStatus, SessionError> {
        let expected = kind.awaiting_status();
        if self.status != expected {
            return Err(self.mismatch(expected, self.status.to_string()));
        }
        match self.input.resolve(kind, value) {
            Ok(()) => Ok(self.status),
            Err(ResolveError::AlreadyAnswered) => Err(self.mismatch(
                expected,
                format!("{} ({} already submitted)", self.status, kind.label()),
            )),
            Err(ResolveError::NotRequested) => Err(self.mismatch(
                expected,
                format!("{} (no {} requested)", self.status, kind.label()),
            )),
            Err(ResolveError::Abandoned) => Err(self.mismatch(
                expected,
                format!("{} (login task is no longer waiting)", self.status),
            )),
        }
    }

    fn mismatch(&self, expected: SessionStatus, actual: String) -> SessionError {
        SessionError::StateMismatch {
            key: self.key.clone(),
            expected: expected.to_string(),
            actual,
        }
    }

    pub(crate) fn note_transient(&mut self) -> u32 {
        self.transient_errors += 1;
        self.transient_errors
    }

    /// Hand the live connection to this record. Returns `false` when the
    /// record was already released; the caller then owns the disconnect.
    pub(crate) fn attach_connection(&mut self, connection: Arc<dyn AuthConnection>) -> bool {
        if self.released {
            return false;
        }
        self.connection = Some(connection);
        true
    }

    /// Detach the connection without releasing the record.
    pub(crate) fn take_connection(&mut self) -> Option<Arc<dyn AuthConnection>> {
        self.connection.take()
    }

    pub(crate) fn attach_task(&mut self, task: JoinHandle<()>) {
        if self.released {
            task.abort();
        } else {
            self.task = Some(task);
        }
    }

    /// Mark the credential as handed to the deployment API. From here on a
    /// release detaches the login task instead of aborting it. Returns
    /// `false` if the record is already released.
    pub(crate) fn begin_activation(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.activating = true;
        true
    }

    /// Stop the login task and give up the connection. Subsequent calls
    /// return `None`.
    pub(crate) fn release(&mut self) -> Option<Arc<dyn AuthConnection>> {
        if self.released {
            return None;
        }
        self.released = true;
        self.input.close();
        match self.task.take() {
            Some(task) if !self.activating => task.abort(),
            // Dropping the handle detaches the task; activation runs to the end.
            _ => {}
        }
        self.connection.take()
    }

    pub(crate) fn view(&self) -> SessionView {
        let credential = match (&self.credential, self.status, &self.agent_id) {
            (Some(credential), SessionStatus::Completed, None) => {
                Some(SecretString::from(credential.expose_secret().to_string()))
            }
            _ => None,
        };
        SessionView {
            session_key: self.key.clone(),
            status: self.status,
            error: self.error.clone(),
            credential,
            password_hint: self.password_hint.clone(),
            agent_id: self.agent_id.clone(),
            transient_errors: self.transient_errors,
            created_at: self.created_at,
        }
    }
}

impl fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecord")
            .field("key", &self.key)
            .field("user_id", &self.user_id)
            .field("agent_id", &self.agent_id)
            .field("status", &self.status)
            .field("has_credential", &self.credential.is_some())
            .field("error", &self.error)
            .field("pending_input", &self.input.outstanding())
            .field("activating", &self.activating)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::auth::bridge::wait_for_input;

    fn record() -> SessionRecord {
        SessionRecord::new("k1".to_string(), "u1".to_string(), None)
    }

    #[test]
    fn terminal_states_have_no_exits() {
        use SessionStatus::*;
        for from in [Completed, Error] {
            for to in [Connecting, AwaitingCode, Awaiting2fa, Completed, Error] {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(Connecting.can_transition_to(Error));
        assert!(Awaiting2fa.can_transition_to(Error));
        assert!(!Awaiting2fa.can_transition_to(AwaitingCode));
        assert!(!AwaitingCode.can_transition_to(Connecting));
    }

    #[test]
    fn status_serializes_with_wire_names() {
        assert_eq!(
            serde_json::to_string(&SessionStatus::Awaiting2fa).unwrap(),
            "\"awaiting_2fa\""
        );
        assert_eq!(
            serde_json::to_string(&SessionStatus::AwaitingCode).unwrap(),
            "\"awaiting_code\""
        );
    }

    #[test]
    fn submit_while_connecting_is_a_state_mismatch() {
        let mut rec = record();
        let err = rec
            .submit(InputKind::Code, SecretString::from("12345"))
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::StateMismatch {
                key: "k1".to_string(),
                expected: "awaiting_code".to_string(),
                actual: "connecting".to_string(),
            }
        );
        assert_eq!(rec.status(), SessionStatus::Connecting);
    }

    #[tokio::test]
    async fn code_is_delivered_once() {
        let mut rec = record();
        let rx = rec.begin_input(InputKind::Code, None).expect("prompt");
        assert_eq!(rec.status(), SessionStatus::AwaitingCode);

        let status = rec
            .submit(InputKind::Code, SecretString::from("12345"))
            .expect("submit");
        assert_eq!(status, SessionStatus::AwaitingCode);
        let code = wait_for_input(rx, InputKind::Code).await.expect("code");
        assert_eq!(code.expose_secret(), "12345");

        let err = rec
            .submit(InputKind::Code, SecretString::from("12345"))
            .unwrap_err();
        assert!(err.to_string().contains("already submitted"));
    }

    #[test]
    fn password_submit_while_awaiting_code_names_expected_state() {
        let mut rec = record();
        let _rx = rec.begin_input(InputKind::Code, None).expect("prompt");
        let err = rec
            .submit(InputKind::Password, SecretString::from("x"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Session k1 is awaiting_code, expected awaiting_2fa"
        );
        assert_eq!(rec.status(), SessionStatus::AwaitingCode);
    }

    #[test]
    fn credential_only_while_completed() {
        let mut rec = record();
        assert!(rec.view().credential.is_none());
        assert!(rec.complete(SecretString::from("cred")));
        let view = rec.view();
        assert_eq!(view.status, SessionStatus::Completed);
        assert_eq!(
            view.credential.as_ref().map(|c| c.expose_secret().to_string()),
            Some("cred".to_string())
        );

        assert!(!rec.fail("late failure"));
        assert_eq!(rec.view().status, SessionStatus::Completed);
    }

    #[test]
    fn agent_bound_credential_is_never_exposed() {
        let mut rec = SessionRecord::new("k1".into(), "u1".into(), Some("agent-1".into()));
        assert!(rec.complete(SecretString::from("cred")));
        assert!(rec.view().credential.is_none());
    }

    #[test]
    fn failure_redacts_and_is_terminal() {
        let mut rec = record();
        let _rx = rec.begin_input(InputKind::Code, None).expect("prompt");
        assert!(rec.fail("rejected token=abc123"));
        let view = rec.view();
        assert_eq!(view.status, SessionStatus::Error);
        assert_eq!(view.error.as_deref(), Some("rejected token=[REDACTED]"));
        assert!(!rec.complete(SecretString::from("cred")));
        assert!(rec.view().credential.is_none());
        assert!(rec.begin_input(InputKind::Code, None).is_err());
    }

    #[test]
    fn password_prompt_records_hint() {
        let mut rec = record();
        let _rx = rec
            .begin_input(InputKind::Password, Some("pet name".to_string()))
            .expect("prompt");
        let view = rec.view();
        assert_eq!(view.status, SessionStatus::Awaiting2fa);
        assert_eq!(view.password_hint.as_deref(), Some("pet name"));
    }

    #[tokio::test]
    async fn release_is_single_shot_and_unblocks_waiter() {
        let mut rec = record();
        let rx = rec.begin_input(InputKind::Code, None).expect("prompt");
        assert!(rec.release().is_none());
        assert!(rec.is_released());
        assert!(wait_for_input(rx, InputKind::Code).await.is_err());
        assert!(rec.release().is_none());
    }

    /// Spawn a task that reports back once `go` fires, and attach it.
    fn attach_gated_task(rec: &mut SessionRecord) -> (oneshot::Sender<()>, oneshot::Receiver<()>) {
        let (go_tx, go_rx) = oneshot::channel::<()>();
        let (done_tx, done_rx) = oneshot::channel::<()>();
        rec.attach_task(tokio::spawn(async move {
            let _ = go_rx.await;
            let _ = done_tx.send(());
        }));
        (go_tx, done_rx)
    }

    #[tokio::test]
    async fn release_aborts_login_task() {
        let mut rec = record();
        let (go, done) = attach_gated_task(&mut rec);
        rec.release();
        let _ = go.send(());
        assert!(done.await.is_err());
    }

    #[tokio::test]
    async fn release_during_activation_lets_task_finish() {
        let mut rec = record();
        let (go, done) = attach_gated_task(&mut rec);
        assert!(rec.begin_activation());
        rec.release();
        go.send(()).unwrap();
        assert!(done.await.is_ok());
        assert!(!rec.begin_activation());
    }

    #[test]
    fn idle_time_resets_on_touch() {
        let mut rec = record();
        let later = Instant::now() + Duration::from_secs(30);
        assert!(rec.idle_for(later) >= Duration::from_secs(30));
        rec.touch();
        assert!(rec.idle_for(Instant::now()) < Duration::from_secs(1));
    }
}
