//! Scripted in-memory login connector for tests.
//!
//! Each `connect` consumes the next scripted attempt (or a clone of the
//! fallback script once the queue is empty) and `sign_in` replays its steps
//! against the orchestrator's prompts.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, Notify};

use crate::auth::client::{AuthConnection, AuthConnector, LoginParams, LoginPrompts};
use crate::auth::registry::SessionRegistry;
use crate::auth::session::{SessionStatus, SessionView};
use crate::error::ProviderError;

/// One scripted action inside `sign_in`.
#[derive(Clone)]
pub enum Step {
    /// Report a transient error event and carry on.
    ReportTransient(String),
    /// Block until the test notifies.
    WaitFor(Arc<Notify>),
    /// Ask for the login code; any other value fails with `PHONE_CODE_INVALID`.
    RequestCode { expect: String },
    /// Ask for the 2FA password; any other value fails with `PASSWORD_HASH_INVALID`.
    RequestPassword { hint: Option<String>, expect: String },
    /// Return a transient error from `sign_in`.
    FailTransient(String),
    /// Return a fatal error from `sign_in`.
    Fail(String),
    /// Return this credential.
    Complete(String),
    /// Stay connected until disconnected.
    Hold,
}

enum Attempt {
    Refuse(ProviderError),
    Run(Vec<Step>),
}

/// Connection counters shared by every connection of one connector.
#[derive(Debug, Default)]
pub struct ConnectorStats {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl ConnectorStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct ScriptedConnector {
    attempts: Mutex<VecDeque<Attempt>>,
    fallback: Option<Vec<Step>>,
    stats: Arc<ConnectorStats>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every connection runs a copy of `steps`.
    pub fn repeating(steps: Vec<Step>) -> Self {
        Self {
            fallback: Some(steps),
            ..Self::default()
        }
    }

    /// Queue the script for the next connection.
    pub fn then(self, steps: Vec<Step>) -> Self {
        self.push(Attempt::Run(steps))
    }

    /// Make the next `connect` call fail.
    pub fn then_refuse(self, error: ProviderError) -> Self {
        self.push(Attempt::Refuse(error))
    }

    fn push(mut self, attempt: Attempt) -> Self {
        self.attempts.get_mut().push_back(attempt);
        self
    }

    pub fn stats(&self) -> Arc<ConnectorStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl AuthConnector for ScriptedConnector {
    async fn connect(&self, _params: &LoginParams) -> Result<Arc<dyn AuthConnection>, ProviderError> {
        let next = self.attempts.lock().await.pop_front();
        let steps = match next {
            Some(Attempt::Refuse(error)) => return Err(error),
            Some(Attempt::Run(steps)) => steps,
            None => match &self.fallback {
                Some(steps) => steps.clone(),
                None => return Err(ProviderError::fatal("no scripted connection left")),
            },
        };
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedConnection {
            steps,
            stats: Arc::clone(&self.stats),
            closed: AtomicBool::new(false),
            closed_signal: Notify::new(),
        }))
    }
}

struct ScriptedConnection {
    steps: Vec<Step>,
    stats: Arc<ConnectorStats>,
    closed: AtomicBool,
    closed_signal: Notify,
}

#[async_trait]
impl AuthConnection for ScriptedConnection {
    async fn sign_in(
        &self,
        _params: &LoginParams,
        prompts: &dyn LoginPrompts,
    ) -> Result<SecretString, ProviderError> {
        for step in &self.steps {
            match step {
                Step::ReportTransient(reason) => {
                    prompts.report(ProviderError::transient(reason.clone())).await
                }
                Step::WaitFor(gate) => gate.notified().await,
                Step::RequestCode { expect } => {
                    let code = prompts.request_code().await?;
                    if code.expose_secret() != expect {
                        return Err(ProviderError::fatal("PHONE_CODE_INVALID"));
                    }
                }
                Step::RequestPassword { hint, expect } => {
                    let password = prompts.request_password(hint.clone()).await?;
                    if password.expose_secret() != expect {
                        return Err(ProviderError::fatal("PASSWORD_HASH_INVALID"));
                    }
                }
                Step::FailTransient(reason) => return Err(ProviderError::transient(reason.clone())),
                Step::Fail(reason) => return Err(ProviderError::fatal(reason.clone())),
                Step::Complete(credential) => return Ok(SecretString::from(credential.clone())),
                Step::Hold => {
                    if !self.closed.load(Ordering::SeqCst) {
                        self.closed_signal.notified().await;
                    }
                    return Err(ProviderError::fatal("connection closed"));
                }
            }
        }
        Err(ProviderError::fatal("script ended without a result"))
    }

    async fn disconnect(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
            self.closed_signal.notify_one();
        }
    }
}

/// Poll `status` until the session reaches `want`, for up to two seconds of
/// (possibly paused) tokio time.
pub async fn wait_for_status(
    registry: &SessionRegistry,
    key: &str,
    want: SessionStatus,
) -> Result<SessionView, String> {
    let mut last = None;
    for _ in 0..400 {
        match registry.status(key).await {
            Ok(view) if view.status == want => return Ok(view),
            Ok(view) => last = Some(view.status),
            Err(e) => return Err(e.to_string()),
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Err(format!(
        "session {key} never reached {want}, last status {last:?}"
    ))
}
