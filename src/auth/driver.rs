//! Background task that drives one login attempt to a terminal state.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::Mutex;

use crate::auth::activation::{AgentActivator, activate_agent};
use crate::auth::bridge::{InputKind, wait_for_input};
use crate::auth::client::{AuthConnector, LoginParams, LoginPrompts};
use crate::auth::redact::redact_sensitive_detail;
use crate::auth::session::{SessionRecord, SessionStatus};
use crate::error::ProviderError;

pub(crate) struct LoginTask {
    pub(crate) record: Arc<Mutex<SessionRecord>>,
    pub(crate) params: LoginParams,
    pub(crate) connector: Arc<dyn AuthConnector>,
    pub(crate) activator: Option<Arc<dyn AgentActivator>>,
    pub(crate) max_transient_restarts: u32,
}

impl LoginTask {
    /// Run until the record reaches `completed` or `error`. Failures are
    /// written into the record; nothing is returned to the caller of `start`.
    pub(crate) async fn run(self) {
        match self.sign_in().await {
            Ok(credential) => self.finish(credential).await,
            Err(e) => {
                let failed = self.record.lock().await.fail(e.reason());
                if failed {
                    tracing::warn!(
                        reason = %redact_sensitive_detail(e.reason()),
                        "Login failed"
                    );
                }
            }
        }
    }

    async fn sign_in(&self) -> Result<SecretString, ProviderError> {
        let prompts = SessionPrompts {
            record: Arc::clone(&self.record),
        };
        let mut restarts = 0;
        loop {
            match self.attempt(&prompts).await {
                Ok(credential) => return Ok(credential),
                Err(e) if e.is_transient() && restarts < self.max_transient_restarts => {
                    let mut record = self.record.lock().await;
                    if record.status() != SessionStatus::Connecting || record.is_released() {
                        return Err(e);
                    }
                    restarts += 1;
                    record.note_transient();
                    tracing::debug!(
                        attempt = restarts,
                        reason = %redact_sensitive_detail(e.reason()),
                        "Transient error while connecting, restarting login"
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One connect + sign-in round. The connection is released as soon as
    /// `sign_in` returns, whatever the outcome.
    async fn attempt(&self, prompts: &SessionPrompts) -> Result<SecretString, ProviderError> {
        let connection = self.connector.connect(&self.params).await?;
        let attached = self
            .record
            .lock()
            .await
            .attach_connection(Arc::clone(&connection));
        if !attached {
            connection.disconnect().await;
            return Err(ProviderError::fatal("session was closed before connecting"));
        }
        tracing::debug!("Login connection established");

        let result = connection.sign_in(&self.params, prompts).await;

        let owned = self.record.lock().await.take_connection();
        if let Some(connection) = owned {
            connection.disconnect().await;
        }
        result
    }

    async fn finish(&self, credential: SecretString) {
        let agent_id = self.record.lock().await.agent_id().map(str::to_string);

        if let Some(agent_id) = agent_id {
            let Some(activator) = &self.activator else {
                self.record
                    .lock()
                    .await
                    .fail("agent activation failed: no deployment API is configured");
                return;
            };
            if !self.record.lock().await.begin_activation() {
                tracing::info!(
                    agent_id = %agent_id,
                    "Session removed before activation, credential discarded"
                );
                return;
            }
            let result = activate_agent(activator.as_ref(), &agent_id, &credential).await;
            let mut record = self.record.lock().await;
            match result {
                Err(e) => {
                    tracing::warn!(agent_id = %agent_id, error = %e, "Agent activation failed");
                    record.fail(&format!("agent activation failed: {e}"));
                    return;
                }
                Ok(()) if record.is_released() => {
                    tracing::info!(
                        agent_id = %agent_id,
                        "Agent activated after its login session was removed"
                    );
                    return;
                }
                Ok(()) => {}
            }
        }

        if self.record.lock().await.complete(credential) {
            tracing::info!("Login completed");
        }
    }
}

/// [`LoginPrompts`] backed by a session record.
struct SessionPrompts {
    record: Arc<Mutex<SessionRecord>>,
}

#[async_trait]
impl LoginPrompts for SessionPrompts {
    async fn request_code(&self) -> Result<SecretString, ProviderError> {
        let rx = self.record.lock().await.begin_input(InputKind::Code, None)?;
        tracing::debug!("Waiting for login code");
        wait_for_input(rx, InputKind::Code).await
    }

    async fn request_password(&self, hint: Option<String>) -> Result<SecretString, ProviderError> {
        let rx = self
            .record
            .lock()
            .await
            .begin_input(InputKind::Password, hint)?;
        tracing::debug!("Waiting for two-factor password");
        wait_for_input(rx, InputKind::Password).await
    }

    async fn report(&self, error: ProviderError) {
        let mut record = self.record.lock().await;
        let reason = redact_sensitive_detail(error.reason());
        if error.is_transient() {
            let count = record.note_transient();
            tracing::debug!(count, reason = %reason, status = %record.status(), "Absorbed transient provider error");
        } else if record.fail(error.reason()) {
            tracing::warn!(reason = %reason, "Provider reported a fatal error");
        }
    }
}
