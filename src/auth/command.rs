//! Login connector that runs an external helper process per session.
//!
//! The helper owns the messaging-network protocol and talks to us over
//! newline-delimited JSON:
//!
//! ```text
//! helper -> {"type":"code_required"}
//!        -> {"type":"password_required","hint":"..."}
//!        -> {"type":"error","transient":true,"message":"..."}
//!        -> {"type":"completed","credential":"..."}
//! us     -> {"type":"code","code":"..."}
//!        -> {"type":"password","password":"..."}
//! ```
//!
//! Login parameters travel in the helper's environment, never in argv.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, Notify};
use tracing::Instrument;

use crate::auth::client::{AuthConnection, AuthConnector, LoginParams, LoginPrompts};
use crate::auth::redact::redact_sensitive_detail;
use crate::error::ProviderError;

pub const ENV_SESSION_KEY: &str = "LOGINBRIDGE_LOGIN_SESSION_KEY";
pub const ENV_PHONE: &str = "LOGINBRIDGE_LOGIN_PHONE";
pub const ENV_API_ID: &str = "LOGINBRIDGE_LOGIN_API_ID";
pub const ENV_API_HASH: &str = "LOGINBRIDGE_LOGIN_API_HASH";

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HelperEvent {
    CodeRequired,
    PasswordRequired {
        #[serde(default)]
        hint: Option<String>,
    },
    Error {
        #[serde(default)]
        transient: bool,
        message: String,
    },
    Completed {
        credential: String,
    },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HelperReply<'a> {
    Code { code: &'a str },
    Password { password: &'a str },
}

/// Spawns `command` through `/bin/sh -c` for every login attempt.
#[derive(Debug, Clone)]
pub struct CommandConnector {
    command: String,
}

impl CommandConnector {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl AuthConnector for CommandConnector {
    async fn connect(&self, params: &LoginParams) -> Result<Arc<dyn AuthConnection>, ProviderError> {
        let mut command = Command::new("/bin/sh");
        command
            .arg("-c")
            .arg(&self.command)
            .env(ENV_SESSION_KEY, &params.session_key)
            .env(ENV_PHONE, &params.phone_number)
            .env(ENV_API_ID, params.api_id.to_string())
            .env(ENV_API_HASH, params.api_hash.expose_secret())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| ProviderError::fatal(format!("failed to start login helper: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::fatal("login helper stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::fatal("login helper stdout unavailable"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(
                async move {
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        tracing::debug!(line = %redact_sensitive_detail(&line), "login helper stderr");
                    }
                }
                .in_current_span(),
            );
        }
        tracing::debug!(pid = child.id(), "Login helper started");

        Ok(Arc::new(CommandConnection {
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            stdout: Mutex::new(BufReader::new(stdout).lines()),
            closed: AtomicBool::new(false),
            closed_signal: Notify::new(),
        }))
    }
}

struct CommandConnection {
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Lines<BufReader<ChildStdout>>>,
    closed: AtomicBool,
    closed_signal: Notify,
}

impl CommandConnection {
    async fn send(&self, reply: HelperReply<'_>) -> Result<(), ProviderError> {
        let mut line = serde_json::to_string(&reply)
            .map_err(|e| ProviderError::fatal(format!("failed to encode helper reply: {e}")))?;
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| ProviderError::fatal("connection closed"))?;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| ProviderError::fatal(format!("failed to write to login helper: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| ProviderError::fatal(format!("failed to write to login helper: {e}")))
    }

    /// Error for a helper whose stdout ended without a result.
    async fn exit_error(&self) -> ProviderError {
        if self.closed.load(Ordering::SeqCst) {
            return ProviderError::fatal("connection closed");
        }
        let child = self.child.lock().await.take();
        match child {
            Some(mut child) => match child.wait().await {
                Ok(status) => ProviderError::fatal(format!(
                    "login helper exited ({status}) before completing"
                )),
                Err(e) => ProviderError::fatal(format!("failed waiting for login helper: {e}")),
            },
            None => ProviderError::fatal("login helper exited before completing"),
        }
    }
}

#[async_trait]
impl AuthConnection for CommandConnection {
    async fn sign_in(
        &self,
        _params: &LoginParams,
        prompts: &dyn LoginPrompts,
    ) -> Result<SecretString, ProviderError> {
        let mut lines = self.stdout.lock().await;
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(ProviderError::fatal("connection closed"));
            }
            let next = tokio::select! {
                next = lines.next_line() => next,
                _ = self.closed_signal.notified() => {
                    return Err(ProviderError::fatal("connection closed"));
                }
            };
            let line = match next {
                Ok(Some(line)) => line,
                Ok(None) => return Err(self.exit_error().await),
                Err(e) => {
                    return Err(ProviderError::fatal(format!(
                        "failed to read from login helper: {e}"
                    )));
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let event: HelperEvent = match serde_json::from_str(line) {
                Ok(event) => event,
                Err(_) => {
                    tracing::debug!(line = %redact_sensitive_detail(line), "login helper stdout");
                    continue;
                }
            };

            match event {
                HelperEvent::CodeRequired => {
                    let code = prompts.request_code().await?;
                    self.send(HelperReply::Code {
                        code: code.expose_secret(),
                    })
                    .await?;
                }
                HelperEvent::PasswordRequired { hint } => {
                    let password = prompts.request_password(hint).await?;
                    self.send(HelperReply::Password {
                        password: password.expose_secret(),
                    })
                    .await?;
                }
                HelperEvent::Error {
                    transient: true,
                    message,
                } => prompts.report(ProviderError::transient(message)).await,
                HelperEvent::Error { message, .. } => return Err(ProviderError::fatal(message)),
                HelperEvent::Completed { credential } => {
                    if credential.trim().is_empty() {
                        return Err(ProviderError::fatal("login helper returned an empty credential"));
                    }
                    return Ok(SecretString::from(credential));
                }
            }
        }
    }

    async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.closed_signal.notify_one();
        self.stdin.lock().await.take();
        let child = self.child.lock().await.take();
        if let Some(mut child) = child
            && let Err(e) = child.kill().await
        {
            tracing::debug!(error = %e, "Login helper already exited");
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct FixedPrompts {
        reports: Mutex<Vec<ProviderError>>,
    }

    #[async_trait]
    impl LoginPrompts for FixedPrompts {
        async fn request_code(&self) -> Result<SecretString, ProviderError> {
            Ok(SecretString::from("12345"))
        }

        async fn request_password(&self, hint: Option<String>) -> Result<SecretString, ProviderError> {
            assert_eq!(hint.as_deref(), Some("pet"));
            Ok(SecretString::from("hunter2"))
        }

        async fn report(&self, error: ProviderError) {
            self.reports.lock().await.push(error);
        }
    }

    fn params() -> LoginParams {
        LoginParams {
            session_key: "k1".to_string(),
            phone_number: "+15550100200".to_string(),
            api_id: 7,
            api_hash: SecretString::from("hash"),
        }
    }

    const HELPER: &str = r#"
echo 'starting up'
echo '{"type":"error","transient":true,"message":"migrating to DC2"}'
echo '{"type":"code_required"}'
read reply
case "$reply" in
  *'"code":"12345"'*) ;;
  *) echo '{"type":"error","transient":false,"message":"PHONE_CODE_INVALID"}'; exit 1 ;;
esac
echo '{"type":"password_required","hint":"pet"}'
read reply
case "$reply" in
  *'"password":"hunter2"'*) ;;
  *) echo '{"type":"error","message":"PASSWORD_HASH_INVALID"}'; exit 1 ;;
esac
echo "{\"type\":\"completed\",\"credential\":\"cred-$LOGINBRIDGE_LOGIN_API_ID-$LOGINBRIDGE_LOGIN_SESSION_KEY\"}"
"#;

    #[tokio::test]
    async fn helper_drives_code_and_password_exchange() {
        let connection = CommandConnector::new(HELPER)
            .connect(&params())
            .await
            .expect("spawn helper");
        let prompts = FixedPrompts::default();

        let credential = connection
            .sign_in(&params(), &prompts)
            .await
            .expect("sign in");
        assert_eq!(credential.expose_secret(), "cred-7-k1");

        let reports = prompts.reports.lock().await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_transient());
        connection.disconnect().await;
        connection.disconnect().await;
    }

    #[tokio::test]
    async fn fatal_helper_error_is_returned() {
        let connection = CommandConnector::new(
            r#"echo '{"type":"error","transient":false,"message":"PHONE_NUMBER_BANNED"}'"#,
        )
        .connect(&params())
        .await
        .expect("spawn helper");

        let err = connection
            .sign_in(&params(), &FixedPrompts::default())
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::fatal("PHONE_NUMBER_BANNED"));
    }

    #[tokio::test]
    async fn early_exit_is_fatal() {
        let connection = CommandConnector::new("exit 3")
            .connect(&params())
            .await
            .expect("spawn helper");

        let err = connection
            .sign_in(&params(), &FixedPrompts::default())
            .await
            .unwrap_err();
        assert!(!err.is_transient());
        assert!(err.reason().contains("exited"));
    }

    #[tokio::test]
    async fn disconnect_interrupts_sign_in() {
        let connection = CommandConnector::new("exec sleep 30")
            .connect(&params())
            .await
            .expect("spawn helper");

        let signing_in = {
            let connection = Arc::clone(&connection);
            tokio::spawn(async move {
                connection
                    .sign_in(&params(), &FixedPrompts::default())
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        connection.disconnect().await;

        let result = tokio::time::timeout(Duration::from_secs(5), signing_in)
            .await
            .expect("sign_in returned")
            .expect("join");
        assert_eq!(result.unwrap_err().reason(), "connection closed");
    }
}
