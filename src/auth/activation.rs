//! Downstream activation of an existing agent once its login completes.

use std::error::Error as _;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use crate::auth::redact::redact_sensitive_detail;
use crate::config::DeploymentConfig;
use crate::error::ActivationError;

const MAX_ERROR_BODY_CHARS: usize = 512;

/// Deployment collaborator that receives credentials and starts agents.
#[async_trait]
pub trait AgentActivator: Send + Sync {
    async fn inject_credential(
        &self,
        agent_id: &str,
        credential: &SecretString,
    ) -> Result<(), ActivationError>;

    async fn start_agent(&self, agent_id: &str) -> Result<(), ActivationError>;
}

/// Inject the credential, then start the agent.
pub async fn activate_agent(
    activator: &dyn AgentActivator,
    agent_id: &str,
    credential: &SecretString,
) -> Result<(), ActivationError> {
    activator.inject_credential(agent_id, credential).await?;
    tracing::debug!(agent_id, "Credential injected, starting agent");
    activator.start_agent(agent_id).await?;
    tracing::info!(agent_id, "Agent activated with new login credential");
    Ok(())
}

/// [`AgentActivator`] backed by the deployment HTTP API.
pub struct HttpAgentActivator {
    client: reqwest::Client,
    base: Url,
    token: Option<SecretString>,
}

impl HttpAgentActivator {
    pub fn new(config: &DeploymentConfig) -> Result<Self, ActivationError> {
        if config.api_url.cannot_be_a_base() {
            return Err(ActivationError::InvalidConfig(format!(
                "{} cannot be used as a base URL",
                config.api_url
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ActivationError::InvalidConfig(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            client,
            base: config.api_url.clone(),
            token: config
                .api_token
                .as_ref()
                .map(|t| SecretString::from(t.expose_secret().to_string())),
        })
    }

    fn endpoint(&self, agent_id: &str, action: &str) -> Result<Url, ActivationError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ActivationError::InvalidConfig(format!("{} has no path", self.base)))?
            .pop_if_empty()
            .extend(["agents", agent_id, action]);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &'static str,
        agent_id: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<(), ActivationError> {
        let request = match &self.token {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        };

        let response = request.send().await.map_err(|e| {
            let kind = classify_transport_error(&e);
            tracing::warn!(agent_id, operation, kind, "Deployment API request failed");
            ActivationError::Unreachable {
                kind,
                reason: redact_sensitive_detail(&e.to_string()),
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
        Err(ActivationError::Rejected {
            operation,
            agent_id: agent_id.to_string(),
            status: status.as_u16(),
            body: redact_sensitive_detail(&body),
        })
    }
}

#[async_trait]
impl AgentActivator for HttpAgentActivator {
    async fn inject_credential(
        &self,
        agent_id: &str,
        credential: &SecretString,
    ) -> Result<(), ActivationError> {
        let url = self.endpoint(agent_id, "credential")?;
        let body = serde_json::json!({ "credential": credential.expose_secret() });
        self.send("credential injection", agent_id, self.client.put(url).json(&body))
            .await
    }

    async fn start_agent(&self, agent_id: &str) -> Result<(), ActivationError> {
        let url = self.endpoint(agent_id, "start")?;
        self.send("agent start", agent_id, self.client.post(url))
            .await
    }
}

fn classify_transport_error(error: &reqwest::Error) -> &'static str {
    if error.is_timeout() {
        return "timeout";
    }

    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io_error) = err.downcast_ref::<std::io::Error>() {
            return match io_error.kind() {
                std::io::ErrorKind::NotFound => "dns",
                _ => "connect",
            };
        }
        source = err.source();
    }

    let lowered = error.to_string().to_ascii_lowercase();
    if lowered.contains("dns")
        || lowered.contains("lookup")
        || lowered.contains("name or service not known")
        || lowered.contains("no such host")
    {
        "dns"
    } else {
        "connect"
    }
}
