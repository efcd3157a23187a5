//! Session registry: capacity cap, one live session per user, TTL sweep.
//!
//! Lock order is registry map, then record. Paths holding the map's write
//! lock never wait on a record lock; the sweep only `try_lock`s records and
//! skips the ones that are busy.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

use crate::auth::activation::AgentActivator;
use crate::auth::bridge::InputKind;
use crate::auth::client::{AuthConnector, LoginParams, mask_phone};
use crate::auth::driver::LoginTask;
use crate::auth::session::{SessionRecord, SessionStatus, SessionView};
use crate::config::SessionConfig;
use crate::error::{CleanupReason, SessionError};

const MAX_SESSION_KEY_LEN: usize = 128;

/// Request to start a login.
#[derive(Debug, Default)]
pub struct StartLogin {
    pub user_id: String,
    pub phone_number: String,
    pub api_id: Option<i32>,
    pub api_hash: Option<SecretString>,
    /// Existing agent that receives the credential on completion.
    pub agent_id: Option<String>,
    /// Caller-chosen correlation key; generated when absent.
    pub session_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedSession {
    pub session_key: String,
    pub status: SessionStatus,
}

/// Application credentials applied when a start request omits them.
#[derive(Debug, Default)]
pub struct LoginDefaults {
    pub api_id: Option<i32>,
    pub api_hash: Option<SecretString>,
}

struct Entry {
    user_id: String,
    record: Arc<Mutex<SessionRecord>>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, Entry>,
    by_user: HashMap<String, String>,
    sweeper: Option<JoinHandle<()>>,
    closed: bool,
}

impl RegistryState {
    fn detach(&mut self, key: &str) -> Option<Entry> {
        let entry = self.sessions.remove(key)?;
        if self.by_user.get(&entry.user_id).is_some_and(|k| k == key) {
            self.by_user.remove(&entry.user_id);
        }
        Some(entry)
    }
}

struct ValidatedStart {
    user_id: String,
    phone_number: String,
    api_id: i32,
    api_hash: SecretString,
    agent_id: Option<String>,
    session_key: Option<String>,
}

/// Owns every live login session.
pub struct SessionRegistry {
    config: SessionConfig,
    connector: Arc<dyn AuthConnector>,
    activator: Option<Arc<dyn AgentActivator>>,
    defaults: LoginDefaults,
    state: RwLock<RegistryState>,
}

impl SessionRegistry {
    pub fn new(
        config: SessionConfig,
        connector: Arc<dyn AuthConnector>,
        activator: Option<Arc<dyn AgentActivator>>,
        defaults: LoginDefaults,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            connector,
            activator,
            defaults,
            state: RwLock::new(RegistryState::default()),
        })
    }

    /// Register a session and launch its login task.
    ///
    /// Returns as soon as the record exists; no network activity is awaited.
    /// Any live session of the same user is evicted first.
    pub async fn create(self: &Arc<Self>, request: StartLogin) -> Result<StartedSession, SessionError> {
        let start = self.validate(request)?;

        let (session_key, record, evicted) = {
            let mut state = self.state.write().await;
            if state.closed {
                return Err(SessionError::ShuttingDown);
            }
            if let Some(key) = &start.session_key
                && let Some(existing) = state.sessions.get(key)
                && existing.user_id != start.user_id
            {
                return Err(SessionError::DuplicateKey { key: key.clone() });
            }

            let evicted = state
                .by_user
                .get(&start.user_id)
                .cloned()
                .and_then(|key| state.detach(&key));

            if state.sessions.len() >= self.config.max_concurrent {
                return Err(SessionError::CapacityExceeded {
                    max: self.config.max_concurrent,
                });
            }

            let session_key = start
                .session_key
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            let record = Arc::new(Mutex::new(SessionRecord::new(
                session_key.clone(),
                start.user_id.clone(),
                start.agent_id.clone(),
            )));
            state.sessions.insert(
                session_key.clone(),
                Entry {
                    user_id: start.user_id.clone(),
                    record: Arc::clone(&record),
                },
            );
            state
                .by_user
                .insert(start.user_id.clone(), session_key.clone());
            if state.sweeper.is_none() {
                state.sweeper = Some(self.spawn_sweeper());
            }
            (session_key, record, evicted)
        };

        if let Some(entry) = evicted {
            release_entry(entry, CleanupReason::Evicted).await;
        }

        let span = tracing::info_span!(
            "login",
            session_key = %session_key,
            user_id = %start.user_id,
        );
        let task = LoginTask {
            record: Arc::clone(&record),
            params: LoginParams {
                session_key: session_key.clone(),
                phone_number: start.phone_number,
                api_id: start.api_id,
                api_hash: start.api_hash,
            },
            connector: Arc::clone(&self.connector),
            activator: self.activator.clone(),
            max_transient_restarts: self.config.max_transient_restarts,
        };
        let handle = tokio::spawn(task.run().instrument(span));
        record.lock().await.attach_task(handle);

        tracing::info!(
            session_key = %session_key,
            user_id = %start.user_id,
            agent_id = start.agent_id.as_deref().unwrap_or("-"),
            "Login session started"
        );
        Ok(StartedSession {
            session_key,
            status: SessionStatus::Connecting,
        })
    }

    /// Current state of a session. Refreshes its inactivity clock.
    pub async fn status(&self, key: &str) -> Result<SessionView, SessionError> {
        self.with_live_record(key, |record| Ok(record.view())).await
    }

    /// Deliver the one-time code. Valid only while `awaiting_code`.
    pub async fn submit_code(&self, key: &str, code: SecretString) -> Result<SessionStatus, SessionError> {
        self.submit(key, InputKind::Code, code).await
    }

    /// Deliver the two-factor password. Valid only while `awaiting_2fa`.
    pub async fn submit_password(
        &self,
        key: &str,
        password: SecretString,
    ) -> Result<SessionStatus, SessionError> {
        self.submit(key, InputKind::Password, password).await
    }

    async fn submit(
        &self,
        key: &str,
        kind: InputKind,
        value: SecretString,
    ) -> Result<SessionStatus, SessionError> {
        if value.expose_secret().trim().is_empty() {
            return Err(SessionError::InvalidRequest(format!(
                "{} must not be empty",
                kind.label()
            )));
        }
        let status = self
            .with_live_record(key, |record| record.submit(kind, value))
            .await?;
        tracing::info!(session_key = %key, input = kind.label(), "Login input submitted");
        Ok(status)
    }

    /// Run `f` against a live record while holding the map's read lock, so
    /// that an eviction or cleanup either happens entirely before or entirely
    /// after it.
    async fn with_live_record<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut SessionRecord) -> Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        let state = self.state.read().await;
        let entry = state
            .sessions
            .get(key)
            .ok_or_else(|| SessionError::NotFound {
                key: key.to_string(),
            })?;
        let mut record = entry.record.lock().await;
        if record.is_released() {
            return Err(SessionError::NotFound {
                key: key.to_string(),
            });
        }
        record.touch();
        f(&mut *record)
    }

    /// Disconnect and forget a session. Returns whether it existed; calling
    /// it again for the same key is a no-op.
    pub async fn cleanup(&self, key: &str) -> bool {
        let entry = self.state.write().await.detach(key);
        match entry {
            Some(entry) => {
                release_entry(entry, CleanupReason::Explicit).await;
                true
            }
            None => false,
        }
    }

    /// Remove every session idle for longer than the TTL.
    pub async fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let ttl = self.config.ttl;
        let expired: Vec<Entry> = {
            let mut state = self.state.write().await;
            let keys: Vec<String> = state
                .sessions
                .iter()
                .filter(|(_, entry)| {
                    entry
                        .record
                        .try_lock()
                        .is_ok_and(|record| record.idle_for(now) > ttl)
                })
                .map(|(key, _)| key.clone())
                .collect();
            keys.iter().filter_map(|key| state.detach(key)).collect()
        };

        let removed = expired.len();
        for entry in expired {
            release_entry(entry, CleanupReason::ExpiredByTtl).await;
        }
        removed
    }

    /// Stop the sweeper and clean up every live session.
    pub async fn shutdown(&self) {
        let (entries, sweeper) = {
            let mut state = self.state.write().await;
            state.closed = true;
            state.by_user.clear();
            let entries: Vec<Entry> = state.sessions.drain().map(|(_, entry)| entry).collect();
            (entries, state.sweeper.take())
        };
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        let count = entries.len();
        for entry in entries {
            release_entry(entry, CleanupReason::Shutdown).await;
        }
        tracing::info!(sessions = count, "Login session registry shut down");
    }

    /// Number of live sessions.
    pub async fn len(&self) -> usize {
        self.state.read().await.sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether the expiry sweeper is currently scheduled.
    pub async fn sweeper_active(&self) -> bool {
        self.state.read().await.sweeper.is_some()
    }

    fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        tracing::debug!(period_secs = period.as_secs(), "Starting session sweeper");
        tokio::spawn(run_sweeper(registry, period).instrument(tracing::debug_span!("session_sweeper")))
    }

    /// Clear the sweeper slot if nothing is left to sweep. Checked under the
    /// write lock so that a concurrent `create` either sees the slot cleared
    /// and starts a new sweeper, or is seen here and keeps this one alive.
    async fn park_sweeper_if_idle(&self) -> bool {
        let mut state = self.state.write().await;
        if state.sessions.is_empty() {
            state.sweeper = None;
            true
        } else {
            false
        }
    }

    fn validate(&self, request: StartLogin) -> Result<ValidatedStart, SessionError> {
        let user_id = request.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(SessionError::InvalidRequest("user_id is required".to_string()));
        }

        let phone_number = normalize_phone(&request.phone_number)?;

        let api_id = request
            .api_id
            .or(self.defaults.api_id)
            .ok_or_else(|| SessionError::InvalidRequest("api_id is required".to_string()))?;
        if api_id <= 0 {
            return Err(SessionError::InvalidRequest(
                "api_id must be a positive integer".to_string(),
            ));
        }

        let api_hash = request
            .api_hash
            .filter(|hash| !hash.expose_secret().trim().is_empty())
            .or_else(|| {
                self.defaults
                    .api_hash
                    .as_ref()
                    .map(|hash| SecretString::from(hash.expose_secret().to_string()))
            })
            .ok_or_else(|| SessionError::InvalidRequest("api_hash is required".to_string()))?;

        let session_key = request
            .session_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        if let Some(key) = &session_key {
            validate_session_key(key)?;
        }

        let agent_id = request
            .agent_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());
        if let Some(agent_id) = &agent_id
            && self.activator.is_none()
        {
            return Err(SessionError::ActivationUnavailable {
                agent_id: agent_id.clone(),
            });
        }

        tracing::debug!(
            user_id = %user_id,
            phone = %mask_phone(&phone_number),
            "Validated login request"
        );
        Ok(ValidatedStart {
            user_id,
            phone_number,
            api_id,
            api_hash,
            agent_id,
            session_key,
        })
    }
}

async fn run_sweeper(registry: Weak<SessionRegistry>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(registry) = registry.upgrade() else {
            return;
        };
        let removed = registry.sweep_expired().await;
        if removed > 0 {
            tracing::info!(removed, "Swept expired login sessions");
        }
        if registry.park_sweeper_if_idle().await {
            tracing::debug!("No live sessions, sweeper suspended");
            return;
        }
    }
}

async fn release_entry(entry: Entry, reason: CleanupReason) {
    let (connection, key, status) = {
        let mut record = entry.record.lock().await;
        (record.release(), record.key().to_string(), record.status())
    };
    if let Some(connection) = connection {
        connection.disconnect().await;
    }
    tracing::info!(
        session_key = %key,
        user_id = %entry.user_id,
        reason = %reason,
        status = %status,
        "Login session removed"
    );
}

/// Strip formatting characters and check the digit count.
fn normalize_phone(raw: &str) -> Result<String, SessionError> {
    let trimmed = raw.trim();
    let (plus, rest) = match trimmed.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", trimmed),
    };
    let mut digits = String::with_capacity(rest.len());
    for c in rest.chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => {
                return Err(SessionError::InvalidRequest(
                    "phone_number may only contain digits and separators".to_string(),
                ));
            }
        }
    }
    if !(5..=15).contains(&digits.len()) {
        return Err(SessionError::InvalidRequest(
            "phone_number must have between 5 and 15 digits".to_string(),
        ));
    }
    Ok(format!("{plus}{digits}"))
}

fn validate_session_key(key: &str) -> Result<(), SessionError> {
    if key.len() > MAX_SESSION_KEY_LEN
        || !key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(SessionError::InvalidRequest(format!(
            "session_key must be 1-{MAX_SESSION_KEY_LEN} characters of [A-Za-z0-9_-]"
        )));
    }
    Ok(())
}
