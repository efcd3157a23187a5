//! Interactive login orchestration.
//!
//! A [`SessionRegistry`] owns one [`session`] record per login attempt. Each
//! record is driven by a background task that holds the live connection
//! opened by an [`AuthConnector`]; when the network asks for a code or a
//! password, the task parks on the record's single-slot [`bridge`] until a
//! submit call fulfils it. Callers only ever see polled status.

mod activation;
mod bridge;
mod client;
mod command;
mod driver;
mod redact;
mod registry;
mod session;
/// Scripted connector for tests; not part of the supported API.
#[doc(hidden)]
pub mod testing;

pub use activation::{AgentActivator, HttpAgentActivator, activate_agent};
pub use bridge::InputKind;
pub use client::{AuthConnection, AuthConnector, LoginParams, LoginPrompts, mask_phone};
pub use command::CommandConnector;
pub use redact::redact_sensitive_detail;
pub use registry::{LoginDefaults, SessionRegistry, StartLogin, StartedSession};
pub use session::{SessionStatus, SessionView};
