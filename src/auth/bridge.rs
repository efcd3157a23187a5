//! Single-slot rendezvous between the login task and submit calls.
//!
//! The login task parks on a one-shot receiver when the network asks for
//! input; a later submit call takes the matching sender out of the slot and
//! fulfils it exactly once.

use secrecy::SecretString;
use tokio::sync::oneshot;

use crate::auth::session::SessionStatus;
use crate::error::ProviderError;

/// What the login task is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Code,
    Password,
}

impl InputKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Password => "password",
        }
    }

    /// Status a session is in while this input is outstanding.
    pub fn awaiting_status(self) -> SessionStatus {
        match self {
            Self::Code => SessionStatus::AwaitingCode,
            Self::Password => SessionStatus::Awaiting2fa,
        }
    }
}

/// Why a submitted value could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ResolveError {
    /// No prompt of this kind is outstanding.
    NotRequested,
    /// The outstanding prompt was already answered and no new one was issued.
    AlreadyAnswered,
    /// The waiting task went away before the value arrived.
    Abandoned,
}

#[derive(Debug, Default)]
pub(crate) struct InputSlot {
    pending: Option<(InputKind, oneshot::Sender<SecretString>)>,
    answered: Option<InputKind>,
}

impl InputSlot {
    /// Register a new prompt. Only one may be outstanding at a time.
    pub(crate) fn open(
        &mut self,
        kind: InputKind,
    ) -> Result<oneshot::Receiver<SecretString>, ProviderError> {
        if let Some((outstanding, _)) = &self.pending {
            return Err(ProviderError::fatal(format!(
                "{} requested while a {} prompt is still outstanding",
                kind.label(),
                outstanding.label()
            )));
        }
        let (tx, rx) = oneshot::channel();
        self.pending = Some((kind, tx));
        self.answered = None;
        Ok(rx)
    }

    /// Deliver a value to the outstanding prompt of `kind` and clear it.
    pub(crate) fn resolve(&mut self, kind: InputKind, value: SecretString) -> Result<(), ResolveError> {
        match self.pending.take() {
            Some((outstanding, tx)) if outstanding == kind => {
                self.answered = Some(kind);
                tx.send(value).map_err(|_| ResolveError::Abandoned)
            }
            Some(other) => {
                self.pending = Some(other);
                Err(ResolveError::NotRequested)
            }
            None if self.answered == Some(kind) => Err(ResolveError::AlreadyAnswered),
            None => Err(ResolveError::NotRequested),
        }
    }

    pub(crate) fn outstanding(&self) -> Option<InputKind> {
        self.pending.as_ref().map(|(kind, _)| *kind)
    }

    /// Drop any outstanding sender; the waiting task observes a closed channel.
    pub(crate) fn close(&mut self) {
        self.pending = None;
    }
}

/// Await a prompt opened with [`InputSlot::open`].
pub(crate) async fn wait_for_input(
    rx: oneshot::Receiver<SecretString>,
    kind: InputKind,
) -> Result<SecretString, ProviderError> {
    rx.await.map_err(|_| {
        ProviderError::fatal(format!(
            "session closed while waiting for the {}",
            kind.label()
        ))
    })
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[tokio::test]
    async fn resolve_unblocks_the_waiting_task_once() {
        let mut slot = InputSlot::default();
        let rx = slot.open(InputKind::Code).expect("open");
        assert_eq!(slot.outstanding(), Some(InputKind::Code));

        slot.resolve(InputKind::Code, SecretString::from("12345"))
            .expect("resolve");
        let value = wait_for_input(rx, InputKind::Code).await.expect("value");
        assert_eq!(value.expose_secret(), "12345");

        assert_eq!(slot.outstanding(), None);
        assert_eq!(
            slot.resolve(InputKind::Code, SecretString::from("12345")),
            Err(ResolveError::AlreadyAnswered)
        );
    }

    #[test]
    fn wrong_kind_leaves_the_prompt_outstanding() {
        let mut slot = InputSlot::default();
        let _rx = slot.open(InputKind::Code).expect("open");

        assert_eq!(
            slot.resolve(InputKind::Password, SecretString::from("pw")),
            Err(ResolveError::NotRequested)
        );
        assert_eq!(slot.outstanding(), Some(InputKind::Code));
    }

    #[test]
    fn only_one_prompt_may_be_outstanding() {
        let mut slot = InputSlot::default();
        let _rx = slot.open(InputKind::Code).expect("open");
        let err = slot.open(InputKind::Password).unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn closing_the_slot_fails_the_waiter() {
        let mut slot = InputSlot::default();
        let rx = slot.open(InputKind::Password).expect("open");
        slot.close();
        let err = wait_for_input(rx, InputKind::Password).await.unwrap_err();
        assert!(err.reason().contains("password"));
    }

    #[test]
    fn dropped_receiver_reports_abandoned() {
        let mut slot = InputSlot::default();
        drop(slot.open(InputKind::Code).expect("open"));
        assert_eq!(
            slot.resolve(InputKind::Code, SecretString::from("1")),
            Err(ResolveError::Abandoned)
        );
    }
}
