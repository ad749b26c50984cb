//! Connection lifecycle: `UNDEPLOYED -> DEPLOYED <-> RUNNING <-> STOPPED`,
//! with `DELETED` terminal.
//!
//! The machine is a pure function of `(state, control)`. Persisting the
//! outcome, and serializing writers, is the job of the connection service.

use common::api::{ConnectionControl, ConnectionState};

/// How an accepted verb affects the stored connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// Moves the lifecycle forward (or rewrites the definition in place) and
    /// bumps the stored version.
    Advance,
    /// Re-issues the verb whose target equals the current state. The command
    /// goes out again, persisted state stays as it is.
    Redispatch,
    /// PUSH/PULL: asks the gateway for information, no lifecycle effect.
    Probe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub control: ConnectionControl,
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub kind: TransitionKind,
    /// UPDATE on a running connection restarts the collection session.
    pub restart_session: bool,
}

impl Transition {
    pub fn changes_state(&self) -> bool {
        self.from != self.to
    }

    /// Whether the submitted definition replaces the stored one.
    pub fn replaces_definition(&self) -> bool {
        self.kind == TransitionKind::Advance
            && matches!(
                self.control,
                ConnectionControl::Deploy | ConnectionControl::Start | ConnectionControl::Update
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{control} is not allowed while the connection is {state}")]
pub struct TransitionError {
    pub control: ConnectionControl,
    pub state: ConnectionState,
}

pub fn transition(
    state: ConnectionState,
    control: ConnectionControl,
) -> Result<Transition, TransitionError> {
    use ConnectionControl as C;
    use ConnectionState as S;
    use TransitionKind::*;

    let (to, kind) = match (state, control) {
        (S::Undeployed, C::Deploy) => (S::Deployed, Advance),
        (S::Deployed, C::Deploy) => (S::Deployed, Redispatch),

        (S::Deployed | S::Stopped, C::Start) => (S::Running, Advance),
        (S::Running, C::Start) => (S::Running, Redispatch),

        (S::Running, C::Stop) => (S::Stopped, Advance),
        (S::Stopped, C::Stop) => (S::Stopped, Redispatch),

        (S::Deployed | S::Running | S::Stopped, C::Update) => (state, Advance),

        (S::Running | S::Stopped, C::Push | C::Pull) => (state, Probe),

        (S::Deployed | S::Running | S::Stopped, C::Delete) => (S::Deleted, Advance),

        _ => return Err(TransitionError { control, state }),
    };

    Ok(Transition {
        control,
        from: state,
        to,
        kind,
        restart_session: control == C::Update && state == S::Running,
    })
}
