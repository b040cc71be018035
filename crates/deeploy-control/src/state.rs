//! Typestate lifecycle of one deployment operation.
//!
//! Each create, update, scale-up or delete walks
//! `Validating → NodeSelection → Dispatching → AwaitingConfirmation` and ends
//! in one of `Confirmed`, `Delivered`, `TimedOut` or `Failed`. The state is a
//! type parameter, so an operation that was never dispatched cannot be
//! confirmed.
//!
//! ```ignore
//! let op = Operation::begin(OperationKind::Create, now);
//! let op = op.select_nodes().dispatch(nodes);
//! let done = op.deliver();
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ControlError;

/// What an operation does to a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    ScaleUp,
    Delete,
}

impl OperationKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::ScaleUp => "scale_up",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// String form of an operation's state, as stored on pending requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationPhase {
    Validating,
    NodeSelection,
    Dispatching,
    AwaitingConfirmation,
    Delivered,
    Confirmed,
    TimedOut,
    Failed,
}

impl OperationPhase {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::NodeSelection => "node_selection",
            Self::Dispatching => "dispatching",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Delivered => "delivered",
            Self::Confirmed => "confirmed",
            Self::TimedOut => "timed_out",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::Confirmed | Self::TimedOut | Self::Failed
        )
    }
}

impl fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationPhase {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "validating" => Ok(Self::Validating),
            "node_selection" => Ok(Self::NodeSelection),
            "dispatching" => Ok(Self::Dispatching),
            "awaiting_confirmation" => Ok(Self::AwaitingConfirmation),
            "delivered" => Ok(Self::Delivered),
            "confirmed" => Ok(Self::Confirmed),
            "timed_out" => Ok(Self::TimedOut),
            "failed" => Ok(Self::Failed),
            other => Err(ControlError::internal(format!(
                "unknown operation phase: {other}"
            ))),
        }
    }
}

/// Marker trait for operation states.
pub trait OperationState: private::Sealed + Send + Sync {
    fn phase() -> OperationPhase;
}

mod private {
    pub trait Sealed {}
}

macro_rules! operation_states {
    ($($(#[$doc:meta])* $name:ident => $phase:ident;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy)]
            pub struct $name;

            impl private::Sealed for $name {}

            impl OperationState for $name {
                fn phase() -> OperationPhase {
                    OperationPhase::$phase
                }
            }
        )*
    };
}

operation_states! {
    /// Request is being authenticated and paid for.
    Validating => Validating;
    /// Choosing the nodes to act on.
    NodeSelection => NodeSelection;
    /// Commands are going out to the fleet.
    Dispatching => Dispatching;
    /// Waiting for chainstore confirmations.
    AwaitingConfirmation => AwaitingConfirmation;
    /// Commands handed over; the job is not confirmable.
    Delivered => Delivered;
    /// Every expected confirmation arrived.
    Confirmed => Confirmed;
    /// Confirmations did not arrive in time.
    TimedOut => TimedOut;
    /// Rejected or aborted.
    Failed => Failed;
}

/// Bookkeeping carried through every state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationData {
    pub kind: OperationKind,
    pub started_at: DateTime<Utc>,
    pub app_id: Option<String>,
    pub job_id: Option<u64>,
    /// Nodes commands were dispatched to.
    pub nodes: Vec<String>,
    pub error: Option<String>,
}

/// An operation in state `S`.
#[derive(Debug)]
pub struct Operation<S: OperationState> {
    data: OperationData,
    _state: PhantomData<S>,
}

impl<S: OperationState> Operation<S> {
    #[must_use]
    pub const fn data(&self) -> &OperationData {
        &self.data
    }

    #[must_use]
    pub fn phase(&self) -> OperationPhase {
        S::phase()
    }

    #[must_use]
    pub fn into_data(self) -> OperationData {
        self.data
    }

    fn transition<T: OperationState>(self) -> Operation<T> {
        Operation {
            data: self.data,
            _state: PhantomData,
        }
    }

    fn transition_with<T: OperationState>(mut self, f: impl FnOnce(&mut OperationData)) -> Operation<T> {
        f(&mut self.data);
        self.transition()
    }
}

impl Operation<Validating> {
    #[must_use]
    pub fn begin(kind: OperationKind, started_at: DateTime<Utc>) -> Self {
        Self {
            data: OperationData {
                kind,
                started_at,
                app_id: None,
                job_id: None,
                nodes: Vec::new(),
                error: None,
            },
            _state: PhantomData,
        }
    }

    /// Name the deployment the operation acts on.
    #[must_use]
    pub fn target(mut self, app_id: Option<String>, job_id: Option<u64>) -> Self {
        self.data.app_id = app_id;
        self.data.job_id = job_id;
        self
    }

    #[must_use]
    pub fn select_nodes(self) -> Operation<NodeSelection> {
        self.transition()
    }

    #[must_use]
    pub fn fail(self, error: &ControlError) -> Operation<Failed> {
        self.transition_with(|data| data.error = Some(error.envelope_message()))
    }
}

impl Operation<NodeSelection> {
    #[must_use]
    pub fn dispatch(self, nodes: Vec<String>) -> Operation<Dispatching> {
        self.transition_with(|data| data.nodes = nodes)
    }

    #[must_use]
    pub fn fail(self, error: &ControlError) -> Operation<Failed> {
        self.transition_with(|data| data.error = Some(error.envelope_message()))
    }
}

impl Operation<Dispatching> {
    /// Commands went out and confirmations are expected.
    #[must_use]
    pub fn await_confirmation(self) -> Operation<AwaitingConfirmation> {
        self.transition()
    }

    /// Commands went out and nothing will confirm them.
    #[must_use]
    pub fn deliver(self) -> Operation<Delivered> {
        self.transition()
    }

    #[must_use]
    pub fn fail(self, error: &ControlError) -> Operation<Failed> {
        self.transition_with(|data| data.error = Some(error.envelope_message()))
    }
}

impl Operation<AwaitingConfirmation> {
    /// Pick an awaiting operation back up from a pending request.
    #[must_use]
    pub const fn resume(data: OperationData) -> Self {
        Self {
            data,
            _state: PhantomData,
        }
    }

    #[must_use]
    pub fn confirm(self) -> Operation<Confirmed> {
        self.transition()
    }

    #[must_use]
    pub fn time_out(self) -> Operation<TimedOut> {
        self.transition()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn begin() -> Operation<Validating> {
        Operation::begin(OperationKind::Create, Utc::now()).target(Some("app_1".into()), Some(4))
    }

    #[test]
    fn confirmable_path() {
        let op = begin();
        assert_eq!(op.phase(), OperationPhase::Validating);

        let op = op.select_nodes().dispatch(vec!["0xai_a".into()]);
        assert_eq!(op.phase(), OperationPhase::Dispatching);
        assert_eq!(op.data().nodes, vec!["0xai_a".to_owned()]);

        let awaiting = op.await_confirmation();
        let data = awaiting.into_data();
        let confirmed = Operation::resume(data).confirm();
        assert_eq!(confirmed.phase(), OperationPhase::Confirmed);
        assert_eq!(confirmed.data().job_id, Some(4));
    }

    #[test]
    fn failure_keeps_the_coded_message() {
        let failed = begin()
            .select_nodes()
            .fail(&ControlError::request("no nodes"));
        assert_eq!(failed.phase(), OperationPhase::Failed);
        assert_eq!(
            failed.data().error.as_deref(),
            Some("REQUEST1: request error: no nodes")
        );
    }

    #[test]
    fn phase_string_form() {
        let phases = [
            OperationPhase::Validating,
            OperationPhase::NodeSelection,
            OperationPhase::Dispatching,
            OperationPhase::AwaitingConfirmation,
            OperationPhase::Delivered,
            OperationPhase::Confirmed,
            OperationPhase::TimedOut,
            OperationPhase::Failed,
        ];
        for phase in phases {
            assert_eq!(phase.as_str().parse::<OperationPhase>().unwrap(), phase);
        }
        assert!("done".parse::<OperationPhase>().is_err());
        assert!(OperationPhase::TimedOut.is_terminal());
        assert!(!OperationPhase::AwaitingConfirmation.is_terminal());
    }
}
