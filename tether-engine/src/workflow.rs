//! Category outcomes and the retry policy that turns them into actions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::status::ConditionStatus;

/// Machine-readable reason attached to a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reason {
    NetworkPeerNotReady,
    PrivateEndpointNotReady,
    CloudProviderIntegrationNotReady,
    AlertConfigurationNotReady,
    CustomRolesNotReady,
    TeamsNotReady,
    SecretUnavailable,
    UnsupportedOperation,
    OwnershipSnapshotInvalid,
    ProjectSpecInvalid,
    Cancelled,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Result of reconciling one category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Every declared item is in its terminal success state.
    Ready,
    /// Nothing declared and nothing left to clean up.
    NotConfigured,
    /// Work is under way remotely; check again shortly.
    InProgress { reason: Reason, message: String },
    /// Something failed and may succeed on retry.
    Failed { reason: Reason, message: String },
    /// The remote API can never perform what was asked.
    Terminal { reason: Reason, message: String },
}

impl Outcome {
    pub fn in_progress(reason: Reason, message: impl Into<String>) -> Self {
        Outcome::InProgress {
            reason,
            message: message.into(),
        }
    }

    pub fn failed(reason: Reason, message: impl Into<String>) -> Self {
        Outcome::Failed {
            reason,
            message: message.into(),
        }
    }

    pub fn terminal(reason: Reason, message: impl Into<String>) -> Self {
        Outcome::Terminal {
            reason,
            message: message.into(),
        }
    }

    pub fn condition_status(&self) -> ConditionStatus {
        match self {
            Outcome::Ready => ConditionStatus::True,
            Outcome::NotConfigured => ConditionStatus::Unset,
            Outcome::InProgress { .. } | Outcome::Failed { .. } | Outcome::Terminal { .. } => {
                ConditionStatus::False
            }
        }
    }

    pub fn reason(&self) -> Option<Reason> {
        match self {
            Outcome::Ready | Outcome::NotConfigured => None,
            Outcome::InProgress { reason, .. }
            | Outcome::Failed { reason, .. }
            | Outcome::Terminal { reason, .. } => Some(*reason),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Ready | Outcome::NotConfigured => None,
            Outcome::InProgress { message, .. }
            | Outcome::Failed { message, .. }
            | Outcome::Terminal { message, .. } => Some(message),
        }
    }

    /// Whether the category needs no further work.
    pub fn is_settled(&self) -> bool {
        matches!(self, Outcome::Ready | Outcome::NotConfigured)
    }
}

/// What the caller should do after a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Nothing pending; wait for the next change or periodic resync.
    Done,
    /// Do not retry until the declaration changes.
    NoRetry,
    /// Requeue after a fixed short delay.
    RequeueAfter(Duration),
    /// Requeue with exponential backoff.
    Backoff,
}

impl Action {
    fn rank(&self) -> u8 {
        match self {
            Action::Done => 0,
            Action::NoRetry => 1,
            Action::RequeueAfter(_) => 2,
            Action::Backoff => 3,
        }
    }

    /// The more urgent of two actions; between two delays the shorter wins.
    pub fn worst(self, other: Action) -> Action {
        match (self, other) {
            (Action::RequeueAfter(a), Action::RequeueAfter(b)) => Action::RequeueAfter(a.min(b)),
            (a, b) if b.rank() > a.rank() => b,
            (a, _) => a,
        }
    }
}

/// Maps outcomes to retry actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub in_progress_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            in_progress_delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn action(&self, outcome: &Outcome) -> Action {
        match outcome {
            Outcome::Ready | Outcome::NotConfigured => Action::Done,
            Outcome::InProgress { .. } => Action::RequeueAfter(self.in_progress_delay),
            Outcome::Failed { .. } => Action::Backoff,
            Outcome::Terminal { .. } => Action::NoRetry,
        }
    }

    /// Combined action for a whole pass: the worst of every category.
    pub fn combine<'a>(&self, outcomes: impl IntoIterator<Item = &'a Outcome>) -> Action {
        outcomes
            .into_iter()
            .map(|o| self.action(o))
            .fold(Action::Done, Action::worst)
    }
}
