//! Remote lifecycle states and per-category item phases.
//!
//! Each category has its own phase enum with an explicit transition table.
//! Phases are what the project status records for each item; the generic
//! [`Progress`] view of a phase is what the aggregator counts.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state reported by the remote API, normalised across resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    Available,
    Failed,
    Deleting,
    /// Any other state, kept verbatim.
    Pending(String),
}

impl RemoteState {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "AVAILABLE" | "ACTIVE" | "READY" => RemoteState::Available,
            "FAILED" | "REJECTED" | "ERROR" => RemoteState::Failed,
            "DELETING" | "TERMINATING" | "DELETED" => RemoteState::Deleting,
            _ => RemoteState::Pending(raw.to_string()),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, RemoteState::Available)
    }

    pub fn is_deleting(&self) -> bool {
        matches!(self, RemoteState::Deleting)
    }
}

impl fmt::Display for RemoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteState::Available => f.write_str("AVAILABLE"),
            RemoteState::Failed => f.write_str("FAILED"),
            RemoteState::Deleting => f.write_str("DELETING"),
            RemoteState::Pending(raw) if raw.is_empty() => f.write_str("PENDING"),
            RemoteState::Pending(raw) => f.write_str(raw),
        }
    }
}

/// Generic progress of one item, as counted by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Succeeded,
    Pending,
    Failed,
}

/// Something that happened to an item during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// The parent resource (container, endpoint service) is usable.
    ParentReady,
    /// The item was created remotely.
    Created,
    /// An interface endpoint was attached.
    Attached,
    /// The item was authorized.
    Authorized,
    /// The item was updated in place or needed no change.
    Synced,
    /// The remote API reported a state for the item.
    Observed(RemoteState),
    /// An operation on the item failed.
    Error,
}

// ============================================================================
// Network peering
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerPhase {
    #[default]
    New,
    ContainerReady,
    Created,
    Available,
    Deleting,
    Failed,
}

impl PeerPhase {
    pub fn next(self, step: &Step) -> Self {
        use PeerPhase::*;
        match (self, step) {
            (_, Step::Error) => Failed,
            (New, Step::ParentReady) => ContainerReady,
            (New | ContainerReady, Step::Created) => Created,
            (_, Step::Observed(RemoteState::Available)) => Available,
            (_, Step::Observed(RemoteState::Failed)) => Failed,
            (_, Step::Observed(RemoteState::Deleting)) => Deleting,
            (_, Step::Observed(RemoteState::Pending(_))) => Created,
            (phase, _) => phase,
        }
    }

    pub fn progress(self) -> Progress {
        match self {
            PeerPhase::Available => Progress::Succeeded,
            PeerPhase::Failed => Progress::Failed,
            PeerPhase::New | PeerPhase::ContainerReady | PeerPhase::Created | PeerPhase::Deleting => {
                Progress::Pending
            }
        }
    }
}

// ============================================================================
// Private endpoints
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointPhase {
    #[default]
    New,
    /// Endpoint service requested, not yet available.
    ServiceCreating,
    /// Service available; the entry carries no interface details yet.
    AwaitingConfiguration,
    /// Interface endpoint requested, not yet available.
    InterfaceCreating,
    Available,
    Failed,
}

impl EndpointPhase {
    pub fn next(self, step: &Step) -> Self {
        use EndpointPhase::*;
        match (self, step) {
            (_, Step::Error) => Failed,
            (New, Step::Created) => ServiceCreating,
            (New | ServiceCreating, Step::ParentReady) => AwaitingConfiguration,
            (New | ServiceCreating | AwaitingConfiguration, Step::Attached) => InterfaceCreating,
            (_, Step::Observed(RemoteState::Failed)) => Failed,
            (InterfaceCreating | Available, Step::Observed(RemoteState::Available)) => Available,
            (InterfaceCreating | Available, Step::Observed(_)) => InterfaceCreating,
            (phase, _) => phase,
        }
    }

    /// An available service whose entry carries no interface details counts
    /// as succeeded: there is nothing more to do until the user supplies them.
    pub fn progress(self) -> Progress {
        match self {
            EndpointPhase::Available | EndpointPhase::AwaitingConfiguration => Progress::Succeeded,
            EndpointPhase::Failed => Progress::Failed,
            EndpointPhase::New | EndpointPhase::ServiceCreating | EndpointPhase::InterfaceCreating => {
                Progress::Pending
            }
        }
    }
}

// ============================================================================
// Cloud provider access roles
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessRolePhase {
    #[default]
    New,
    Created,
    Authorized,
    FailedToCreate,
    FailedToAuthorize,
}

impl AccessRolePhase {
    pub fn next(self, step: &Step) -> Self {
        use AccessRolePhase::*;
        match (self, step) {
            (New, Step::Error) => FailedToCreate,
            (_, Step::Error) => FailedToAuthorize,
            (New, Step::Created) => Created,
            (New | Created | FailedToAuthorize, Step::Authorized) => Authorized,
            (phase, _) => phase,
        }
    }

    pub fn progress(self) -> Progress {
        match self {
            AccessRolePhase::Authorized => Progress::Succeeded,
            AccessRolePhase::FailedToCreate | AccessRolePhase::FailedToAuthorize => Progress::Failed,
            AccessRolePhase::New | AccessRolePhase::Created => Progress::Pending,
        }
    }
}

// ============================================================================
// Synchronous categories: custom roles, alert configurations, teams
// ============================================================================

/// Phase for items whose remote operations complete synchronously.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    #[default]
    New,
    Synced,
    Failed,
}

impl SyncPhase {
    pub fn next(self, step: &Step) -> Self {
        use SyncPhase::*;
        match (self, step) {
            (_, Step::Error) => Failed,
            (_, Step::Observed(RemoteState::Failed)) => Failed,
            (New | Synced, Step::Created | Step::Synced | Step::Observed(_)) => Synced,
            (phase, _) => phase,
        }
    }

    pub fn progress(self) -> Progress {
        match self {
            SyncPhase::Synced => Progress::Succeeded,
            SyncPhase::Failed => Progress::Failed,
            SyncPhase::New => Progress::Pending,
        }
    }
}
