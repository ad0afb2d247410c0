//! Observed status recorded on a managed project.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderName;
use crate::remote::types::FeatureUsage;
use crate::state::{AccessRolePhase, EndpointPhase, PeerPhase, Progress, SyncPhase};
use crate::workflow::{Outcome, Reason};

/// One condition per category, plus the project-wide `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConditionType {
    Ready,
    PrivateEndpointReady,
    CloudProviderIntegrationReady,
    NetworkPeerReady,
    AlertConfigurationReady,
    CustomRolesReady,
    TeamsReady,
}

/// Tri-state condition value. `Unset` is never persisted: setting it
/// removes the condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unset,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Reason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: DateTime<Utc>,
}

/// Status view shared by every per-item status type.
pub trait ItemStatus {
    /// Stable human-readable identity used in messages.
    fn identity(&self) -> String;
    fn progress(&self) -> Progress;
    fn error_message(&self) -> Option<&str>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_peers: Vec<NetworkPeerStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_endpoints: Vec<PrivateEndpointStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cloud_provider_integrations: Vec<CloudProviderIntegrationStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_roles: Vec<CustomRoleStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alert_configurations: Vec<AlertConfigurationStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<TeamStatus>,
}

impl ProjectStatus {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Set a condition; the transition time only moves when the value does.
    pub fn set_condition(
        &mut self,
        type_: ConditionType,
        status: ConditionStatus,
        reason: Option<Reason>,
        message: Option<String>,
        now: DateTime<Utc>,
    ) {
        if status == ConditionStatus::Unset {
            self.conditions.retain(|c| c.type_ != type_);
            return;
        }
        match self.conditions.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = now;
                }
                existing.status = status;
                existing.reason = reason;
                existing.message = message;
            }
            None => self.conditions.push(Condition {
                type_,
                status,
                reason,
                message,
                last_transition_time: now,
            }),
        }
    }

    pub fn apply_outcome(&mut self, type_: ConditionType, outcome: &Outcome, now: DateTime<Utc>) {
        self.set_condition(
            type_,
            outcome.condition_status(),
            outcome.reason(),
            outcome.message().map(str::to_string),
            now,
        );
    }
}

// ============================================================================
// Per-item statuses
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPeerStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub provider_name: ProviderName,
    /// VPC, network or VNet name on the customer side.
    pub network: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_state: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub atlas_gcp_project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub atlas_network_name: String,
    pub phase: PeerPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ItemStatus for NetworkPeerStatus {
    fn identity(&self) -> String {
        format!("{} peer {}", self.provider_name, self.network)
    }

    fn progress(&self) -> Progress {
        self.phase.progress()
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpEndpointStatus {
    pub endpoint_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateEndpointStatus {
    /// Endpoint service id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub provider: ProviderName,
    pub region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_resource_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub interface_endpoint_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_attachment_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<GcpEndpointStatus>,
    pub phase: EndpointPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ItemStatus for PrivateEndpointStatus {
    fn identity(&self) -> String {
        if self.interface_endpoint_id.is_empty() {
            format!("{} endpoint service in {}", self.provider, self.region)
        } else {
            format!(
                "{} endpoint {} in {}",
                self.provider, self.interface_endpoint_id, self.region
            )
        }
    }

    fn progress(&self) -> Progress {
        self.phase.progress()
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudProviderIntegrationStatus {
    pub provider_name: ProviderName,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iam_assumed_role_arn: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub atlas_aws_account_arn: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub atlas_assumed_role_external_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorized_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub feature_usages: Vec<FeatureUsage>,
    pub phase: AccessRolePhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ItemStatus for CloudProviderIntegrationStatus {
    fn identity(&self) -> String {
        if !self.iam_assumed_role_arn.is_empty() {
            format!("{} role {}", self.provider_name, self.iam_assumed_role_arn)
        } else if !self.role_id.is_empty() {
            format!("{} role {}", self.provider_name, self.role_id)
        } else {
            format!("new {} role", self.provider_name)
        }
    }

    fn progress(&self) -> Progress {
        self.phase.progress()
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRoleStatus {
    pub name: String,
    pub phase: SyncPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ItemStatus for CustomRoleStatus {
    fn identity(&self) -> String {
        format!("role {}", self.name)
    }

    fn progress(&self) -> Progress {
        self.phase.progress()
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfigurationStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub event_type_name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    pub phase: SyncPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ItemStatus for AlertConfigurationStatus {
    fn identity(&self) -> String {
        if self.id.is_empty() {
            format!("alert {}", self.event_type_name)
        } else {
            format!("alert {} ({})", self.event_type_name, self.id)
        }
    }

    fn progress(&self) -> Progress {
        self.phase.progress()
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamStatus {
    pub team_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub team_id: String,
    #[serde(default)]
    pub members: usize,
    /// Project roles the team holds once assigned.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    pub phase: SyncPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ItemStatus for TeamStatus {
    fn identity(&self) -> String {
        format!("team {}", self.team_name)
    }

    fn progress(&self) -> Progress {
        self.phase.progress()
    }

    fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}
