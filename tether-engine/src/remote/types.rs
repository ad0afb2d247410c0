//! Records exchanged with the remote control-plane API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ProviderName;

/// One page of a paginated listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub total_count: usize,
}

/// 1-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page_num: usize,
    pub items_per_page: usize,
}

// ============================================================================
// Network peering
// ============================================================================

/// A peering connection as reported by the remote API.
///
/// AWS peers report progress in `status_name`, GCP and Azure in `status`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<ProviderName>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub accepter_region_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aws_account_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route_table_cidr_block: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vpc_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_state_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gcp_project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_directory_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_subscription_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_group_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vnet_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    /// Filled in from the container when the API omits it.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub atlas_cidr_block: String,
}

impl Peer {
    /// Raw state string, whichever field the provider reports it in.
    pub fn state(&self) -> &str {
        if self.status_name.is_empty() {
            &self.status
        } else {
            &self.status_name
        }
    }

    pub fn error(&self) -> &str {
        if self.error_state_name.is_empty() {
            &self.error_message
        } else {
            &self.error_state_name
        }
    }
}

/// Provider-side network container that peers attach to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub provider_name: ProviderName,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub atlas_cidr_block: String,
    /// AWS region name, e.g. `US_EAST_1`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region_name: String,
    /// Azure region, e.g. `US_EAST_2`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region: String,
    #[serde(default)]
    pub provisioned: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gcp_project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vpc_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_subscription_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vnet_name: String,
}

// ============================================================================
// Private endpoints
// ============================================================================

/// Provider-side private endpoint service for one region.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointService {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Not reported by the API; set from the listing request.
    #[serde(default)]
    pub provider_name: ProviderName,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub region_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint_service_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_link_service_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_link_service_resource_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interface_endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_endpoints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoint_group_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_attachment_names: Vec<String>,
}

impl EndpointService {
    /// Ids of every interface endpoint attached to the service.
    pub fn attached_interfaces(&self) -> Vec<String> {
        self.interface_endpoints
            .iter()
            .chain(&self.private_endpoints)
            .chain(&self.endpoint_group_names)
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceEndpoint {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Azure and GCP report progress here.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// AWS reports progress here.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub connection_status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_endpoint_ip_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint_group_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<GcpEndpointState>,
}

impl InterfaceEndpoint {
    pub fn state(&self) -> &str {
        if self.connection_status.is_empty() {
            &self.status
        } else {
            &self.connection_status
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpEndpointState {
    pub endpoint_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
}

/// Body of an interface endpoint creation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceRequest {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub private_endpoint_ip_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint_group_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gcp_project_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<GcpEndpointState>,
}

// ============================================================================
// Cloud provider access
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessRole {
    pub role_id: String,
    pub provider_name: ProviderName,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iam_assumed_role_arn: String,
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
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureUsage {
    pub feature_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feature_id: String,
}

// ============================================================================
// Custom roles
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDefinition {
    pub role_name: String,
    #[serde(default)]
    pub actions: Vec<RemoteRoleAction>,
    #[serde(default)]
    pub inherited_roles: Vec<RemoteInheritedRole>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRoleAction {
    pub action: String,
    #[serde(default)]
    pub resources: Vec<RemoteRoleResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRoleResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub db: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collection: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteInheritedRole {
    pub role: String,
    pub db: String,
}

// ============================================================================
// Alert configurations
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfig {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub event_type_name: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<AlertConfigMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<AlertThreshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_threshold: Option<AlertMetricThreshold>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<AlertNotification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfigMatcher {
    pub field_name: String,
    pub operator: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertThreshold {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub units: String,
    pub threshold: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMetricThreshold {
    pub metric_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator: String,
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub units: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
}

/// Notification as sent to and read back from the API.
///
/// Credentials are redacted by the API on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertNotification {
    pub type_name: String,
    #[serde(default)]
    pub interval_min: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sms_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email_address: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mobile_number: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub team_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datadog_region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ops_genie_region: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_token: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datadog_api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ops_genie_api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub victor_ops_api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub victor_ops_routing_key: String,
}

// ============================================================================
// Teams
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudUser {
    pub id: String,
    pub username: String,
}

/// A team assigned to a project, with the project roles it holds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectTeam {
    pub team_id: String,
    #[serde(default)]
    pub role_names: Vec<String>,
}
