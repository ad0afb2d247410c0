//! Declared (desired) sub-resources of a managed project.
//!
//! Every type here serializes to the camelCase JSON stored in the project
//! document and, verbatim, in the ownership snapshot annotation.

use serde::{Deserialize, Serialize};

use crate::provider::ProviderName;

/// Desired state of a managed project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSpec {
    /// Remote project (group) id.
    #[serde(default)]
    pub project_id: String,
    /// Organization owning the project; required when teams are declared.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub organization_id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_peers: Vec<NetworkPeer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub private_endpoints: Vec<PrivateEndpoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cloud_provider_integrations: Vec<CloudProviderIntegration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_roles: Vec<CustomRole>,
    /// Alert configurations are only reconciled when this is set.
    #[serde(default)]
    pub alert_configuration_sync_enabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alert_configurations: Vec<AlertConfiguration>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub teams: Vec<TeamMembership>,
}

// ============================================================================
// Network peering
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPeer {
    /// Defaults to AWS when omitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<ProviderName>,
    /// Existing container to attach to. A container is created when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_id: String,
    /// CIDR of the provider-side container.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub atlas_cidr_block: String,
    /// Region of the container.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub container_region: String,

    // AWS
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub accepter_region_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub aws_account_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub route_table_cidr_block: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vpc_id: String,

    // GCP
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gcp_project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_name: String,

    // Azure
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_directory_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub azure_subscription_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_group_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vnet_name: String,
}

impl NetworkPeer {
    pub fn provider(&self) -> ProviderName {
        self.provider_name.unwrap_or(ProviderName::Aws)
    }
}

// ============================================================================
// Private endpoints
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivateEndpoint {
    pub provider: ProviderName,
    pub region: String,
    /// AWS interface endpoint id or Azure private endpoint resource id.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Azure private endpoint IP address.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub gcp_project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub endpoint_group_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<GcpEndpoint>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcpEndpoint {
    pub endpoint_name: String,
    pub ip_address: String,
}

impl PrivateEndpoint {
    /// Whether the user has supplied enough to attach an interface endpoint.
    pub fn is_configured(&self) -> bool {
        match self.provider {
            ProviderName::Aws => !self.id.is_empty(),
            ProviderName::Azure => !self.id.is_empty() && !self.ip.is_empty(),
            ProviderName::Gcp => {
                !self.gcp_project_id.is_empty()
                    && !self.endpoint_group_name.is_empty()
                    && !self.endpoints.is_empty()
            }
        }
    }

    /// Id of the interface endpoint this entry describes.
    pub fn interface_id(&self) -> &str {
        match self.provider {
            ProviderName::Gcp => &self.endpoint_group_name,
            _ => &self.id,
        }
    }
}

// ============================================================================
// Cloud provider integrations
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloudProviderIntegration {
    pub provider_name: ProviderName,
    /// Left empty until the customer has created the role on their side.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub iam_assumed_role_arn: String,
}

// ============================================================================
// Custom roles
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomRole {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inherited_roles: Vec<InheritedRole>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<RoleAction>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InheritedRole {
    pub name: String,
    pub database: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAction {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<RoleResource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub database: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub collection: String,
}

// ============================================================================
// Alert configurations
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertConfiguration {
    #[serde(default)]
    pub enabled: bool,
    pub event_type_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<AlertMatcher>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<Threshold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_threshold: Option<MetricThreshold>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMatcher {
    pub field_name: String,
    pub operator: String,
    pub value: String,
}

/// Threshold with the value kept as a decimal string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Threshold {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub units: String,
    pub threshold: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricThreshold {
    pub metric_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operator: String,
    pub threshold: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub units: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub mode: String,
}

/// Reference to a secret holding a credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    pub name: String,
    /// Defaults to the project's namespace when empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
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

    // Credentials, either inline or read from a referenced secret.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token_ref: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub datadog_api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datadog_api_key_ref: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ops_genie_api_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ops_genie_api_key_ref: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_key_ref: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub victor_ops_api_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub victor_ops_routing_key: String,
    /// Secret holding both `VictorOpsAPIKey` and `VictorOpsRoutingKey`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub victor_ops_secret_ref: Option<SecretRef>,
}

impl Notification {
    /// Whether any credential is sent with this notification.
    pub fn has_credentials(&self) -> bool {
        !self.api_token.is_empty()
            || !self.datadog_api_key.is_empty()
            || !self.ops_genie_api_key.is_empty()
            || !self.service_key.is_empty()
            || !self.victor_ops_api_key.is_empty()
            || !self.victor_ops_routing_key.is_empty()
            || self.api_token_ref.is_some()
            || self.datadog_api_key_ref.is_some()
            || self.ops_genie_api_key_ref.is_some()
            || self.service_key_ref.is_some()
            || self.victor_ops_secret_ref.is_some()
    }
}

impl AlertConfiguration {
    pub fn has_credentials(&self) -> bool {
        self.notifications.iter().any(Notification::has_credentials)
    }
}

// ============================================================================
// Teams
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMembership {
    pub team_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub usernames: Vec<String>,
    /// Project roles granted to the team. A team without roles is not
    /// assigned to the project.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_provider_defaults_to_aws() {
        let peer: NetworkPeer = serde_json::from_str(r#"{"vpcId":"vpc-1"}"#).unwrap();
        assert_eq!(peer.provider(), ProviderName::Aws);
    }

    #[test]
    fn test_empty_fields_are_omitted() {
        let spec = ProjectSpec {
            project_id: "p1".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, r#"{"projectId":"p1","alertConfigurationSyncEnabled":false}"#);
    }

    #[test]
    fn test_private_endpoint_configuration() {
        let mut pe = PrivateEndpoint {
            provider: ProviderName::Azure,
            region: "eastus".to_string(),
            id: "/subscriptions/x/pe".to_string(),
            ..Default::default()
        };
        assert!(!pe.is_configured());
        pe.ip = "10.0.0.4".to_string();
        assert!(pe.is_configured());

        let gcp = PrivateEndpoint {
            provider: ProviderName::Gcp,
            region: "europe-west1".to_string(),
            gcp_project_id: "customer".to_string(),
            endpoint_group_name: "group".to_string(),
            ..Default::default()
        };
        assert!(!gcp.is_configured());
        assert_eq!(gcp.interface_id(), "group");
    }

    #[test]
    fn test_notification_credentials() {
        let mut n = Notification {
            type_name: "EMAIL".to_string(),
            ..Default::default()
        };
        assert!(!n.has_credentials());
        n.service_key_ref = Some(SecretRef {
            name: "pd".to_string(),
            namespace: String::new(),
        });
        assert!(n.has_credentials());
    }
}
