//! Cloud providers and per-provider network peering rules.
//!
//! Peering semantics differ by provider (which fields identify a peer,
//! which are required, how the container region is spelled). Each provider
//! implements [`PeeringProvider`] and is looked up through a
//! [`ProviderRegistry`] rather than branched on inline.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::remote::types::{Container, Peer};
use crate::spec::NetworkPeer;

/// Cloud provider hosting a sub-resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderName {
    #[default]
    Aws,
    Gcp,
    Azure,
}

impl ProviderName {
    pub const ALL: [ProviderName; 3] = [ProviderName::Aws, ProviderName::Gcp, ProviderName::Azure];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderName::Aws => "AWS",
            ProviderName::Gcp => "GCP",
            ProviderName::Azure => "AZURE",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for ProviderName {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "AWS" => Ok(ProviderName::Aws),
            "GCP" => Ok(ProviderName::Gcp),
            "AZURE" => Ok(ProviderName::Azure),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// Canonical region id: upper case with `-` replaced by `_`.
pub fn region_to_id(region: &str) -> String {
    region.replace('-', "_").to_uppercase()
}

/// Infer the provider of a remote peer from which identifying fields it has.
pub fn infer_provider(peer: &Peer) -> Option<ProviderName> {
    if !peer.aws_account_id.is_empty() {
        Some(ProviderName::Aws)
    } else if !peer.azure_subscription_id.is_empty() {
        Some(ProviderName::Azure)
    } else if !peer.gcp_project_id.is_empty() {
        Some(ProviderName::Gcp)
    } else {
        peer.provider_name
    }
}

/// A declared peer is missing a field its provider requires.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PeerValidationError {
    #[error("containerId or atlasCidrBlock must be specified")]
    MissingContainer,
    #[error("{field} is required for {provider}")]
    MissingField {
        field: &'static str,
        provider: ProviderName,
    },
}

/// Provider-specific rules for network peers.
pub trait PeeringProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Fields of a declared peer that identify it within this provider.
    fn required_fields<'a>(&self, peer: &'a NetworkPeer) -> Vec<(&'static str, &'a str)>;

    /// Identity of a declared peer.
    fn key(&self, peer: &NetworkPeer) -> String;

    /// Identity of a remote peer; equal to [`PeeringProvider::key`] when both
    /// describe the same connection.
    fn observed_key(&self, peer: &Peer) -> String;

    /// Human-readable name of the customer-side network.
    fn network_label(&self, peer: &NetworkPeer) -> String;

    /// Creation request for the provider-side container.
    fn container_request(&self, peer: &NetworkPeer) -> Container;

    /// Whether an existing container satisfies a declared peer.
    fn container_matches(&self, container: &Container, peer: &NetworkPeer) -> bool;

    /// Whether the peer needs container details reported in its status.
    fn reports_container_network(&self) -> bool {
        false
    }

    /// Reject declared peers that cannot be created.
    fn validate(&self, peer: &NetworkPeer) -> Result<(), PeerValidationError> {
        if peer.container_id.is_empty() && peer.atlas_cidr_block.is_empty() {
            return Err(PeerValidationError::MissingContainer);
        }
        for (field, value) in self.required_fields(peer) {
            if value.is_empty() {
                return Err(PeerValidationError::MissingField {
                    field,
                    provider: self.name(),
                });
            }
        }
        Ok(())
    }

    /// Creation request for the peer itself.
    fn peer_request(&self, peer: &NetworkPeer, container_id: &str) -> Peer;
}

/// Region a container should live in, falling back to the accepter region.
fn container_region(peer: &NetworkPeer) -> &str {
    if peer.container_region.is_empty() {
        &peer.accepter_region_name
    } else {
        &peer.container_region
    }
}

pub struct AwsPeering;

impl PeeringProvider for AwsPeering {
    fn name(&self) -> ProviderName {
        ProviderName::Aws
    }

    fn required_fields<'a>(&self, peer: &'a NetworkPeer) -> Vec<(&'static str, &'a str)> {
        vec![
            ("accepterRegionName", peer.accepter_region_name.as_str()),
            ("awsAccountId", peer.aws_account_id.as_str()),
            ("routeTableCidrBlock", peer.route_table_cidr_block.as_str()),
            ("vpcId", peer.vpc_id.as_str()),
        ]
    }

    fn key(&self, peer: &NetworkPeer) -> String {
        format!(
            "{}/{}/{}",
            peer.aws_account_id, peer.vpc_id, peer.route_table_cidr_block
        )
    }

    fn observed_key(&self, peer: &Peer) -> String {
        format!(
            "{}/{}/{}",
            peer.aws_account_id, peer.vpc_id, peer.route_table_cidr_block
        )
    }

    fn network_label(&self, peer: &NetworkPeer) -> String {
        peer.vpc_id.clone()
    }

    fn container_request(&self, peer: &NetworkPeer) -> Container {
        Container {
            provider_name: ProviderName::Aws,
            atlas_cidr_block: peer.atlas_cidr_block.clone(),
            region_name: region_to_id(container_region(peer)),
            ..Default::default()
        }
    }

    fn container_matches(&self, container: &Container, peer: &NetworkPeer) -> bool {
        container.atlas_cidr_block == peer.atlas_cidr_block
            && container.region_name == region_to_id(container_region(peer))
    }

    fn peer_request(&self, peer: &NetworkPeer, container_id: &str) -> Peer {
        Peer {
            container_id: container_id.to_string(),
            provider_name: Some(ProviderName::Aws),
            accepter_region_name: peer.accepter_region_name.clone(),
            aws_account_id: peer.aws_account_id.clone(),
            route_table_cidr_block: peer.route_table_cidr_block.clone(),
            vpc_id: peer.vpc_id.clone(),
            ..Default::default()
        }
    }
}

pub struct GcpPeering;

impl PeeringProvider for GcpPeering {
    fn name(&self) -> ProviderName {
        ProviderName::Gcp
    }

    fn required_fields<'a>(&self, peer: &'a NetworkPeer) -> Vec<(&'static str, &'a str)> {
        vec![
            ("gcpProjectId", peer.gcp_project_id.as_str()),
            ("networkName", peer.network_name.as_str()),
        ]
    }

    fn key(&self, peer: &NetworkPeer) -> String {
        format!("{}/{}", peer.gcp_project_id, peer.network_name)
    }

    fn observed_key(&self, peer: &Peer) -> String {
        format!("{}/{}", peer.gcp_project_id, peer.network_name)
    }

    fn network_label(&self, peer: &NetworkPeer) -> String {
        peer.network_name.clone()
    }

    fn container_request(&self, peer: &NetworkPeer) -> Container {
        Container {
            provider_name: ProviderName::Gcp,
            atlas_cidr_block: peer.atlas_cidr_block.clone(),
            ..Default::default()
        }
    }

    fn container_matches(&self, container: &Container, peer: &NetworkPeer) -> bool {
        container.atlas_cidr_block == peer.atlas_cidr_block
    }

    fn reports_container_network(&self) -> bool {
        true
    }

    fn peer_request(&self, peer: &NetworkPeer, container_id: &str) -> Peer {
        Peer {
            container_id: container_id.to_string(),
            provider_name: Some(ProviderName::Gcp),
            gcp_project_id: peer.gcp_project_id.clone(),
            network_name: peer.network_name.clone(),
            ..Default::default()
        }
    }
}

pub struct AzurePeering;

impl PeeringProvider for AzurePeering {
    fn name(&self) -> ProviderName {
        ProviderName::Azure
    }

    fn required_fields<'a>(&self, peer: &'a NetworkPeer) -> Vec<(&'static str, &'a str)> {
        vec![
            ("azureDirectoryId", peer.azure_directory_id.as_str()),
            ("azureSubscriptionId", peer.azure_subscription_id.as_str()),
            ("resourceGroupName", peer.resource_group_name.as_str()),
            ("vnetName", peer.vnet_name.as_str()),
        ]
    }

    fn key(&self, peer: &NetworkPeer) -> String {
        format!(
            "{}/{}/{}/{}",
            peer.azure_directory_id,
            peer.azure_subscription_id,
            peer.resource_group_name,
            peer.vnet_name
        )
    }

    fn observed_key(&self, peer: &Peer) -> String {
        format!(
            "{}/{}/{}/{}",
            peer.azure_directory_id,
            peer.azure_subscription_id,
            peer.resource_group_name,
            peer.vnet_name
        )
    }

    fn network_label(&self, peer: &NetworkPeer) -> String {
        peer.vnet_name.clone()
    }

    // Azure containers keep the region verbatim in `region`.
    fn container_request(&self, peer: &NetworkPeer) -> Container {
        Container {
            provider_name: ProviderName::Azure,
            atlas_cidr_block: peer.atlas_cidr_block.clone(),
            region: container_region(peer).to_string(),
            ..Default::default()
        }
    }

    fn container_matches(&self, container: &Container, peer: &NetworkPeer) -> bool {
        container.atlas_cidr_block == peer.atlas_cidr_block
            && container.region == container_region(peer)
    }

    fn reports_container_network(&self) -> bool {
        true
    }

    fn peer_request(&self, peer: &NetworkPeer, container_id: &str) -> Peer {
        Peer {
            container_id: container_id.to_string(),
            provider_name: Some(ProviderName::Azure),
            azure_directory_id: peer.azure_directory_id.clone(),
            azure_subscription_id: peer.azure_subscription_id.clone(),
            resource_group_name: peer.resource_group_name.clone(),
            vnet_name: peer.vnet_name.clone(),
            ..Default::default()
        }
    }
}

/// Lookup table of peering strategies by provider.
pub struct ProviderRegistry {
    providers: HashMap<ProviderName, Box<dyn PeeringProvider>>,
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        Self {
            providers: HashMap::new(),
        }
    }

    pub fn register(&mut self, provider: Box<dyn PeeringProvider>) {
        self.providers.insert(provider.name(), provider);
    }

    pub fn get(&self, name: ProviderName) -> Option<&dyn PeeringProvider> {
        self.providers.get(&name).map(|p| p.as_ref())
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(AwsPeering));
        registry.register(Box::new(GcpPeering));
        registry.register(Box::new(AzurePeering));
        registry
    }
}
