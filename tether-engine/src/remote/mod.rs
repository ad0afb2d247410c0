//! Remote control-plane API.
//!
//! One trait per sub-resource category, composed into [`RemoteApi`]. The
//! engine only ever talks to these traits; [`http::HttpRemote`] speaks to the
//! real API and [`memory::MemoryRemote`] is an in-process fake.

pub mod http;
pub mod memory;
pub mod pager;
pub mod types;

use async_trait::async_trait;

use crate::error::ApiResult;
use crate::provider::ProviderName;
use types::{
    AccessRole, AlertConfig, CloudUser, Container, EndpointService, InterfaceEndpoint,
    InterfaceRequest, Page, PageRequest, Peer, ProjectTeam, RoleDefinition, Team,
};

pub use pager::{list_all, DEFAULT_PAGE_SIZE};

// ============================================================================
// Network peering
// ============================================================================

#[async_trait]
pub trait PeeringApi: Send + Sync {
    async fn list_peers(
        &self,
        project_id: &str,
        provider: ProviderName,
        page: PageRequest,
    ) -> ApiResult<Page<Peer>>;

    async fn create_peer(&self, project_id: &str, peer: &Peer) -> ApiResult<Peer>;

    async fn delete_peer(&self, project_id: &str, peer_id: &str) -> ApiResult<()>;

    async fn list_containers(
        &self,
        project_id: &str,
        provider: ProviderName,
        page: PageRequest,
    ) -> ApiResult<Page<Container>>;

    async fn get_container(&self, project_id: &str, container_id: &str) -> ApiResult<Container>;

    async fn create_container(&self, project_id: &str, container: &Container)
        -> ApiResult<Container>;

    async fn delete_container(&self, project_id: &str, container_id: &str) -> ApiResult<()>;
}

// ============================================================================
// Private endpoints
// ============================================================================

#[async_trait]
pub trait PrivateEndpointApi: Send + Sync {
    async fn list_endpoint_services(
        &self,
        project_id: &str,
        provider: ProviderName,
    ) -> ApiResult<Vec<EndpointService>>;

    async fn create_endpoint_service(
        &self,
        project_id: &str,
        provider: ProviderName,
        region: &str,
    ) -> ApiResult<EndpointService>;

    async fn delete_endpoint_service(
        &self,
        project_id: &str,
        provider: ProviderName,
        service_id: &str,
    ) -> ApiResult<()>;

    async fn create_interface_endpoint(
        &self,
        project_id: &str,
        provider: ProviderName,
        service_id: &str,
        request: &InterfaceRequest,
    ) -> ApiResult<InterfaceEndpoint>;

    async fn get_interface_endpoint(
        &self,
        project_id: &str,
        provider: ProviderName,
        service_id: &str,
        interface_id: &str,
    ) -> ApiResult<InterfaceEndpoint>;

    async fn delete_interface_endpoint(
        &self,
        project_id: &str,
        provider: ProviderName,
        service_id: &str,
        interface_id: &str,
    ) -> ApiResult<()>;
}

// ============================================================================
// Cloud provider access
// ============================================================================

#[async_trait]
pub trait CloudAccessApi: Send + Sync {
    async fn list_access_roles(&self, project_id: &str) -> ApiResult<Vec<AccessRole>>;

    async fn create_access_role(
        &self,
        project_id: &str,
        provider: ProviderName,
    ) -> ApiResult<AccessRole>;

    async fn authorize_access_role(
        &self,
        project_id: &str,
        role_id: &str,
        provider: ProviderName,
        iam_assumed_role_arn: &str,
    ) -> ApiResult<AccessRole>;

    async fn deauthorize_access_role(
        &self,
        project_id: &str,
        provider: ProviderName,
        role_id: &str,
    ) -> ApiResult<()>;
}

// ============================================================================
// Custom roles
// ============================================================================

#[async_trait]
pub trait CustomRoleApi: Send + Sync {
    async fn list_custom_roles(&self, project_id: &str) -> ApiResult<Vec<RoleDefinition>>;

    async fn create_custom_role(
        &self,
        project_id: &str,
        role: &RoleDefinition,
    ) -> ApiResult<RoleDefinition>;

    async fn update_custom_role(
        &self,
        project_id: &str,
        role: &RoleDefinition,
    ) -> ApiResult<RoleDefinition>;

    async fn delete_custom_role(&self, project_id: &str, role_name: &str) -> ApiResult<()>;
}

// ============================================================================
// Alert configurations
// ============================================================================

#[async_trait]
pub trait AlertConfigApi: Send + Sync {
    async fn list_alert_configs(
        &self,
        project_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<AlertConfig>>;

    async fn create_alert_config(
        &self,
        project_id: &str,
        config: &AlertConfig,
    ) -> ApiResult<AlertConfig>;

    async fn update_alert_config(
        &self,
        project_id: &str,
        config_id: &str,
        config: &AlertConfig,
    ) -> ApiResult<AlertConfig>;

    async fn delete_alert_config(&self, project_id: &str, config_id: &str) -> ApiResult<()>;
}

// ============================================================================
// Teams
// ============================================================================

#[async_trait]
pub trait TeamApi: Send + Sync {
    async fn get_team_by_name(&self, org_id: &str, name: &str) -> ApiResult<Team>;

    async fn create_team(&self, org_id: &str, name: &str) -> ApiResult<Team>;

    async fn list_team_users(
        &self,
        org_id: &str,
        team_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<CloudUser>>;

    async fn get_user_by_name(&self, username: &str) -> ApiResult<CloudUser>;

    async fn add_team_users(&self, org_id: &str, team_id: &str, user_ids: &[String])
        -> ApiResult<()>;

    async fn remove_team_user(&self, org_id: &str, team_id: &str, user_id: &str)
        -> ApiResult<()>;

    async fn list_project_teams(
        &self,
        project_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<ProjectTeam>>;

    async fn assign_project_teams(&self, project_id: &str, teams: &[ProjectTeam]) -> ApiResult<()>;

    async fn unassign_project_team(&self, project_id: &str, team_id: &str) -> ApiResult<()>;
}

/// The whole remote API surface.
pub trait RemoteApi:
    PeeringApi + PrivateEndpointApi + CloudAccessApi + CustomRoleApi + AlertConfigApi + TeamApi
{
}

impl<T> RemoteApi for T where
    T: PeeringApi + PrivateEndpointApi + CloudAccessApi + CustomRoleApi + AlertConfigApi + TeamApi
{
}
