//! In-process fake of the remote API.
//!
//! Keeps all remote state in memory, records every call, and lets callers
//! inject failures per operation (optionally per resource key). Newly
//! created asynchronous resources start in a configurable provisioning
//! state so convergence over several passes can be exercised.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use super::types::{
    AccessRole, AlertConfig, CloudUser, Container, EndpointService, GcpEndpointState,
    InterfaceEndpoint, InterfaceRequest, Page, PageRequest, Peer, ProjectTeam, RoleDefinition, Team,
};
use super::{AlertConfigApi, CloudAccessApi, CustomRoleApi, PeeringApi, PrivateEndpointApi, TeamApi};
use crate::error::{ApiError, ApiResult};
use crate::provider::{region_to_id, ProviderName};

/// Remote operations, for fault injection and call inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    ListPeers,
    CreatePeer,
    DeletePeer,
    ListContainers,
    GetContainer,
    CreateContainer,
    DeleteContainer,
    ListEndpointServices,
    CreateEndpointService,
    DeleteEndpointService,
    CreateInterface,
    GetInterface,
    DeleteInterface,
    ListAccessRoles,
    CreateAccessRole,
    AuthorizeAccessRole,
    DeauthorizeAccessRole,
    ListCustomRoles,
    CreateCustomRole,
    UpdateCustomRole,
    DeleteCustomRole,
    ListAlertConfigs,
    CreateAlertConfig,
    UpdateAlertConfig,
    DeleteAlertConfig,
    GetTeam,
    CreateTeam,
    ListTeamUsers,
    GetUser,
    AddTeamUsers,
    RemoveTeamUser,
    ListProjectTeams,
    AssignProjectTeams,
    UnassignProjectTeam,
}

#[derive(Debug, Clone)]
struct Fault {
    op: Op,
    key: Option<String>,
    error: ApiError,
}

#[derive(Debug, Default)]
struct ProjectState {
    peers: Vec<Peer>,
    containers: Vec<Container>,
    services: Vec<EndpointService>,
    interfaces: HashMap<String, Vec<InterfaceEndpoint>>,
    access_roles: Vec<AccessRole>,
    custom_roles: Vec<RoleDefinition>,
    alert_configs: Vec<AlertConfig>,
    teams: Vec<ProjectTeam>,
}

#[derive(Debug)]
struct State {
    projects: HashMap<String, ProjectState>,
    teams: HashMap<String, Vec<Team>>,
    team_users: HashMap<String, Vec<CloudUser>>,
    users: Vec<CloudUser>,
    faults: Vec<Fault>,
    calls: Vec<(Op, String)>,
    next_id: u64,
    provisioning_state: String,
}

impl State {
    fn new_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:024x}", self.next_id)
    }

    fn project(&mut self, project_id: &str) -> &mut ProjectState {
        self.projects.entry(project_id.to_string()).or_default()
    }

    /// Record a call and fail it if a matching fault is registered.
    fn check(&mut self, op: Op, key: &str) -> ApiResult<()> {
        self.calls.push((op, key.to_string()));
        match self
            .faults
            .iter()
            .find(|f| f.op == op && f.key.as_deref().map_or(true, |k| k == key))
        {
            Some(fault) => Err(fault.error.clone()),
            None => Ok(()),
        }
    }
}

fn paginate<T: Clone>(items: &[T], page: PageRequest) -> Page<T> {
    let start = page.page_num.saturating_sub(1) * page.items_per_page;
    let results = items
        .iter()
        .skip(start)
        .take(page.items_per_page)
        .cloned()
        .collect();
    Page {
        results,
        total_count: items.len(),
    }
}

fn redact(value: &mut String) {
    if !value.is_empty() {
        *value = "****".to_string();
    }
}

fn redacted(mut config: AlertConfig) -> AlertConfig {
    for n in &mut config.notifications {
        redact(&mut n.api_token);
        redact(&mut n.datadog_api_key);
        redact(&mut n.ops_genie_api_key);
        redact(&mut n.service_key);
        redact(&mut n.victor_ops_api_key);
        redact(&mut n.victor_ops_routing_key);
    }
    config
}

pub struct MemoryRemote {
    state: Mutex<State>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                projects: HashMap::new(),
                teams: HashMap::new(),
                team_users: HashMap::new(),
                users: Vec::new(),
                faults: Vec::new(),
                calls: Vec::new(),
                next_id: 0,
                provisioning_state: "AVAILABLE".to_string(),
            }),
        }
    }

    /// State given to newly created peers, endpoint services and interfaces.
    pub async fn set_provisioning_state(&self, state: &str) {
        self.state.lock().await.provisioning_state = state.to_string();
    }

    /// Fail every call to `op` (restricted to `key` when given).
    pub async fn fail(&self, op: Op, key: Option<&str>, error: ApiError) {
        self.state.lock().await.faults.push(Fault {
            op,
            key: key.map(str::to_string),
            error,
        });
    }

    pub async fn clear_faults(&self) {
        self.state.lock().await.faults.clear();
    }

    /// Keys of every recorded call to `op`, in call order.
    pub async fn calls(&self, op: Op) -> Vec<String> {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Number of recorded mutating calls.
    pub async fn mutation_count(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|(op, _)| {
                !matches!(
                    op,
                    Op::ListPeers
                        | Op::ListContainers
                        | Op::GetContainer
                        | Op::ListEndpointServices
                        | Op::GetInterface
                        | Op::ListAccessRoles
                        | Op::ListCustomRoles
                        | Op::ListAlertConfigs
                        | Op::GetTeam
                        | Op::ListTeamUsers
                        | Op::GetUser
                        | Op::ListProjectTeams
                )
            })
            .count()
    }

    pub async fn reset_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    // ------------------------------------------------------------------------
    // Seeding and inspection
    // ------------------------------------------------------------------------

    pub async fn insert_peer(&self, project_id: &str, mut peer: Peer) -> Peer {
        let mut state = self.state.lock().await;
        if peer.id.is_empty() {
            peer.id = state.new_id();
        }
        state.project(project_id).peers.push(peer.clone());
        peer
    }

    pub async fn insert_container(&self, project_id: &str, mut container: Container) -> Container {
        let mut state = self.state.lock().await;
        if container.id.is_empty() {
            container.id = state.new_id();
        }
        state.project(project_id).containers.push(container.clone());
        container
    }

    pub async fn insert_endpoint_service(
        &self,
        project_id: &str,
        mut service: EndpointService,
    ) -> EndpointService {
        let mut state = self.state.lock().await;
        if service.id.is_empty() {
            service.id = state.new_id();
        }
        state.project(project_id).services.push(service.clone());
        service
    }

    pub async fn insert_access_role(&self, project_id: &str, mut role: AccessRole) -> AccessRole {
        let mut state = self.state.lock().await;
        if role.role_id.is_empty() {
            role.role_id = state.new_id();
        }
        state.project(project_id).access_roles.push(role.clone());
        role
    }

    pub async fn insert_custom_role(&self, project_id: &str, role: RoleDefinition) {
        self.state
            .lock()
            .await
            .project(project_id)
            .custom_roles
            .push(role);
    }

    pub async fn insert_alert_config(&self, project_id: &str, mut config: AlertConfig) -> AlertConfig {
        let mut state = self.state.lock().await;
        if config.id.is_empty() {
            config.id = state.new_id();
        }
        state.project(project_id).alert_configs.push(config.clone());
        config
    }

    pub async fn insert_user(&self, username: &str) -> CloudUser {
        let mut state = self.state.lock().await;
        let user = CloudUser {
            id: state.new_id(),
            username: username.to_string(),
        };
        state.users.push(user.clone());
        user
    }

    pub async fn insert_team(&self, org_id: &str, name: &str, members: &[&str]) -> Team {
        let mut state = self.state.lock().await;
        let team = Team {
            id: state.new_id(),
            name: name.to_string(),
        };
        let users: Vec<CloudUser> = members
            .iter()
            .filter_map(|m| state.users.iter().find(|u| u.username == *m).cloned())
            .collect();
        state.team_users.insert(team.id.clone(), users);
        state
            .teams
            .entry(org_id.to_string())
            .or_default()
            .push(team.clone());
        team
    }

    pub async fn assign_team(&self, project_id: &str, team_id: &str, roles: &[&str]) {
        self.state
            .lock()
            .await
            .project(project_id)
            .teams
            .push(ProjectTeam {
                team_id: team_id.to_string(),
                role_names: roles.iter().map(|r| r.to_string()).collect(),
            });
    }

    pub async fn peers(&self, project_id: &str) -> Vec<Peer> {
        self.state.lock().await.project(project_id).peers.clone()
    }

    pub async fn containers(&self, project_id: &str) -> Vec<Container> {
        self.state.lock().await.project(project_id).containers.clone()
    }

    pub async fn endpoint_services(&self, project_id: &str) -> Vec<EndpointService> {
        self.state.lock().await.project(project_id).services.clone()
    }

    pub async fn interface_endpoints(&self, project_id: &str, service_id: &str) -> Vec<InterfaceEndpoint> {
        self.state
            .lock()
            .await
            .project(project_id)
            .interfaces
            .get(service_id)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn access_roles(&self, project_id: &str) -> Vec<AccessRole> {
        self.state.lock().await.project(project_id).access_roles.clone()
    }

    pub async fn custom_roles(&self, project_id: &str) -> Vec<RoleDefinition> {
        self.state.lock().await.project(project_id).custom_roles.clone()
    }

    /// Stored alert configurations, credentials included.
    pub async fn alert_configs(&self, project_id: &str) -> Vec<AlertConfig> {
        self.state.lock().await.project(project_id).alert_configs.clone()
    }

    /// Usernames of a team's members, sorted.
    pub async fn team_members(&self, org_id: &str, team_name: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let Some(team) = state
            .teams
            .get(org_id)
            .and_then(|teams| teams.iter().find(|t| t.name == team_name))
        else {
            return Vec::new();
        };
        let mut names: Vec<String> = state
            .team_users
            .get(&team.id)
            .map(|users| users.iter().map(|u| u.username.clone()).collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Project roles held by the named team, sorted; `None` when the team is
    /// not assigned to the project.
    pub async fn project_team_roles(
        &self,
        org_id: &str,
        project_id: &str,
        team_name: &str,
    ) -> Option<Vec<String>> {
        let mut state = self.state.lock().await;
        let team_id = state
            .teams
            .get(org_id)
            .and_then(|teams| teams.iter().find(|t| t.name == team_name))?
            .id
            .clone();
        let assigned = state
            .project(project_id)
            .teams
            .iter()
            .find(|t| t.team_id == team_id)?;
        let mut roles = assigned.role_names.clone();
        roles.sort();
        Some(roles)
    }

    pub async fn set_peer_state(&self, project_id: &str, peer_id: &str, status: &str) {
        let mut state = self.state.lock().await;
        if let Some(peer) = state
            .project(project_id)
            .peers
            .iter_mut()
            .find(|p| p.id == peer_id)
        {
            if peer.provider_name == Some(ProviderName::Aws) {
                peer.status_name = status.to_string();
            } else {
                peer.status = status.to_string();
            }
        }
    }

    pub async fn set_service_state(&self, project_id: &str, service_id: &str, status: &str) {
        let mut state = self.state.lock().await;
        if let Some(service) = state
            .project(project_id)
            .services
            .iter_mut()
            .find(|s| s.id == service_id)
        {
            service.status = status.to_string();
        }
    }

    pub async fn set_interface_state(
        &self,
        project_id: &str,
        service_id: &str,
        interface_id: &str,
        status: &str,
    ) {
        let mut state = self.state.lock().await;
        if let Some(iface) = state
            .project(project_id)
            .interfaces
            .get_mut(service_id)
            .and_then(|list| list.iter_mut().find(|i| i.id == interface_id))
        {
            iface.status = status.to_string();
            for endpoint in &mut iface.endpoints {
                endpoint.status = status.to_string();
            }
        }
    }
}

// ============================================================================
// Network peering
// ============================================================================

#[async_trait]
impl PeeringApi for MemoryRemote {
    async fn list_peers(
        &self,
        project_id: &str,
        provider: ProviderName,
        page: PageRequest,
    ) -> ApiResult<Page<Peer>> {
        let mut state = self.state.lock().await;
        state.check(Op::ListPeers, provider.as_str())?;
        let peers: Vec<Peer> = state
            .project(project_id)
            .peers
            .iter()
            .filter(|p| p.provider_name.unwrap_or_default() == provider)
            .cloned()
            .collect();
        Ok(paginate(&peers, page))
    }

    async fn create_peer(&self, project_id: &str, peer: &Peer) -> ApiResult<Peer> {
        let mut state = self.state.lock().await;
        let key = match peer.provider_name.unwrap_or_default() {
            ProviderName::Aws => peer.vpc_id.clone(),
            ProviderName::Gcp => peer.network_name.clone(),
            ProviderName::Azure => peer.vnet_name.clone(),
        };
        state.check(Op::CreatePeer, &key)?;
        if !state
            .project(project_id)
            .containers
            .iter()
            .any(|c| c.id == peer.container_id)
        {
            return Err(ApiError::NotFound(format!(
                "container {} not found",
                peer.container_id
            )));
        }
        let mut created = peer.clone();
        created.id = state.new_id();
        let provisioning = state.provisioning_state.clone();
        if created.provider_name.unwrap_or_default() == ProviderName::Aws {
            created.status_name = provisioning;
            created.connection_id = format!("pcx-{}", &created.id[16..]);
        } else {
            created.status = provisioning;
        }
        state.project(project_id).peers.push(created.clone());
        Ok(created)
    }

    async fn delete_peer(&self, project_id: &str, peer_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.check(Op::DeletePeer, peer_id)?;
        let peers = &mut state.project(project_id).peers;
        let before = peers.len();
        peers.retain(|p| p.id != peer_id);
        if peers.len() == before {
            return Err(ApiError::NotFound(format!("peer {peer_id} not found")));
        }
        Ok(())
    }

    async fn list_containers(
        &self,
        project_id: &str,
        provider: ProviderName,
        page: PageRequest,
    ) -> ApiResult<Page<Container>> {
        let mut state = self.state.lock().await;
        state.check(Op::ListContainers, provider.as_str())?;
        let containers: Vec<Container> = state
            .project(project_id)
            .containers
            .iter()
            .filter(|c| c.provider_name == provider)
            .cloned()
            .collect();
        Ok(paginate(&containers, page))
    }

    async fn get_container(&self, project_id: &str, container_id: &str) -> ApiResult<Container> {
        let mut state = self.state.lock().await;
        state.check(Op::GetContainer, container_id)?;
        state
            .project(project_id)
            .containers
            .iter()
            .find(|c| c.id == container_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("container {container_id} not found")))
    }

    async fn create_container(
        &self,
        project_id: &str,
        container: &Container,
    ) -> ApiResult<Container> {
        let mut state = self.state.lock().await;
        state.check(Op::CreateContainer, &container.atlas_cidr_block)?;
        if state.project(project_id).containers.iter().any(|c| {
            c.provider_name == container.provider_name
                && c.atlas_cidr_block == container.atlas_cidr_block
        }) {
            return Err(ApiError::Conflict(format!(
                "container with CIDR {} already exists",
                container.atlas_cidr_block
            )));
        }
        let mut created = container.clone();
        created.id = state.new_id();
        if created.provider_name == ProviderName::Gcp {
            created.gcp_project_id = format!("p-{}", &created.id[16..]);
            created.network_name = format!("nt-{}", &created.id[16..]);
        }
        state.project(project_id).containers.push(created.clone());
        Ok(created)
    }

    async fn delete_container(&self, project_id: &str, container_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.check(Op::DeleteContainer, container_id)?;
        let project = state.project(project_id);
        if project.peers.iter().any(|p| p.container_id == container_id) {
            return Err(ApiError::Conflict(format!(
                "container {container_id} is in use"
            )));
        }
        let before = project.containers.len();
        project.containers.retain(|c| c.id != container_id);
        if project.containers.len() == before {
            return Err(ApiError::NotFound(format!(
                "container {container_id} not found"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Private endpoints
// ============================================================================

#[async_trait]
impl PrivateEndpointApi for MemoryRemote {
    async fn list_endpoint_services(
        &self,
        project_id: &str,
        provider: ProviderName,
    ) -> ApiResult<Vec<EndpointService>> {
        let mut state = self.state.lock().await;
        state.check(Op::ListEndpointServices, provider.as_str())?;
        Ok(state
            .project(project_id)
            .services
            .iter()
            .filter(|s| s.provider_name == provider)
            .cloned()
            .collect())
    }

    async fn create_endpoint_service(
        &self,
        project_id: &str,
        provider: ProviderName,
        region: &str,
    ) -> ApiResult<EndpointService> {
        let mut state = self.state.lock().await;
        let key = format!("{provider}{}", region_to_id(region));
        state.check(Op::CreateEndpointService, &key)?;
        if state.project(project_id).services.iter().any(|s| {
            s.provider_name == provider && region_to_id(&s.region_name) == region_to_id(region)
        }) {
            return Err(ApiError::Conflict(format!(
                "endpoint service for {provider} in {region} already exists"
            )));
        }
        let id = state.new_id();
        let status = state.provisioning_state.clone();
        let mut service = EndpointService {
            id: id.clone(),
            provider_name: provider,
            region_name: region.to_string(),
            status,
            ..Default::default()
        };
        match provider {
            ProviderName::Aws => {
                service.endpoint_service_name = format!("com.amazonaws.vpce.{region}.vpce-svc-{}", &id[16..]);
            }
            ProviderName::Azure => {
                service.private_link_service_name = format!("pls_{}", &id[16..]);
                service.private_link_service_resource_id =
                    format!("/subscriptions/atlas/privateLinkServices/pls_{}", &id[16..]);
            }
            ProviderName::Gcp => {
                service.service_attachment_names = (0..3)
                    .map(|n| format!("projects/atlas/regions/{region}/serviceAttachments/sa-{n}"))
                    .collect();
            }
        }
        state.project(project_id).services.push(service.clone());
        Ok(service)
    }

    async fn delete_endpoint_service(
        &self,
        project_id: &str,
        provider: ProviderName,
        service_id: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.check(Op::DeleteEndpointService, service_id)?;
        let project = state.project(project_id);
        if project
            .interfaces
            .get(service_id)
            .is_some_and(|list| !list.is_empty())
        {
            return Err(ApiError::Conflict(format!(
                "endpoint service {service_id} still has interface endpoints"
            )));
        }
        let before = project.services.len();
        project
            .services
            .retain(|s| !(s.id == service_id && s.provider_name == provider));
        if project.services.len() == before {
            return Err(ApiError::NotFound(format!(
                "endpoint service {service_id} not found"
            )));
        }
        Ok(())
    }

    async fn create_interface_endpoint(
        &self,
        project_id: &str,
        provider: ProviderName,
        service_id: &str,
        request: &InterfaceRequest,
    ) -> ApiResult<InterfaceEndpoint> {
        let mut state = self.state.lock().await;
        let interface_id = if provider == ProviderName::Gcp {
            request.endpoint_group_name.clone()
        } else {
            request.id.clone()
        };
        state.check(Op::CreateInterface, &interface_id)?;
        let status = state.provisioning_state.clone();
        let project = state.project(project_id);
        let Some(service) = project
            .services
            .iter_mut()
            .find(|s| s.id == service_id && s.provider_name == provider)
        else {
            return Err(ApiError::NotFound(format!(
                "endpoint service {service_id} not found"
            )));
        };
        let iface = InterfaceEndpoint {
            id: interface_id.clone(),
            status: if provider == ProviderName::Aws {
                String::new()
            } else {
                status.clone()
            },
            connection_status: if provider == ProviderName::Aws {
                status.clone()
            } else {
                String::new()
            },
            private_endpoint_ip_address: request.private_endpoint_ip_address.clone(),
            endpoint_group_name: request.endpoint_group_name.clone(),
            endpoints: request
                .endpoints
                .iter()
                .map(|e| GcpEndpointState {
                    endpoint_name: e.endpoint_name.clone(),
                    ip_address: e.ip_address.clone(),
                    status: status.clone(),
                })
                .collect(),
            ..Default::default()
        };
        match provider {
            ProviderName::Aws => service.interface_endpoints.push(interface_id),
            ProviderName::Azure => service.private_endpoints.push(interface_id),
            ProviderName::Gcp => service.endpoint_group_names.push(interface_id),
        }
        project
            .interfaces
            .entry(service_id.to_string())
            .or_default()
            .push(iface.clone());
        Ok(iface)
    }

    async fn get_interface_endpoint(
        &self,
        project_id: &str,
        _provider: ProviderName,
        service_id: &str,
        interface_id: &str,
    ) -> ApiResult<InterfaceEndpoint> {
        let mut state = self.state.lock().await;
        state.check(Op::GetInterface, interface_id)?;
        state
            .project(project_id)
            .interfaces
            .get(service_id)
            .and_then(|list| list.iter().find(|i| i.id == interface_id))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("interface endpoint {interface_id} not found")))
    }

    async fn delete_interface_endpoint(
        &self,
        project_id: &str,
        _provider: ProviderName,
        service_id: &str,
        interface_id: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.check(Op::DeleteInterface, interface_id)?;
        let project = state.project(project_id);
        let removed = project
            .interfaces
            .get_mut(service_id)
            .map(|list| {
                let before = list.len();
                list.retain(|i| i.id != interface_id);
                list.len() != before
            })
            .unwrap_or(false);
        if !removed {
            return Err(ApiError::NotFound(format!(
                "interface endpoint {interface_id} not found"
            )));
        }
        if let Some(service) = project.services.iter_mut().find(|s| s.id == service_id) {
            service.interface_endpoints.retain(|i| i != interface_id);
            service.private_endpoints.retain(|i| i != interface_id);
            service.endpoint_group_names.retain(|i| i != interface_id);
        }
        Ok(())
    }
}

// ============================================================================
// Cloud provider access
// ============================================================================

#[async_trait]
impl CloudAccessApi for MemoryRemote {
    async fn list_access_roles(&self, project_id: &str) -> ApiResult<Vec<AccessRole>> {
        let mut state = self.state.lock().await;
        state.check(Op::ListAccessRoles, project_id)?;
        Ok(state.project(project_id).access_roles.clone())
    }

    async fn create_access_role(
        &self,
        project_id: &str,
        provider: ProviderName,
    ) -> ApiResult<AccessRole> {
        let mut state = self.state.lock().await;
        state.check(Op::CreateAccessRole, provider.as_str())?;
        let role = AccessRole {
            role_id: state.new_id(),
            provider_name: provider,
            atlas_aws_account_arn: "arn:aws:iam::000000000000:root".to_string(),
            atlas_assumed_role_external_id: uuid::Uuid::new_v4().to_string(),
            created_date: Some(Utc::now()),
            ..Default::default()
        };
        state.project(project_id).access_roles.push(role.clone());
        Ok(role)
    }

    async fn authorize_access_role(
        &self,
        project_id: &str,
        role_id: &str,
        provider: ProviderName,
        iam_assumed_role_arn: &str,
    ) -> ApiResult<AccessRole> {
        let mut state = self.state.lock().await;
        state.check(Op::AuthorizeAccessRole, iam_assumed_role_arn)?;
        let role = state
            .project(project_id)
            .access_roles
            .iter_mut()
            .find(|r| r.role_id == role_id && r.provider_name == provider)
            .ok_or_else(|| ApiError::NotFound(format!("role {role_id} not found")))?;
        role.iam_assumed_role_arn = iam_assumed_role_arn.to_string();
        role.authorized_date = Some(Utc::now());
        Ok(role.clone())
    }

    async fn deauthorize_access_role(
        &self,
        project_id: &str,
        provider: ProviderName,
        role_id: &str,
    ) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.check(Op::DeauthorizeAccessRole, role_id)?;
        let roles = &mut state.project(project_id).access_roles;
        let Some(pos) = roles
            .iter()
            .position(|r| r.role_id == role_id && r.provider_name == provider)
        else {
            return Err(ApiError::NotFound(format!("role {role_id} not found")));
        };
        if !roles[pos].feature_usages.is_empty() {
            return Err(ApiError::Conflict(format!("role {role_id} is in use")));
        }
        roles.remove(pos);
        Ok(())
    }
}

// ============================================================================
// Custom roles
// ============================================================================

#[async_trait]
impl CustomRoleApi for MemoryRemote {
    async fn list_custom_roles(&self, project_id: &str) -> ApiResult<Vec<RoleDefinition>> {
        let mut state = self.state.lock().await;
        state.check(Op::ListCustomRoles, project_id)?;
        Ok(state.project(project_id).custom_roles.clone())
    }

    async fn create_custom_role(
        &self,
        project_id: &str,
        role: &RoleDefinition,
    ) -> ApiResult<RoleDefinition> {
        let mut state = self.state.lock().await;
        state.check(Op::CreateCustomRole, &role.role_name)?;
        let roles = &mut state.project(project_id).custom_roles;
        if roles.iter().any(|r| r.role_name == role.role_name) {
            return Err(ApiError::Conflict(format!(
                "custom role {} already exists",
                role.role_name
            )));
        }
        roles.push(role.clone());
        Ok(role.clone())
    }

    async fn update_custom_role(
        &self,
        project_id: &str,
        role: &RoleDefinition,
    ) -> ApiResult<RoleDefinition> {
        let mut state = self.state.lock().await;
        state.check(Op::UpdateCustomRole, &role.role_name)?;
        let existing = state
            .project(project_id)
            .custom_roles
            .iter_mut()
            .find(|r| r.role_name == role.role_name)
            .ok_or_else(|| ApiError::NotFound(format!("custom role {} not found", role.role_name)))?;
        *existing = role.clone();
        Ok(role.clone())
    }

    async fn delete_custom_role(&self, project_id: &str, role_name: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.check(Op::DeleteCustomRole, role_name)?;
        let roles = &mut state.project(project_id).custom_roles;
        let before = roles.len();
        roles.retain(|r| r.role_name != role_name);
        if roles.len() == before {
            return Err(ApiError::NotFound(format!("custom role {role_name} not found")));
        }
        Ok(())
    }
}

// ============================================================================
// Alert configurations
// ============================================================================

#[async_trait]
impl AlertConfigApi for MemoryRemote {
    async fn list_alert_configs(
        &self,
        project_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<AlertConfig>> {
        let mut state = self.state.lock().await;
        state.check(Op::ListAlertConfigs, project_id)?;
        let configs: Vec<AlertConfig> = state
            .project(project_id)
            .alert_configs
            .iter()
            .cloned()
            .map(redacted)
            .collect();
        Ok(paginate(&configs, page))
    }

    async fn create_alert_config(
        &self,
        project_id: &str,
        config: &AlertConfig,
    ) -> ApiResult<AlertConfig> {
        let mut state = self.state.lock().await;
        state.check(Op::CreateAlertConfig, &config.event_type_name)?;
        let mut created = config.clone();
        created.id = state.new_id();
        created.created = Some(Utc::now());
        created.updated = created.created;
        state.project(project_id).alert_configs.push(created.clone());
        Ok(redacted(created))
    }

    async fn update_alert_config(
        &self,
        project_id: &str,
        config_id: &str,
        config: &AlertConfig,
    ) -> ApiResult<AlertConfig> {
        let mut state = self.state.lock().await;
        state.check(Op::UpdateAlertConfig, config_id)?;
        let existing = state
            .project(project_id)
            .alert_configs
            .iter_mut()
            .find(|c| c.id == config_id)
            .ok_or_else(|| ApiError::NotFound(format!("alert configuration {config_id} not found")))?;
        let created = existing.created;
        *existing = config.clone();
        existing.id = config_id.to_string();
        existing.created = created;
        existing.updated = Some(Utc::now());
        Ok(redacted(existing.clone()))
    }

    async fn delete_alert_config(&self, project_id: &str, config_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.check(Op::DeleteAlertConfig, config_id)?;
        let configs = &mut state.project(project_id).alert_configs;
        let before = configs.len();
        configs.retain(|c| c.id != config_id);
        if configs.len() == before {
            return Err(ApiError::NotFound(format!(
                "alert configuration {config_id} not found"
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Teams
// ============================================================================

#[async_trait]
impl TeamApi for MemoryRemote {
    async fn get_team_by_name(&self, org_id: &str, name: &str) -> ApiResult<Team> {
        let mut state = self.state.lock().await;
        state.check(Op::GetTeam, name)?;
        state
            .teams
            .get(org_id)
            .and_then(|teams| teams.iter().find(|t| t.name == name))
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("team {name} not found")))
    }

    async fn create_team(&self, org_id: &str, name: &str) -> ApiResult<Team> {
        let mut state = self.state.lock().await;
        state.check(Op::CreateTeam, name)?;
        let team = Team {
            id: state.new_id(),
            name: name.to_string(),
        };
        state.team_users.insert(team.id.clone(), Vec::new());
        state
            .teams
            .entry(org_id.to_string())
            .or_default()
            .push(team.clone());
        Ok(team)
    }

    async fn list_team_users(
        &self,
        _org_id: &str,
        team_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<CloudUser>> {
        let mut state = self.state.lock().await;
        state.check(Op::ListTeamUsers, team_id)?;
        let users = state.team_users.get(team_id).cloned().unwrap_or_default();
        Ok(paginate(&users, page))
    }

    async fn get_user_by_name(&self, username: &str) -> ApiResult<CloudUser> {
        let mut state = self.state.lock().await;
        state.check(Op::GetUser, username)?;
        state
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("user {username} not found")))
    }

    async fn add_team_users(&self, _org_id: &str, team_id: &str, user_ids: &[String]) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.check(Op::AddTeamUsers, team_id)?;
        let to_add: Vec<CloudUser> = state
            .users
            .iter()
            .filter(|u| user_ids.contains(&u.id))
            .cloned()
            .collect();
        let members = state.team_users.entry(team_id.to_string()).or_default();
        for user in to_add {
            if !members.iter().any(|m| m.id == user.id) {
                members.push(user);
            }
        }
        Ok(())
    }

    async fn remove_team_user(&self, _org_id: &str, team_id: &str, user_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.check(Op::RemoveTeamUser, user_id)?;
        let members = state.team_users.entry(team_id.to_string()).or_default();
        let before = members.len();
        members.retain(|m| m.id != user_id);
        if members.len() == before {
            return Err(ApiError::NotFound(format!("user {user_id} is not a team member")));
        }
        Ok(())
    }

    async fn list_project_teams(
        &self,
        project_id: &str,
        page: PageRequest,
    ) -> ApiResult<Page<ProjectTeam>> {
        let mut state = self.state.lock().await;
        state.check(Op::ListProjectTeams, project_id)?;
        Ok(paginate(&state.project(project_id).teams, page))
    }

    async fn assign_project_teams(&self, project_id: &str, teams: &[ProjectTeam]) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        for team in teams {
            state.check(Op::AssignProjectTeams, &team.team_id)?;
            let known = state
                .teams
                .values()
                .flatten()
                .any(|t| t.id == team.team_id);
            if !known {
                return Err(ApiError::NotFound(format!("team {} not found", team.team_id)));
            }
        }
        let assigned = &mut state.project(project_id).teams;
        for team in teams {
            match assigned.iter_mut().find(|t| t.team_id == team.team_id) {
                Some(existing) => {
                    for role in &team.role_names {
                        if !existing.role_names.contains(role) {
                            existing.role_names.push(role.clone());
                        }
                    }
                }
                None => assigned.push(team.clone()),
            }
        }
        Ok(())
    }

    async fn unassign_project_team(&self, project_id: &str, team_id: &str) -> ApiResult<()> {
        let mut state = self.state.lock().await;
        state.check(Op::UnassignProjectTeam, team_id)?;
        let assigned = &mut state.project(project_id).teams;
        let before = assigned.len();
        assigned.retain(|t| t.team_id != team_id);
        if assigned.len() == before {
            return Err(ApiError::NotFound(format!(
                "team {team_id} is not assigned to project {project_id}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fault_injection_by_key() {
        let remote = MemoryRemote::new();
        remote
            .fail(
                Op::DeleteCustomRole,
                Some("reader"),
                ApiError::Transient("boom".to_string()),
            )
            .await;
        remote
            .insert_custom_role(
                "p1",
                RoleDefinition {
                    role_name: "writer".to_string(),
                    ..Default::default()
                },
            )
            .await;

        assert!(remote.delete_custom_role("p1", "writer").await.is_ok());
        assert_eq!(
            remote.delete_custom_role("p1", "reader").await,
            Err(ApiError::Transient("boom".to_string()))
        );
        assert_eq!(
            remote.calls(Op::DeleteCustomRole).await,
            vec!["writer".to_string(), "reader".to_string()]
        );
    }

    #[tokio::test]
    async fn test_container_conflict_on_same_cidr() {
        let remote = MemoryRemote::new();
        let request = Container {
            provider_name: ProviderName::Aws,
            atlas_cidr_block: "10.8.0.0/21".to_string(),
            region_name: "US_EAST_1".to_string(),
            ..Default::default()
        };
        remote.create_container("p1", &request).await.unwrap();
        assert!(remote
            .create_container("p1", &request)
            .await
            .unwrap_err()
            .is_conflict());
    }

    #[tokio::test]
    async fn test_alert_configs_are_redacted_on_read() {
        let remote = MemoryRemote::new();
        let config = AlertConfig {
            event_type_name: "HOST_DOWN".to_string(),
            notifications: vec![super::super::types::AlertNotification {
                type_name: "PAGER_DUTY".to_string(),
                service_key: "secret-key".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        };
        remote.create_alert_config("p1", &config).await.unwrap();
        let listed = remote
            .list_alert_configs(
                "p1",
                PageRequest {
                    page_num: 1,
                    items_per_page: 10,
                },
            )
            .await
            .unwrap();
        assert_eq!(listed.results[0].notifications[0].service_key, "****");
        assert_eq!(
            remote.alert_configs("p1").await[0].notifications[0].service_key,
            "secret-key"
        );
    }

    #[tokio::test]
    async fn test_service_delete_blocked_by_interfaces() {
        let remote = MemoryRemote::new();
        let service = remote
            .create_endpoint_service("p1", ProviderName::Aws, "us-east-1")
            .await
            .unwrap();
        remote
            .create_interface_endpoint(
                "p1",
                ProviderName::Aws,
                &service.id,
                &InterfaceRequest {
                    id: "vpce-1".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(remote
            .delete_endpoint_service("p1", ProviderName::Aws, &service.id)
            .await
            .unwrap_err()
            .is_conflict());
        remote
            .delete_interface_endpoint("p1", ProviderName::Aws, &service.id, "vpce-1")
            .await
            .unwrap();
        assert!(remote
            .delete_endpoint_service("p1", ProviderName::Aws, &service.id)
            .await
            .is_ok());
    }
}
