//! Private endpoints: one endpoint service per provider and region, with
//! interface endpoints attached to it in a second phase.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{deletion_result, CategoryInput, CategoryReconciler};
use crate::aggregate::{aggregate, Deletion, DeletionResult};
use crate::context::Context;
use crate::diff::{self, Matcher};
use crate::provider::{region_to_id, ProviderName};
use crate::remote::types::{EndpointService, GcpEndpointState, InterfaceEndpoint, InterfaceRequest};
use crate::remote::PrivateEndpointApi;
use crate::spec::PrivateEndpoint;
use crate::state::{RemoteState, Step};
use crate::status::{ConditionType, GcpEndpointStatus, PrivateEndpointStatus, ProjectStatus};
use crate::workflow::{Outcome, Reason};

/// Declared entries sharing one endpoint service.
#[derive(Debug, Clone, PartialEq)]
struct ServiceGroup {
    provider: ProviderName,
    region: String,
    entries: Vec<PrivateEndpoint>,
}

impl ServiceGroup {
    fn identity(&self) -> String {
        service_identity(self.provider, &self.region)
    }
}

fn service_identity(provider: ProviderName, region: &str) -> String {
    format!("{provider}{}", region_to_id(region))
}

/// Group entries by service identity, keeping first-seen order. Identical
/// entries collapse.
fn group(entries: &[PrivateEndpoint]) -> Vec<ServiceGroup> {
    let mut groups: Vec<ServiceGroup> = Vec::new();
    for entry in entries {
        let identity = service_identity(entry.provider, &entry.region);
        match groups.iter_mut().find(|g| g.identity() == identity) {
            Some(group) => {
                if !group.entries.contains(entry) {
                    group.entries.push(entry.clone());
                }
            }
            None => groups.push(ServiceGroup {
                provider: entry.provider,
                region: entry.region.clone(),
                entries: vec![entry.clone()],
            }),
        }
    }
    groups
}

struct ServiceMatcher;

impl Matcher for ServiceMatcher {
    type Desired = ServiceGroup;
    type Observed = EndpointService;

    fn matches(&self, desired: &ServiceGroup, observed: &EndpointService) -> bool {
        desired.provider == observed.provider_name
            && region_to_id(&desired.region) == region_to_id(&observed.region_name)
    }

    fn desired_key(&self, desired: &ServiceGroup) -> Option<String> {
        Some(desired.identity())
    }

    fn observed_id(&self, observed: &EndpointService) -> String {
        observed.id.clone()
    }
}

fn interface_request(entry: &PrivateEndpoint) -> InterfaceRequest {
    match entry.provider {
        ProviderName::Aws => InterfaceRequest {
            id: entry.id.clone(),
            ..Default::default()
        },
        ProviderName::Azure => InterfaceRequest {
            id: entry.id.clone(),
            private_endpoint_ip_address: entry.ip.clone(),
            ..Default::default()
        },
        ProviderName::Gcp => InterfaceRequest {
            endpoint_group_name: entry.endpoint_group_name.clone(),
            gcp_project_id: entry.gcp_project_id.clone(),
            endpoints: entry
                .endpoints
                .iter()
                .map(|e| GcpEndpointState {
                    endpoint_name: e.endpoint_name.clone(),
                    ip_address: e.ip_address.clone(),
                    status: String::new(),
                })
                .collect(),
            ..Default::default()
        },
    }
}

/// State of an interface endpoint. A GCP endpoint group is only available
/// once every endpoint in it is.
fn interface_state(iface: &InterfaceEndpoint) -> RemoteState {
    if iface.endpoints.is_empty() {
        return RemoteState::parse(iface.state());
    }
    let states: Vec<RemoteState> = iface
        .endpoints
        .iter()
        .map(|e| RemoteState::parse(&e.status))
        .collect();
    if states.contains(&RemoteState::Failed) {
        RemoteState::Failed
    } else if states.iter().all(RemoteState::is_available) {
        RemoteState::Available
    } else {
        RemoteState::Pending(iface.state().to_string())
    }
}

fn entry_status(entry: &PrivateEndpoint, service: &EndpointService) -> PrivateEndpointStatus {
    PrivateEndpointStatus {
        id: service.id.clone(),
        provider: entry.provider,
        region: entry.region.clone(),
        service_name: if service.endpoint_service_name.is_empty() {
            service.private_link_service_name.clone()
        } else {
            service.endpoint_service_name.clone()
        },
        service_resource_id: service.private_link_service_resource_id.clone(),
        service_attachment_names: service.service_attachment_names.clone(),
        ..Default::default()
    }
}

fn failed(mut status: PrivateEndpointStatus, message: String) -> PrivateEndpointStatus {
    status.phase = status.phase.next(&Step::Error);
    status.error_message = Some(message);
    status
}

fn record_interface(mut status: PrivateEndpointStatus, iface: &InterfaceEndpoint) -> PrivateEndpointStatus {
    status.interface_endpoint_id = iface.id.clone();
    status.endpoints = iface
        .endpoints
        .iter()
        .map(|e| GcpEndpointStatus {
            endpoint_name: e.endpoint_name.clone(),
            ip_address: e.ip_address.clone(),
            status: e.status.clone(),
        })
        .collect();
    let state = interface_state(iface);
    if state == RemoteState::Failed {
        let message = if iface.error_message.is_empty() {
            format!("interface endpoint {} failed", iface.id)
        } else {
            iface.error_message.clone()
        };
        return failed(status, message);
    }
    status.phase = status.phase.next(&Step::Observed(state));
    status
}

pub struct PrivateEndpointReconciler {
    api: Arc<dyn PrivateEndpointApi>,
}

impl PrivateEndpointReconciler {
    pub fn new(api: Arc<dyn PrivateEndpointApi>) -> Self {
        Self { api }
    }

    async fn list_services(&self, cx: &Context, project_id: &str) -> crate::error::ApiResult<Vec<EndpointService>> {
        let mut services = Vec::new();
        for provider in ProviderName::ALL {
            let mut listed = cx
                .call(self.api.list_endpoint_services(project_id, provider))
                .await?;
            for service in &mut listed {
                service.provider_name = provider;
            }
            services.extend(listed);
        }
        Ok(services)
    }

    async fn create(&self, cx: &Context, project_id: &str, group: &ServiceGroup) -> Vec<PrivateEndpointStatus> {
        let result = cx
            .call(self.api.create_endpoint_service(project_id, group.provider, &group.region))
            .await;
        match result {
            Ok(service) => {
                info!(parent: &cx.span, "Created {} endpoint service in {}", group.provider, group.region);
                group
                    .entries
                    .iter()
                    .map(|entry| {
                        let mut status = entry_status(entry, &service);
                        status.phase = status.phase.next(&Step::Created);
                        status
                    })
                    .collect()
            }
            Err(e) => {
                warn!(parent: &cx.span, "Failed to create {} endpoint service in {}: {}", group.provider, group.region, e);
                group
                    .entries
                    .iter()
                    .map(|entry| {
                        failed(
                            entry_status(entry, &EndpointService::default()),
                            format!("failed to create endpoint service: {e}"),
                        )
                    })
                    .collect()
            }
        }
    }

    /// Second phase for one entry of an available service.
    async fn converge_entry(
        &self,
        cx: &Context,
        project_id: &str,
        service: &EndpointService,
        attached: &[String],
        entry: &PrivateEndpoint,
    ) -> PrivateEndpointStatus {
        let mut status = entry_status(entry, service);
        status.phase = status.phase.next(&Step::ParentReady);
        if !entry.is_configured() {
            return status;
        }

        let interface_id = entry.interface_id();
        if attached.iter().any(|id| id == interface_id) {
            match cx
                .call(self.api.get_interface_endpoint(project_id, entry.provider, &service.id, interface_id))
                .await
            {
                Ok(iface) if entry.provider != ProviderName::Gcp || iface.endpoints.len() == entry.endpoints.len() => {
                    status.phase = status.phase.next(&Step::Attached);
                    return record_interface(status, &iface);
                }
                Ok(_) => {
                    debug!(parent: &cx.span, "Endpoint group {} differs from its declaration, resubmitting", interface_id);
                }
                Err(e) => {
                    return failed(status, format!("failed to read interface endpoint {interface_id}: {e}"));
                }
            }
        }

        match cx
            .call(self.api.create_interface_endpoint(project_id, entry.provider, &service.id, &interface_request(entry)))
            .await
        {
            Ok(iface) => {
                info!(parent: &cx.span, "Attached interface endpoint {} to {} service {}", interface_id, entry.provider, service.id);
                status.phase = status.phase.next(&Step::Attached);
                record_interface(status, &iface)
            }
            Err(e) => {
                warn!(parent: &cx.span, "Failed to attach interface endpoint {}: {}", interface_id, e);
                failed(status, format!("failed to create interface endpoint {interface_id}: {e}"))
            }
        }
    }

    async fn update(
        &self,
        cx: &Context,
        project_id: &str,
        service: &EndpointService,
        group: &ServiceGroup,
        owned: &[ServiceGroup],
        deletions: &mut Vec<Deletion>,
    ) -> Vec<PrivateEndpointStatus> {
        let state = RemoteState::parse(&service.status);
        let mut statuses = Vec::with_capacity(group.entries.len());
        match state {
            RemoteState::Failed => {
                let message = if service.error_message.is_empty() {
                    format!("endpoint service {} failed", service.id)
                } else {
                    service.error_message.clone()
                };
                for entry in &group.entries {
                    statuses.push(failed(entry_status(entry, service), message.clone()));
                }
            }
            RemoteState::Available => {
                let attached = service.attached_interfaces();
                for entry in &group.entries {
                    statuses.push(
                        self.converge_entry(cx, project_id, service, &attached, entry)
                            .await,
                    );
                }
                self.detach_removed(cx, project_id, service, &attached, group, owned, deletions)
                    .await;
            }
            RemoteState::Pending(_) | RemoteState::Deleting => {
                for entry in &group.entries {
                    let mut status = entry_status(entry, service);
                    status.phase = status.phase.next(&Step::Created);
                    statuses.push(status);
                }
            }
        }
        statuses
    }

    /// Delete attached interfaces that were declared before and no longer are.
    #[allow(clippy::too_many_arguments)]
    async fn detach_removed(
        &self,
        cx: &Context,
        project_id: &str,
        service: &EndpointService,
        attached: &[String],
        group: &ServiceGroup,
        owned: &[ServiceGroup],
        deletions: &mut Vec<Deletion>,
    ) {
        let declared: HashSet<&str> = group.entries.iter().map(|e| e.interface_id()).collect();
        let identity = group.identity();
        let previously: HashSet<&str> = owned
            .iter()
            .filter(|g| g.identity() == identity)
            .flat_map(|g| g.entries.iter().map(|e| e.interface_id()))
            .filter(|id| !id.is_empty())
            .collect();
        for interface_id in attached {
            if declared.contains(interface_id.as_str()) || !previously.contains(interface_id.as_str()) {
                continue;
            }
            info!(parent: &cx.span, "Deleting interface endpoint {} from {} service {}", interface_id, service.provider_name, service.id);
            let result = deletion_result(
                cx.call(self.api.delete_interface_endpoint(project_id, service.provider_name, &service.id, interface_id))
                    .await,
            );
            deletions.push(Deletion::new(format!("interface endpoint {interface_id}"), result));
        }
    }

    async fn delete(&self, cx: &Context, project_id: &str, service: &EndpointService) -> Vec<Deletion> {
        let identity = format!("{} endpoint service {}", service.provider_name, service.region_name);
        if RemoteState::parse(&service.status).is_deleting() {
            debug!(parent: &cx.span, "Endpoint service {} is already being deleted", service.id);
            return vec![Deletion::new(identity, DeletionResult::InProgress)];
        }

        let attached = service.attached_interfaces();
        if attached.is_empty() {
            info!(parent: &cx.span, "Deleting {} endpoint service {}", service.provider_name, service.id);
            let result = deletion_result(
                cx.call(self.api.delete_endpoint_service(project_id, service.provider_name, &service.id))
                    .await,
            );
            return vec![Deletion::new(identity, result)];
        }

        // Interfaces go first; the service follows on a later pass.
        let mut deletions = Vec::with_capacity(attached.len() + 1);
        for interface_id in &attached {
            info!(parent: &cx.span, "Deleting interface endpoint {} from {} service {}", interface_id, service.provider_name, service.id);
            let result = deletion_result(
                cx.call(self.api.delete_interface_endpoint(project_id, service.provider_name, &service.id, interface_id))
                    .await,
            );
            deletions.push(Deletion::new(format!("interface endpoint {interface_id}"), result));
        }
        deletions.push(Deletion::new(identity, DeletionResult::InProgress));
        deletions
    }
}

#[async_trait]
impl CategoryReconciler for PrivateEndpointReconciler {
    fn condition(&self) -> ConditionType {
        ConditionType::PrivateEndpointReady
    }

    async fn reconcile(
        &self,
        cx: &Context,
        input: &CategoryInput<'_>,
        status: &mut ProjectStatus,
    ) -> Outcome {
        let desired = group(&input.spec.private_endpoints);
        let owned = group(&input.owned.spec().private_endpoints);
        if desired.is_empty() && owned.is_empty() {
            status.private_endpoints.clear();
            return Outcome::NotConfigured;
        }

        let services = match self.list_services(cx, input.project_id).await {
            Ok(services) => services,
            Err(e) => {
                return Outcome::failed(
                    Reason::PrivateEndpointNotReady,
                    format!("failed to list endpoint services: {e}"),
                )
            }
        };

        let plan = diff::compute(&ServiceMatcher, &desired, &services, &owned);
        debug!(
            parent: &cx.span,
            "Endpoint services: {} to create, {} to update, {} to delete",
            plan.to_create.len(),
            plan.to_update.len(),
            plan.to_delete.len()
        );

        let mut deletions = Vec::new();
        for service in &plan.to_delete {
            deletions.extend(self.delete(cx, input.project_id, service).await);
        }

        let mut statuses = Vec::new();
        for group in &plan.to_create {
            statuses.extend(self.create(cx, input.project_id, group).await);
        }
        for (service, group) in &plan.to_update {
            let converged = self
                .update(cx, input.project_id, service, group, &owned, &mut deletions)
                .await;
            statuses.extend(converged);
        }

        let outcome = aggregate(&statuses, statuses.len(), &deletions, Reason::PrivateEndpointNotReady);
        status.private_endpoints = statuses;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::ownership::{self, Ownership};
    use crate::remote::memory::{MemoryRemote, Op};
    use crate::spec::{GcpEndpoint, ProjectSpec};
    use crate::state::EndpointPhase;
    use std::collections::BTreeMap;

    const PROJECT: &str = "p1";

    fn make_aws(region: &str, id: &str) -> PrivateEndpoint {
        PrivateEndpoint {
            provider: ProviderName::Aws,
            region: region.to_string(),
            id: id.to_string(),
            ..Default::default()
        }
    }

    fn make_spec(entries: Vec<PrivateEndpoint>) -> ProjectSpec {
        ProjectSpec {
            project_id: PROJECT.to_string(),
            private_endpoints: entries,
            ..Default::default()
        }
    }

    fn owned(spec: &ProjectSpec) -> Ownership {
        let mut annotations = BTreeMap::new();
        ownership::record(&mut annotations, spec).unwrap();
        Ownership::from_annotations(&annotations).unwrap()
    }

    async fn run(remote: &Arc<MemoryRemote>, spec: &ProjectSpec, owned: &Ownership) -> (Outcome, ProjectStatus) {
        let reconciler = PrivateEndpointReconciler::new(remote.clone());
        let input = CategoryInput {
            project_id: PROJECT,
            namespace: "default",
            spec,
            owned,
        };
        let mut status = ProjectStatus::default();
        let outcome = reconciler
            .reconcile(&Context::detached(), &input, &mut status)
            .await;
        (outcome, status)
    }

    #[test]
    fn test_entries_group_by_service_identity() {
        let groups = group(&[
            make_aws("eu-west-1", "vpce-1"),
            make_aws("EU_WEST_1", "vpce-2"),
            make_aws("eu-west-1", "vpce-1"),
            make_aws("us-east-1", ""),
        ]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].entries.len(), 2);
        assert_eq!(groups[1].identity(), "AWSUS_EAST_1");
    }

    #[tokio::test]
    async fn test_service_then_interface() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_aws("eu-west-1", "vpce-1")]);

        let (first, status) = run(&remote, &spec, &Ownership::default()).await;
        assert!(matches!(first, Outcome::InProgress { .. }));
        assert_eq!(status.private_endpoints[0].phase, EndpointPhase::ServiceCreating);
        assert!(remote.calls(Op::CreateInterface).await.is_empty());

        let (second, status) = run(&remote, &spec, &Ownership::default()).await;
        assert_eq!(second, Outcome::Ready);
        assert_eq!(status.private_endpoints[0].phase, EndpointPhase::Available);
        assert_eq!(status.private_endpoints[0].interface_endpoint_id, "vpce-1");

        remote.reset_calls().await;
        let (third, _) = run(&remote, &spec, &owned(&spec)).await;
        assert_eq!(third, Outcome::Ready);
        assert_eq!(remote.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_unconfigured_entry_awaits_configuration() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_aws("eu-west-1", "")]);
        run(&remote, &spec, &Ownership::default()).await;

        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(status.private_endpoints[0].phase, EndpointPhase::AwaitingConfiguration);
        assert!(!status.private_endpoints[0].service_name.is_empty());
    }

    #[tokio::test]
    async fn test_pending_interface_is_in_progress() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_aws("eu-west-1", "vpce-1")]);
        run(&remote, &spec, &Ownership::default()).await;
        remote.set_provisioning_state("PENDING").await;

        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        assert!(matches!(outcome, Outcome::InProgress { .. }));
        assert_eq!(status.private_endpoints[0].phase, EndpointPhase::InterfaceCreating);
    }

    #[tokio::test]
    async fn test_gcp_group_waits_for_every_endpoint() {
        let remote = Arc::new(MemoryRemote::new());
        let entry = PrivateEndpoint {
            provider: ProviderName::Gcp,
            region: "europe-west1".to_string(),
            gcp_project_id: "customer".to_string(),
            endpoint_group_name: "group-1".to_string(),
            endpoints: vec![
                GcpEndpoint {
                    endpoint_name: "ep-0".to_string(),
                    ip_address: "10.0.0.2".to_string(),
                },
                GcpEndpoint {
                    endpoint_name: "ep-1".to_string(),
                    ip_address: "10.0.0.3".to_string(),
                },
            ],
            ..Default::default()
        };
        let spec = make_spec(vec![entry]);
        run(&remote, &spec, &Ownership::default()).await;
        let (outcome, _) = run(&remote, &spec, &Ownership::default()).await;
        assert_eq!(outcome, Outcome::Ready);

        let service_id = remote.endpoint_services(PROJECT).await[0].id.clone();
        remote
            .set_interface_state(PROJECT, &service_id, "group-1", "PENDING")
            .await;
        let (outcome, status) = run(&remote, &spec, &owned(&spec)).await;
        assert!(matches!(outcome, Outcome::InProgress { .. }));
        assert_eq!(status.private_endpoints[0].endpoints.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_service_fails_entries() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_aws("eu-west-1", "vpce-1"), make_aws("eu-west-1", "vpce-2")]);
        run(&remote, &spec, &Ownership::default()).await;
        let service_id = remote.endpoint_services(PROJECT).await[0].id.clone();
        remote.set_service_state(PROJECT, &service_id, "FAILED").await;

        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert!(status
            .private_endpoints
            .iter()
            .all(|s| s.phase == EndpointPhase::Failed));
    }

    #[tokio::test]
    async fn test_removal_deletes_interfaces_before_service() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_aws("eu-west-1", "vpce-1")]);
        run(&remote, &spec, &Ownership::default()).await;
        run(&remote, &spec, &Ownership::default()).await;
        let empty = make_spec(vec![]);

        let (first, _) = run(&remote, &empty, &owned(&spec)).await;
        assert!(matches!(first, Outcome::InProgress { .. }));
        assert_eq!(remote.calls(Op::DeleteInterface).await, vec!["vpce-1".to_string()]);
        assert!(remote.calls(Op::DeleteEndpointService).await.is_empty());

        let (second, _) = run(&remote, &empty, &owned(&spec)).await;
        assert_eq!(second, Outcome::NotConfigured);
        assert!(remote.endpoint_services(PROJECT).await.is_empty());
    }

    #[tokio::test]
    async fn test_removed_entry_detaches_only_owned_interface() {
        let remote = Arc::new(MemoryRemote::new());
        let full = make_spec(vec![make_aws("eu-west-1", "vpce-1"), make_aws("eu-west-1", "vpce-2")]);
        run(&remote, &full, &Ownership::default()).await;
        run(&remote, &full, &Ownership::default()).await;

        let reduced = make_spec(vec![make_aws("eu-west-1", "vpce-1")]);
        let (outcome, status) = run(&remote, &reduced, &owned(&full)).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(status.private_endpoints.len(), 1);
        assert_eq!(remote.calls(Op::DeleteInterface).await, vec!["vpce-2".to_string()]);
    }

    #[tokio::test]
    async fn test_unowned_service_is_left_alone() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .insert_endpoint_service(
                PROJECT,
                EndpointService {
                    provider_name: ProviderName::Azure,
                    region_name: "westeurope".to_string(),
                    status: "AVAILABLE".to_string(),
                    ..Default::default()
                },
            )
            .await;
        let spec = make_spec(vec![make_aws("eu-west-1", "")]);
        run(&remote, &spec, &owned(&spec)).await;
        assert!(remote.calls(Op::DeleteEndpointService).await.is_empty());
        assert_eq!(remote.endpoint_services(PROJECT).await.len(), 2);
    }

    #[tokio::test]
    async fn test_list_failure_keeps_status() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .fail(Op::ListEndpointServices, None, ApiError::Transient("down".to_string()))
            .await;
        let reconciler = PrivateEndpointReconciler::new(remote.clone());
        let spec = make_spec(vec![make_aws("eu-west-1", "vpce-1")]);
        let owned = Ownership::default();
        let input = CategoryInput {
            project_id: PROJECT,
            namespace: "default",
            spec: &spec,
            owned: &owned,
        };
        let mut status = ProjectStatus {
            private_endpoints: vec![PrivateEndpointStatus::default()],
            ..Default::default()
        };
        let outcome = reconciler
            .reconcile(&Context::detached(), &input, &mut status)
            .await;
        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert_eq!(status.private_endpoints.len(), 1);
    }
}
