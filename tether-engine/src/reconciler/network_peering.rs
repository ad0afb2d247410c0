//! Network peering connections and the containers they attach to.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{deletion_result, CategoryInput, CategoryReconciler, ReconcileConfig};
use crate::aggregate::{aggregate, Deletion, DeletionResult};
use crate::context::Context;
use crate::diff::{self, Matcher};
use crate::error::ApiResult;
use crate::provider::{infer_provider, PeeringProvider, ProviderName, ProviderRegistry};
use crate::remote::types::{Container, Peer};
use crate::remote::{list_all, PeeringApi};
use crate::spec::NetworkPeer;
use crate::state::{RemoteState, Step};
use crate::status::{ConditionType, NetworkPeerStatus, ProjectStatus};
use crate::workflow::{Outcome, Reason};

struct PeerMatcher<'a> {
    providers: &'a ProviderRegistry,
}

impl Matcher for PeerMatcher<'_> {
    type Desired = NetworkPeer;
    type Observed = Peer;

    fn matches(&self, desired: &NetworkPeer, observed: &Peer) -> bool {
        let provider = desired.provider();
        if infer_provider(observed) != Some(provider) {
            return false;
        }
        if !desired.container_id.is_empty() && desired.container_id != observed.container_id {
            return false;
        }
        if !desired.atlas_cidr_block.is_empty()
            && desired.atlas_cidr_block != observed.atlas_cidr_block
        {
            return false;
        }
        self.providers
            .get(provider)
            .is_some_and(|p| p.key(desired) == p.observed_key(observed))
    }

    fn desired_key(&self, desired: &NetworkPeer) -> Option<String> {
        let provider = desired.provider();
        self.providers
            .get(provider)
            .map(|p| format!("{provider}:{}", p.key(desired)))
    }

    fn observed_id(&self, observed: &Peer) -> String {
        observed.id.clone()
    }
}

fn failed(mut status: NetworkPeerStatus, message: String) -> NetworkPeerStatus {
    status.phase = status.phase.next(&Step::Error);
    status.error_message = Some(message);
    status
}

pub struct NetworkPeeringReconciler {
    api: Arc<dyn PeeringApi>,
    providers: ProviderRegistry,
    config: ReconcileConfig,
}

impl NetworkPeeringReconciler {
    pub fn new(api: Arc<dyn PeeringApi>, config: ReconcileConfig) -> Self {
        Self {
            api,
            providers: ProviderRegistry::default(),
            config,
        }
    }

    async fn list_containers(
        &self,
        cx: &Context,
        project_id: &str,
        provider: ProviderName,
    ) -> ApiResult<Vec<Container>> {
        list_all(self.config.page_size, |page| {
            cx.call(self.api.list_containers(project_id, provider, page))
        })
        .await
    }

    /// List every peer and container, filling in each peer's provider and
    /// container CIDR when the API leaves them out.
    async fn list_observed(
        &self,
        cx: &Context,
        project_id: &str,
    ) -> ApiResult<(Vec<Peer>, Vec<Container>)> {
        let mut peers = Vec::new();
        let mut containers = Vec::new();
        for provider in ProviderName::ALL {
            let listed = list_all(self.config.page_size, |page| {
                cx.call(self.api.list_peers(project_id, provider, page))
            })
            .await?;
            peers.extend(listed);
            containers.extend(self.list_containers(cx, project_id, provider).await?);
        }

        let cidrs: HashMap<&str, &str> = containers
            .iter()
            .map(|c| (c.id.as_str(), c.atlas_cidr_block.as_str()))
            .collect();
        let mut seen = HashSet::new();
        peers.retain(|p| seen.insert(p.id.clone()));
        for peer in &mut peers {
            peer.provider_name = infer_provider(peer);
            if peer.atlas_cidr_block.is_empty() {
                if let Some(cidr) = cidrs.get(peer.container_id.as_str()) {
                    peer.atlas_cidr_block = cidr.to_string();
                }
            }
        }
        Ok((peers, containers))
    }

    /// Find a container satisfying `peer`, creating one when none exists.
    async fn ensure_container(
        &self,
        cx: &Context,
        project_id: &str,
        strategy: &dyn PeeringProvider,
        peer: &NetworkPeer,
        known: &[Container],
    ) -> ApiResult<Container> {
        if let Some(existing) = known
            .iter()
            .find(|c| c.provider_name == strategy.name() && strategy.container_matches(c, peer))
        {
            return Ok(existing.clone());
        }

        let request = strategy.container_request(peer);
        match cx.call(self.api.create_container(project_id, &request)).await {
            Ok(container) => {
                info!(parent: &cx.span, "Created {} container {} ({})", strategy.name(), container.id, container.atlas_cidr_block);
                Ok(container)
            }
            Err(e) if e.is_conflict() => {
                debug!(parent: &cx.span, "Container for {} already exists, adopting it", peer.atlas_cidr_block);
                self.list_containers(cx, project_id, strategy.name())
                    .await?
                    .into_iter()
                    .find(|c| strategy.container_matches(c, peer))
                    .ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn container(&self, cx: &Context, project_id: &str, id: &str, known: &[Container]) -> ApiResult<Container> {
        match known.iter().find(|c| c.id == id) {
            Some(c) => Ok(c.clone()),
            None => cx.call(self.api.get_container(project_id, id)).await,
        }
    }

    /// Record what the remote API reports about a peer into its status.
    async fn observe(
        &self,
        cx: &Context,
        project_id: &str,
        strategy: &dyn PeeringProvider,
        mut status: NetworkPeerStatus,
        peer: &Peer,
        known: &[Container],
    ) -> NetworkPeerStatus {
        status.id = peer.id.clone();
        status.container_id = peer.container_id.clone();
        status.connection_id = peer.connection_id.clone();
        status.remote_state = peer.state().to_string();

        let state = RemoteState::parse(peer.state());
        if state == RemoteState::Failed {
            let message = match peer.error() {
                "" => format!("peer entered state {}", peer.state()),
                err => err.to_string(),
            };
            return failed(status, message);
        }
        status.phase = status.phase.next(&Step::Observed(state));

        if strategy.reports_container_network() {
            match self.container(cx, project_id, &peer.container_id, known).await {
                Ok(container) => match strategy.name() {
                    ProviderName::Gcp => {
                        status.atlas_gcp_project_id = container.gcp_project_id;
                        status.atlas_network_name = container.network_name;
                    }
                    _ => {
                        status.atlas_network_name = container.vnet_name;
                    }
                },
                Err(e) => {
                    return failed(status, format!("failed to read container {}: {e}", peer.container_id));
                }
            }
            // GCP peering needs the provider-side network to be known.
            if strategy.name() == ProviderName::Gcp
                && (status.atlas_gcp_project_id.is_empty() || status.atlas_network_name.is_empty())
            {
                status.phase = status
                    .phase
                    .next(&Step::Observed(RemoteState::Pending("WAITING_FOR_CONTAINER".to_string())));
            }
        }
        status
    }

    async fn create(
        &self,
        cx: &Context,
        project_id: &str,
        peer: &NetworkPeer,
        known: &[Container],
    ) -> NetworkPeerStatus {
        let provider = peer.provider();
        let mut status = NetworkPeerStatus {
            provider_name: provider,
            ..Default::default()
        };
        let Some(strategy) = self.providers.get(provider) else {
            return failed(status, format!("unsupported provider: {provider}"));
        };
        status.network = strategy.network_label(peer);

        if let Err(e) = strategy.validate(peer) {
            return failed(status, format!("invalid network peer: {e}"));
        }

        let container_id = if peer.container_id.is_empty() {
            match self.ensure_container(cx, project_id, strategy, peer, known).await {
                Ok(container) => container.id,
                Err(e) => return failed(status, format!("failed to create container: {e}")),
            }
        } else {
            peer.container_id.clone()
        };
        status.container_id = container_id.clone();
        status.phase = status.phase.next(&Step::ParentReady);

        let request = strategy.peer_request(peer, &container_id);
        match cx.call(self.api.create_peer(project_id, &request)).await {
            Ok(created) => {
                info!(parent: &cx.span, "Created network peer {} ({}) in container {}", status.network, provider, container_id);
                status.phase = status.phase.next(&Step::Created);
                self.observe(cx, project_id, strategy, status, &created, known)
                    .await
            }
            Err(e) => {
                warn!(parent: &cx.span, "Failed to create network peer {} ({}): {}", status.network, provider, e);
                failed(status, format!("failed to create network peer: {e}"))
            }
        }
    }

    async fn update(
        &self,
        cx: &Context,
        project_id: &str,
        observed: &Peer,
        desired: &NetworkPeer,
        known: &[Container],
    ) -> NetworkPeerStatus {
        let provider = desired.provider();
        let mut status = NetworkPeerStatus {
            provider_name: provider,
            ..Default::default()
        };
        let Some(strategy) = self.providers.get(provider) else {
            return failed(status, format!("unsupported provider: {provider}"));
        };
        status.network = strategy.network_label(desired);
        status.phase = status.phase.next(&Step::ParentReady).next(&Step::Created);
        self.observe(cx, project_id, strategy, status, observed, known)
            .await
    }

    async fn delete(&self, cx: &Context, project_id: &str, peer: &Peer) -> Deletion {
        let provider = peer.provider_name.unwrap_or_default();
        let identity = format!("{provider} peer {}", peer.id);
        if RemoteState::parse(peer.state()).is_deleting() {
            debug!(parent: &cx.span, "Network peer {} is already being deleted", peer.id);
            return Deletion::new(identity, DeletionResult::InProgress);
        }
        info!(parent: &cx.span, "Deleting network peer {} ({})", peer.id, provider);
        let result = deletion_result(cx.call(self.api.delete_peer(project_id, &peer.id)).await);
        Deletion::new(identity, result)
    }

    /// Delete owned containers that nothing declares or uses any more.
    #[allow(clippy::too_many_arguments)]
    async fn prune_containers(
        &self,
        cx: &Context,
        project_id: &str,
        desired: &[NetworkPeer],
        owned: &[NetworkPeer],
        remaining: &[&Peer],
        statuses: &[NetworkPeerStatus],
        containers: &[Container],
    ) -> Vec<Deletion> {
        let in_use: HashSet<&str> = remaining
            .iter()
            .map(|p| p.container_id.as_str())
            .chain(statuses.iter().map(|s| s.container_id.as_str()))
            .chain(desired.iter().map(|d| d.container_id.as_str()))
            .collect();
        let same_network = |c: &Container, p: &NetworkPeer| {
            !p.atlas_cidr_block.is_empty()
                && p.provider() == c.provider_name
                && p.atlas_cidr_block == c.atlas_cidr_block
        };

        let mut deletions = Vec::new();
        for container in containers {
            if in_use.contains(container.id.as_str())
                || desired.iter().any(|d| same_network(container, d))
                || !owned.iter().any(|o| same_network(container, o))
            {
                continue;
            }
            let identity = format!("{} container {}", container.provider_name, container.id);
            match cx.call(self.api.delete_container(project_id, &container.id)).await {
                Ok(()) => {
                    info!(parent: &cx.span, "Deleted unused container {} ({})", container.id, container.atlas_cidr_block);
                    deletions.push(Deletion::new(identity, DeletionResult::Deleted));
                }
                Err(e) if e.is_not_found() => {}
                Err(e) if e.is_conflict() => {
                    debug!(parent: &cx.span, "Container {} is still in use", container.id);
                    deletions.push(Deletion::new(identity, DeletionResult::InProgress));
                }
                Err(e) => deletions.push(Deletion::new(identity, DeletionResult::Failed(e.to_string()))),
            }
        }
        deletions
    }
}

#[async_trait]
impl CategoryReconciler for NetworkPeeringReconciler {
    fn condition(&self) -> ConditionType {
        ConditionType::NetworkPeerReady
    }

    async fn reconcile(
        &self,
        cx: &Context,
        input: &CategoryInput<'_>,
        status: &mut ProjectStatus,
    ) -> Outcome {
        let desired = &input.spec.network_peers;
        let owned = &input.owned.spec().network_peers;
        if desired.is_empty() && owned.is_empty() {
            status.network_peers.clear();
            return Outcome::NotConfigured;
        }

        let (peers, containers) = match self.list_observed(cx, input.project_id).await {
            Ok(observed) => observed,
            Err(e) => {
                return Outcome::failed(
                    Reason::NetworkPeerNotReady,
                    format!("failed to list network peers: {e}"),
                )
            }
        };

        let matcher = PeerMatcher {
            providers: &self.providers,
        };
        let plan = diff::compute(&matcher, desired, &peers, owned);
        debug!(
            parent: &cx.span,
            "Network peers: {} to create, {} to update, {} to delete",
            plan.to_create.len(),
            plan.to_update.len(),
            plan.to_delete.len()
        );

        let mut deletions = Vec::new();
        for peer in &plan.to_delete {
            deletions.push(self.delete(cx, input.project_id, peer).await);
        }

        let mut statuses = Vec::with_capacity(plan.to_create.len() + plan.to_update.len());
        for peer in &plan.to_create {
            statuses.push(self.create(cx, input.project_id, peer, &containers).await);
        }
        for (observed, peer) in &plan.to_update {
            statuses.push(
                self.update(cx, input.project_id, observed, peer, &containers)
                    .await,
            );
        }

        let deleted: HashSet<&str> = plan.to_delete.iter().map(|p| p.id.as_str()).collect();
        let remaining: Vec<&Peer> = peers
            .iter()
            .filter(|p| !deleted.contains(p.id.as_str()))
            .collect();
        let pruned = self
            .prune_containers(
                cx,
                input.project_id,
                desired,
                owned,
                &remaining,
                &statuses,
                &containers,
            )
            .await;
        deletions.extend(pruned);

        let desired_count = plan.to_create.len() + plan.to_update.len();
        let outcome = aggregate(&statuses, desired_count, &deletions, Reason::NetworkPeerNotReady);
        status.network_peers = statuses;
        outcome
    }
}
