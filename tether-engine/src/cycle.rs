//! One reconciliation cycle for a managed project.
//!
//! Categories run strictly one after another in a fixed order. Each writes
//! its own status list and condition; the cycle then derives `Ready`, the
//! requeue action, and whether the ownership snapshot may move forward.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::error::EngineError;
use crate::ownership::{self, Ownership};
use crate::project::ManagedProject;
use crate::reconciler::{
    AlertConfigReconciler, CategoryInput, CategoryReconciler, CloudProviderReconciler,
    CustomRoleReconciler, NetworkPeeringReconciler, PrivateEndpointReconciler, ReconcileConfig,
    TeamReconciler,
};
use crate::remote::RemoteApi;
use crate::secrets::SecretStore;
use crate::status::{ConditionStatus, ConditionType};
use crate::workflow::{Action, Outcome, Reason, RetryPolicy};

/// What one cycle did.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub action: Action,
    /// Outcome per category, in processing order.
    pub outcomes: Vec<(ConditionType, Outcome)>,
    /// Whether the ownership snapshot was rewritten.
    pub snapshot_recorded: bool,
}

impl CycleReport {
    fn aborted() -> Self {
        Self {
            action: Action::Backoff,
            outcomes: Vec::new(),
            snapshot_recorded: false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.action == Action::Done
    }
}

pub struct ProjectReconciler {
    categories: Vec<Box<dyn CategoryReconciler>>,
    retry: RetryPolicy,
}

impl ProjectReconciler {
    /// All categories against one remote, in the standard order.
    pub fn new<R>(remote: Arc<R>, secrets: Arc<dyn SecretStore>, config: ReconcileConfig) -> Self
    where
        R: RemoteApi + 'static,
    {
        let categories: Vec<Box<dyn CategoryReconciler>> = vec![
            Box::new(PrivateEndpointReconciler::new(remote.clone())),
            Box::new(CloudProviderReconciler::new(remote.clone())),
            Box::new(NetworkPeeringReconciler::new(remote.clone(), config)),
            Box::new(AlertConfigReconciler::new(remote.clone(), secrets, config)),
            Box::new(CustomRoleReconciler::new(remote.clone())),
            Box::new(TeamReconciler::new(remote, config)),
        ];
        Self::with_categories(categories)
    }

    pub fn with_categories(categories: Vec<Box<dyn CategoryReconciler>>) -> Self {
        Self {
            categories,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Run every category once against `project`, updating its status and,
    /// when everything settled, its ownership snapshot.
    ///
    /// Only cancellation is an error; every other failure is reported
    /// through conditions and the returned action.
    pub async fn reconcile(
        &self,
        cx: &Context,
        project: &mut ManagedProject,
    ) -> Result<CycleReport, EngineError> {
        let generation = project.metadata.generation;

        let owned = match Ownership::from_annotations(&project.metadata.annotations) {
            Ok(owned) => owned,
            Err(e) => {
                warn!(parent: &cx.span, "Refusing to reconcile: {}", e);
                project.status.set_condition(
                    ConditionType::Ready,
                    ConditionStatus::False,
                    Some(Reason::OwnershipSnapshotInvalid),
                    Some(e.to_string()),
                    Utc::now(),
                );
                project.status.observed_generation = generation;
                return Ok(CycleReport::aborted());
            }
        };

        if project.spec.project_id.is_empty() {
            warn!(parent: &cx.span, "Project has no projectId");
            project.status.set_condition(
                ConditionType::Ready,
                ConditionStatus::False,
                Some(Reason::ProjectSpecInvalid),
                Some("projectId is required".to_string()),
                Utc::now(),
            );
            project.status.observed_generation = generation;
            return Ok(CycleReport::aborted());
        }

        let input = CategoryInput {
            project_id: &project.spec.project_id,
            namespace: &project.metadata.namespace,
            spec: &project.spec,
            owned: &owned,
        };

        let mut outcomes = Vec::with_capacity(self.categories.len());
        for category in &self.categories {
            if cx.is_cancelled() {
                break;
            }
            let condition = category.condition();
            let outcome = category.reconcile(cx, &input, &mut project.status).await;
            debug!(parent: &cx.span, "{:?}: {:?}", condition, outcome);
            project.status.apply_outcome(condition, &outcome, Utc::now());
            outcomes.push((condition, outcome));
        }

        if cx.is_cancelled() {
            info!(parent: &cx.span, "Cycle cancelled after {} categories", outcomes.len());
            project.status.set_condition(
                ConditionType::Ready,
                ConditionStatus::False,
                Some(Reason::Cancelled),
                Some("reconciliation cancelled".to_string()),
                Utc::now(),
            );
            return Err(EngineError::Cancelled);
        }

        let action = self.retry.combine(outcomes.iter().map(|(_, o)| o));
        let pending: Vec<&(ConditionType, Outcome)> =
            outcomes.iter().filter(|(_, o)| !o.is_settled()).collect();

        let mut snapshot_recorded = false;
        match pending.first() {
            None => {
                project.status.set_condition(
                    ConditionType::Ready,
                    ConditionStatus::True,
                    None,
                    None,
                    Utc::now(),
                );
                match ownership::record(&mut project.metadata.annotations, &project.spec) {
                    Ok(()) => snapshot_recorded = true,
                    Err(e) => warn!(parent: &cx.span, "Failed to record ownership snapshot: {}", e),
                }
            }
            Some((_, first)) => {
                let message = pending
                    .iter()
                    .filter_map(|(condition, o)| o.message().map(|m| format!("{condition:?}: {m}")))
                    .collect::<Vec<_>>()
                    .join("; ");
                project.status.set_condition(
                    ConditionType::Ready,
                    ConditionStatus::False,
                    first.reason(),
                    Some(message),
                    Utc::now(),
                );
            }
        }
        project.status.observed_generation = generation;

        info!(
            parent: &cx.span,
            "Cycle finished: {} of {} categories settled, action {:?}",
            outcomes.len() - pending.len(),
            outcomes.len(),
            action
        );

        Ok(CycleReport {
            action,
            outcomes,
            snapshot_recorded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::ownership::LAST_APPLIED_ANNOTATION;
    use crate::project::ObjectMeta;
    use crate::remote::memory::{MemoryRemote, Op};
    use crate::secrets::MemorySecretStore;
    use crate::spec::{CustomRole, InheritedRole, ProjectSpec};
    use std::time::Duration;

    fn make_role(name: &str) -> CustomRole {
        CustomRole {
            name: name.to_string(),
            inherited_roles: vec![InheritedRole {
                name: "read".to_string(),
                database: "admin".to_string(),
            }],
            actions: vec![],
        }
    }

    fn make_project(roles: Vec<CustomRole>) -> ManagedProject {
        ManagedProject {
            metadata: ObjectMeta {
                name: "prod".to_string(),
                namespace: "team-a".to_string(),
                generation: 4,
                ..Default::default()
            },
            spec: ProjectSpec {
                project_id: "p1".to_string(),
                custom_roles: roles,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn make_reconciler(remote: &Arc<MemoryRemote>) -> ProjectReconciler {
        ProjectReconciler::new(
            remote.clone(),
            Arc::new(MemorySecretStore::new()),
            ReconcileConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_settled_cycle_records_snapshot() {
        let remote = Arc::new(MemoryRemote::new());
        let reconciler = make_reconciler(&remote);
        let mut project = make_project(vec![make_role("reader")]);

        let report = reconciler
            .reconcile(&Context::detached(), &mut project)
            .await
            .unwrap();
        assert_eq!(report.action, Action::Done);
        assert!(report.snapshot_recorded);
        assert_eq!(report.outcomes.len(), 6);
        assert_eq!(project.status.observed_generation, 4);

        let ready = project.status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.status, ConditionStatus::True);
        assert!(project.status.condition(ConditionType::CustomRolesReady).is_some());
        assert!(project.status.condition(ConditionType::NetworkPeerReady).is_none());

        let owned = Ownership::from_annotations(&project.metadata.annotations).unwrap();
        assert_eq!(owned.spec(), &project.spec);
    }

    #[tokio::test]
    async fn test_failed_category_keeps_old_snapshot() {
        let remote = Arc::new(MemoryRemote::new());
        let reconciler = make_reconciler(&remote);
        let mut project = make_project(vec![make_role("reader")]);
        reconciler
            .reconcile(&Context::detached(), &mut project)
            .await
            .unwrap();
        let before = project.metadata.annotations.get(LAST_APPLIED_ANNOTATION).cloned();

        remote
            .fail(Op::CreateCustomRole, None, ApiError::Transient("unavailable".to_string()))
            .await;
        project.spec.custom_roles.push(make_role("writer"));
        let report = reconciler
            .reconcile(&Context::detached(), &mut project)
            .await
            .unwrap();

        assert_eq!(report.action, Action::Backoff);
        assert!(!report.snapshot_recorded);
        assert_eq!(
            project.metadata.annotations.get(LAST_APPLIED_ANNOTATION).cloned(),
            before
        );
        let ready = project.status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason, Some(Reason::CustomRolesNotReady));
        assert!(ready.message.as_deref().unwrap().contains("writer"));
    }

    #[tokio::test]
    async fn test_malformed_snapshot_stops_before_remote_calls() {
        let remote = Arc::new(MemoryRemote::new());
        let reconciler = make_reconciler(&remote);
        let mut project = make_project(vec![make_role("reader")]);
        project
            .metadata
            .annotations
            .insert(LAST_APPLIED_ANNOTATION.to_string(), "{broken".to_string());

        let report = reconciler
            .reconcile(&Context::detached(), &mut project)
            .await
            .unwrap();
        assert_eq!(report.action, Action::Backoff);
        assert!(report.outcomes.is_empty());
        assert!(remote.calls(Op::ListCustomRoles).await.is_empty());

        let ready = project.status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.reason, Some(Reason::OwnershipSnapshotInvalid));
    }

    #[tokio::test]
    async fn test_missing_project_id() {
        let remote = Arc::new(MemoryRemote::new());
        let reconciler = make_reconciler(&remote);
        let mut project = make_project(vec![]);
        project.spec.project_id.clear();

        let report = reconciler
            .reconcile(&Context::detached(), &mut project)
            .await
            .unwrap();
        assert_eq!(report.action, Action::Backoff);
        let ready = project.status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.reason, Some(Reason::ProjectSpecInvalid));
    }

    #[tokio::test]
    async fn test_cancelled_cycle() {
        let remote = Arc::new(MemoryRemote::new());
        let reconciler = make_reconciler(&remote);
        let mut project = make_project(vec![make_role("reader")]);
        let cx = Context::detached();
        cx.cancel.cancel();

        let res = reconciler.reconcile(&cx, &mut project).await;
        assert!(matches!(res, Err(EngineError::Cancelled)));
        assert_eq!(remote.mutation_count().await, 0);
        assert!(!project.metadata.annotations.contains_key(LAST_APPLIED_ANNOTATION));
        let ready = project.status.condition(ConditionType::Ready).unwrap();
        assert_eq!(ready.reason, Some(Reason::Cancelled));
    }

    #[tokio::test]
    async fn test_custom_retry_delay() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_provisioning_state("PENDING").await;
        let reconciler = make_reconciler(&remote).with_retry_policy(RetryPolicy {
            in_progress_delay: Duration::from_secs(3),
        });
        let mut project = make_project(vec![]);
        project.spec.private_endpoints = vec![crate::spec::PrivateEndpoint {
            provider: crate::provider::ProviderName::Aws,
            region: "us-east-1".to_string(),
            ..Default::default()
        }];

        let report = reconciler
            .reconcile(&Context::detached(), &mut project)
            .await
            .unwrap();
        assert_eq!(report.action, Action::RequeueAfter(Duration::from_secs(3)));
        assert!(!report.snapshot_recorded);
    }
}
