//! Custom database roles, keyed by role name.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{deletion_result, CategoryInput, CategoryReconciler};
use crate::aggregate::{aggregate, Deletion};
use crate::context::Context;
use crate::diff::{self, Matcher};
use crate::remote::types::{RemoteInheritedRole, RemoteRoleAction, RemoteRoleResource, RoleDefinition};
use crate::remote::CustomRoleApi;
use crate::spec::CustomRole;
use crate::state::Step;
use crate::status::{ConditionType, CustomRoleStatus, ProjectStatus};
use crate::workflow::{Outcome, Reason};

struct RoleMatcher;

impl Matcher for RoleMatcher {
    type Desired = CustomRole;
    type Observed = RoleDefinition;

    fn matches(&self, desired: &CustomRole, observed: &RoleDefinition) -> bool {
        desired.name == observed.role_name
    }

    fn desired_key(&self, desired: &CustomRole) -> Option<String> {
        Some(desired.name.clone())
    }

    fn observed_id(&self, observed: &RoleDefinition) -> String {
        observed.role_name.clone()
    }
}

/// Remote form of a declared role.
pub(crate) fn to_definition(role: &CustomRole) -> RoleDefinition {
    RoleDefinition {
        role_name: role.name.clone(),
        actions: role
            .actions
            .iter()
            .map(|a| RemoteRoleAction {
                action: a.name.clone(),
                resources: a
                    .resources
                    .iter()
                    .map(|r| RemoteRoleResource {
                        cluster: r.cluster,
                        db: r.database.clone(),
                        collection: r.collection.clone(),
                    })
                    .collect(),
            })
            .collect(),
        inherited_roles: role
            .inherited_roles
            .iter()
            .map(|r| RemoteInheritedRole {
                role: r.name.clone(),
                db: r.database.clone(),
            })
            .collect(),
    }
}

/// Order-insensitive form for comparison. `cluster: false` is the same as
/// leaving it out.
fn normalized(role: &RoleDefinition) -> RoleDefinition {
    let mut role = role.clone();
    for action in &mut role.actions {
        for resource in &mut action.resources {
            if resource.cluster == Some(false) {
                resource.cluster = None;
            }
        }
        action.resources.sort();
        action.resources.dedup();
    }
    role.actions.sort();
    role.actions.dedup();
    role.inherited_roles.sort();
    role.inherited_roles.dedup();
    role
}

fn needs_update(desired: &RoleDefinition, observed: &RoleDefinition) -> bool {
    normalized(desired) != normalized(observed)
}

fn validate(role: &CustomRole) -> Result<(), String> {
    if role.name.is_empty() {
        return Err("role name is required".to_string());
    }
    if role.actions.is_empty() && role.inherited_roles.is_empty() {
        return Err("at least one action or inherited role is required".to_string());
    }
    Ok(())
}

pub struct CustomRoleReconciler {
    api: Arc<dyn CustomRoleApi>,
}

impl CustomRoleReconciler {
    pub fn new(api: Arc<dyn CustomRoleApi>) -> Self {
        Self { api }
    }

    async fn apply(
        &self,
        cx: &Context,
        project_id: &str,
        role: &CustomRole,
        observed: Option<&RoleDefinition>,
    ) -> CustomRoleStatus {
        let mut status = CustomRoleStatus {
            name: role.name.clone(),
            ..Default::default()
        };
        if let Err(message) = validate(role) {
            status.phase = status.phase.next(&Step::Error);
            status.error_message = Some(message);
            return status;
        }

        let definition = to_definition(role);
        let result = match observed {
            None => {
                info!(parent: &cx.span, "Creating custom role {}", role.name);
                cx.call(self.api.create_custom_role(project_id, &definition))
                    .await
            }
            Some(current) if needs_update(&definition, current) => {
                info!(parent: &cx.span, "Updating custom role {}", role.name);
                cx.call(self.api.update_custom_role(project_id, &definition))
                    .await
            }
            Some(current) => {
                debug!(parent: &cx.span, "Custom role {} is up to date", role.name);
                Ok(current.clone())
            }
        };

        match result {
            Ok(_) => status.phase = status.phase.next(&Step::Synced),
            Err(e) => {
                warn!(parent: &cx.span, "Failed to apply custom role {}: {}", role.name, e);
                status.phase = status.phase.next(&Step::Error);
                status.error_message = Some(e.to_string());
            }
        }
        status
    }
}

#[async_trait]
impl CategoryReconciler for CustomRoleReconciler {
    fn condition(&self) -> ConditionType {
        ConditionType::CustomRolesReady
    }

    async fn reconcile(
        &self,
        cx: &Context,
        input: &CategoryInput<'_>,
        status: &mut ProjectStatus,
    ) -> Outcome {
        let desired = &input.spec.custom_roles;
        let owned = &input.owned.spec().custom_roles;
        if desired.is_empty() && owned.is_empty() {
            status.custom_roles.clear();
            return Outcome::NotConfigured;
        }

        let roles = match cx.call(self.api.list_custom_roles(input.project_id)).await {
            Ok(roles) => roles,
            Err(e) => {
                return Outcome::failed(
                    Reason::CustomRolesNotReady,
                    format!("failed to list custom roles: {e}"),
                )
            }
        };

        let plan = diff::compute(&RoleMatcher, desired, &roles, owned);
        debug!(
            parent: &cx.span,
            "Custom roles: {} to create, {} to update, {} to delete",
            plan.to_create.len(),
            plan.to_update.len(),
            plan.to_delete.len()
        );

        let mut deletions = Vec::with_capacity(plan.to_delete.len());
        for role in &plan.to_delete {
            info!(parent: &cx.span, "Deleting custom role {}", role.role_name);
            let result = deletion_result(
                cx.call(self.api.delete_custom_role(input.project_id, &role.role_name))
                    .await,
            );
            deletions.push(Deletion::new(format!("role {}", role.role_name), result));
        }

        let mut statuses = Vec::with_capacity(plan.to_create.len() + plan.to_update.len());
        for role in &plan.to_create {
            statuses.push(self.apply(cx, input.project_id, role, None).await);
        }
        for (observed, role) in &plan.to_update {
            statuses.push(self.apply(cx, input.project_id, role, Some(observed)).await);
        }

        let outcome = aggregate(&statuses, statuses.len(), &deletions, Reason::CustomRolesNotReady);
        status.custom_roles = statuses;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::ownership::{self, Ownership};
    use crate::remote::memory::{MemoryRemote, Op};
    use crate::spec::{InheritedRole, ProjectSpec, RoleAction, RoleResource};
    use crate::state::SyncPhase;
    use std::collections::BTreeMap;

    const PROJECT: &str = "p1";

    fn make_role(name: &str, actions: &[&str]) -> CustomRole {
        CustomRole {
            name: name.to_string(),
            inherited_roles: vec![InheritedRole {
                name: "read".to_string(),
                database: "admin".to_string(),
            }],
            actions: actions
                .iter()
                .map(|a| RoleAction {
                    name: a.to_string(),
                    resources: vec![RoleResource {
                        cluster: Some(false),
                        database: "app".to_string(),
                        collection: String::new(),
                    }],
                })
                .collect(),
        }
    }

    fn make_spec(roles: Vec<CustomRole>) -> ProjectSpec {
        ProjectSpec {
            project_id: PROJECT.to_string(),
            custom_roles: roles,
            ..Default::default()
        }
    }

    fn owned(spec: &ProjectSpec) -> Ownership {
        let mut annotations = BTreeMap::new();
        ownership::record(&mut annotations, spec).unwrap();
        Ownership::from_annotations(&annotations).unwrap()
    }

    async fn run(remote: &Arc<MemoryRemote>, spec: &ProjectSpec, owned: &Ownership) -> (Outcome, ProjectStatus) {
        let reconciler = CustomRoleReconciler::new(remote.clone());
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
    fn test_comparison_ignores_order_and_false_cluster() {
        let desired = to_definition(&make_role("r", &["FIND", "INSERT"]));
        let mut observed = desired.clone();
        observed.actions.reverse();
        for action in &mut observed.actions {
            for resource in &mut action.resources {
                resource.cluster = None;
            }
        }
        assert!(!needs_update(&desired, &observed));

        observed.actions.pop();
        assert!(needs_update(&desired, &observed));
    }

    #[tokio::test]
    async fn test_create_update_and_idempotence() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_role("app-reader", &["FIND"])]);
        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(status.custom_roles[0].phase, SyncPhase::Synced);

        remote.reset_calls().await;
        let (outcome, _) = run(&remote, &spec, &owned(&spec)).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(remote.mutation_count().await, 0);

        let changed = make_spec(vec![make_role("app-reader", &["FIND", "UPDATE"])]);
        let (outcome, _) = run(&remote, &changed, &owned(&spec)).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(remote.calls(Op::UpdateCustomRole).await, vec!["app-reader".to_string()]);
        assert_eq!(remote.custom_roles(PROJECT).await[0].actions.len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_names_collapse() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_role("dup", &["FIND"]), make_role("dup", &["INSERT"])]);
        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(status.custom_roles.len(), 1);
        assert_eq!(remote.custom_roles(PROJECT).await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_role_fails_others_proceed() {
        let remote = Arc::new(MemoryRemote::new());
        let empty = CustomRole {
            name: "empty".to_string(),
            ..Default::default()
        };
        let spec = make_spec(vec![empty, make_role("ok", &["FIND"])]);
        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        match outcome {
            Outcome::Failed { message, .. } => {
                assert!(message.contains("role empty: at least one action"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(status.custom_roles[1].phase, SyncPhase::Synced);
        assert_eq!(remote.custom_roles(PROJECT).await.len(), 1);
    }

    #[tokio::test]
    async fn test_only_owned_roles_are_deleted() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .insert_custom_role(PROJECT, to_definition(&make_role("manual", &["FIND"])))
            .await;
        let spec = make_spec(vec![make_role("a", &["FIND"]), make_role("b", &["FIND"])]);
        run(&remote, &spec, &Ownership::default()).await;

        let reduced = make_spec(vec![make_role("a", &["FIND"])]);
        let (outcome, _) = run(&remote, &reduced, &owned(&spec)).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(remote.calls(Op::DeleteCustomRole).await, vec!["b".to_string()]);
        let names: Vec<String> = remote
            .custom_roles(PROJECT)
            .await
            .into_iter()
            .map(|r| r.role_name)
            .collect();
        assert_eq!(names, vec!["manual".to_string(), "a".to_string()]);
    }

    #[tokio::test]
    async fn test_partial_create_failure() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .fail(Op::CreateCustomRole, Some("b"), ApiError::BadRequest("invalid action".to_string()))
            .await;
        let spec = make_spec(vec![make_role("a", &["FIND"]), make_role("b", &["FIND"])]);
        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        assert!(matches!(outcome, Outcome::Failed { .. }));
        assert_eq!(status.custom_roles[0].phase, SyncPhase::Synced);
        assert_eq!(status.custom_roles[1].phase, SyncPhase::Failed);
    }
}
