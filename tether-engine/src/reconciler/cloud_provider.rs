//! Cloud provider access roles.
//!
//! A role is created first and authorized with the customer's IAM role ARN
//! on a later pass, once the customer has trusted the external id the
//! creation returned. Roles without an ARN yet have no natural key and are
//! paired positionally.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{deletion_result, CategoryInput, CategoryReconciler};
use crate::aggregate::{aggregate, Deletion, DeletionResult};
use crate::context::Context;
use crate::diff::{self, Matcher};
use crate::remote::types::AccessRole;
use crate::remote::CloudAccessApi;
use crate::spec::CloudProviderIntegration;
use crate::state::Step;
use crate::status::{CloudProviderIntegrationStatus, ConditionType, ProjectStatus};
use crate::workflow::{Outcome, Reason};

struct RoleMatcher;

impl Matcher for RoleMatcher {
    type Desired = CloudProviderIntegration;
    type Observed = AccessRole;

    fn matches(&self, desired: &CloudProviderIntegration, observed: &AccessRole) -> bool {
        desired.provider_name == observed.provider_name
            && !desired.iam_assumed_role_arn.is_empty()
            && desired.iam_assumed_role_arn == observed.iam_assumed_role_arn
    }

    fn desired_key(&self, desired: &CloudProviderIntegration) -> Option<String> {
        (!desired.iam_assumed_role_arn.is_empty())
            .then(|| format!("{}:{}", desired.provider_name, desired.iam_assumed_role_arn))
    }

    fn observed_id(&self, observed: &AccessRole) -> String {
        observed.role_id.clone()
    }

    fn positional(&self, _desired: &CloudProviderIntegration) -> bool {
        true
    }

    fn observed_unkeyed(&self, observed: &AccessRole) -> bool {
        observed.iam_assumed_role_arn.is_empty()
    }
}

fn role_status(desired: &CloudProviderIntegration, role: &AccessRole) -> CloudProviderIntegrationStatus {
    CloudProviderIntegrationStatus {
        provider_name: desired.provider_name,
        iam_assumed_role_arn: desired.iam_assumed_role_arn.clone(),
        role_id: role.role_id.clone(),
        atlas_aws_account_arn: role.atlas_aws_account_arn.clone(),
        atlas_assumed_role_external_id: role.atlas_assumed_role_external_id.clone(),
        created_date: role.created_date,
        authorized_date: role.authorized_date,
        feature_usages: role.feature_usages.clone(),
        ..Default::default()
    }
}

pub struct CloudProviderReconciler {
    api: Arc<dyn CloudAccessApi>,
}

impl CloudProviderReconciler {
    pub fn new(api: Arc<dyn CloudAccessApi>) -> Self {
        Self { api }
    }

    async fn create(
        &self,
        cx: &Context,
        project_id: &str,
        desired: &CloudProviderIntegration,
    ) -> CloudProviderIntegrationStatus {
        match cx
            .call(self.api.create_access_role(project_id, desired.provider_name))
            .await
        {
            Ok(role) => {
                info!(parent: &cx.span, "Created {} access role {}", desired.provider_name, role.role_id);
                let mut status = role_status(desired, &role);
                status.phase = status.phase.next(&Step::Created);
                status
            }
            Err(e) => {
                warn!(parent: &cx.span, "Failed to create {} access role: {}", desired.provider_name, e);
                let mut status = CloudProviderIntegrationStatus {
                    provider_name: desired.provider_name,
                    iam_assumed_role_arn: desired.iam_assumed_role_arn.clone(),
                    ..Default::default()
                };
                status.phase = status.phase.next(&Step::Error);
                status.error_message = Some(format!("failed to create access role: {e}"));
                status
            }
        }
    }

    async fn update(
        &self,
        cx: &Context,
        project_id: &str,
        observed: &AccessRole,
        desired: &CloudProviderIntegration,
    ) -> CloudProviderIntegrationStatus {
        let mut status = role_status(desired, observed);
        status.phase = status.phase.next(&Step::Created);

        if !observed.iam_assumed_role_arn.is_empty()
            && observed.iam_assumed_role_arn == desired.iam_assumed_role_arn
        {
            status.phase = status.phase.next(&Step::Authorized);
            return status;
        }
        // Nothing to authorize with until the customer supplies an ARN.
        if desired.iam_assumed_role_arn.is_empty() {
            return status;
        }

        match cx
            .call(self.api.authorize_access_role(
                project_id,
                &observed.role_id,
                desired.provider_name,
                &desired.iam_assumed_role_arn,
            ))
            .await
        {
            Ok(role) => {
                info!(parent: &cx.span, "Authorized access role {} for {}", role.role_id, desired.iam_assumed_role_arn);
                status.authorized_date = role.authorized_date;
                status.feature_usages = role.feature_usages;
                status.phase = status.phase.next(&Step::Authorized);
            }
            Err(e) => {
                warn!(parent: &cx.span, "Failed to authorize access role {}: {}", observed.role_id, e);
                status.phase = status.phase.next(&Step::Error);
                status.error_message = Some(format!(
                    "failed to authorize {}: {e}",
                    desired.iam_assumed_role_arn
                ));
            }
        }
        status
    }

    async fn delete(&self, cx: &Context, project_id: &str, role: &AccessRole) -> Deletion {
        let identity = if role.iam_assumed_role_arn.is_empty() {
            format!("access role {}", role.role_id)
        } else {
            format!("access role {} ({})", role.role_id, role.iam_assumed_role_arn)
        };
        if !role.feature_usages.is_empty() {
            let features: Vec<&str> = role
                .feature_usages
                .iter()
                .map(|f| f.feature_type.as_str())
                .collect();
            return Deletion::new(
                identity,
                DeletionResult::Unsupported(format!(
                    "role is still used by {}; remove those first",
                    features.join(", ")
                )),
            );
        }
        info!(parent: &cx.span, "Deauthorizing access role {}", role.role_id);
        let result = deletion_result(
            cx.call(self.api.deauthorize_access_role(project_id, role.provider_name, &role.role_id))
                .await,
        );
        Deletion::new(identity, result)
    }
}

#[async_trait]
impl CategoryReconciler for CloudProviderReconciler {
    fn condition(&self) -> ConditionType {
        ConditionType::CloudProviderIntegrationReady
    }

    async fn reconcile(
        &self,
        cx: &Context,
        input: &CategoryInput<'_>,
        status: &mut ProjectStatus,
    ) -> Outcome {
        let desired = &input.spec.cloud_provider_integrations;
        let owned = &input.owned.spec().cloud_provider_integrations;
        if desired.is_empty() && owned.is_empty() {
            status.cloud_provider_integrations.clear();
            return Outcome::NotConfigured;
        }

        let roles = match cx.call(self.api.list_access_roles(input.project_id)).await {
            Ok(roles) => roles,
            Err(e) => {
                return Outcome::failed(
                    Reason::CloudProviderIntegrationNotReady,
                    format!("failed to list access roles: {e}"),
                )
            }
        };

        let plan = diff::compute(&RoleMatcher, desired, &roles, owned);
        debug!(
            parent: &cx.span,
            "Access roles: {} to create, {} to update, {} to delete",
            plan.to_create.len(),
            plan.to_update.len(),
            plan.to_delete.len()
        );

        let mut deletions = Vec::with_capacity(plan.to_delete.len());
        for role in &plan.to_delete {
            deletions.push(self.delete(cx, input.project_id, role).await);
        }

        let mut statuses = Vec::with_capacity(plan.to_create.len() + plan.to_update.len());
        for integration in &plan.to_create {
            statuses.push(self.create(cx, input.project_id, integration).await);
        }
        for (role, integration) in &plan.to_update {
            statuses.push(self.update(cx, input.project_id, role, integration).await);
        }

        let outcome = aggregate(
            &statuses,
            statuses.len(),
            &deletions,
            Reason::CloudProviderIntegrationNotReady,
        );
        status.cloud_provider_integrations = statuses;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use crate::ownership::{self, Ownership};
    use crate::provider::ProviderName;
    use crate::remote::memory::{MemoryRemote, Op};
    use crate::remote::types::FeatureUsage;
    use crate::spec::ProjectSpec;
    use crate::state::AccessRolePhase;
    use std::collections::BTreeMap;

    const PROJECT: &str = "p1";

    fn make_integration(arn: &str) -> CloudProviderIntegration {
        CloudProviderIntegration {
            provider_name: ProviderName::Aws,
            iam_assumed_role_arn: arn.to_string(),
        }
    }

    fn make_spec(integrations: Vec<CloudProviderIntegration>) -> ProjectSpec {
        ProjectSpec {
            project_id: PROJECT.to_string(),
            cloud_provider_integrations: integrations,
            ..Default::default()
        }
    }

    fn owned(spec: &ProjectSpec) -> Ownership {
        let mut annotations = BTreeMap::new();
        ownership::record(&mut annotations, spec).unwrap();
        Ownership::from_annotations(&annotations).unwrap()
    }

    async fn run(remote: &Arc<MemoryRemote>, spec: &ProjectSpec, owned: &Ownership) -> (Outcome, ProjectStatus) {
        let reconciler = CloudProviderReconciler::new(remote.clone());
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

    #[tokio::test]
    async fn test_create_then_authorize() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_integration("arn:aws:iam::1:role/atlas")]);

        let (first, status) = run(&remote, &spec, &Ownership::default()).await;
        assert!(matches!(first, Outcome::InProgress { .. }));
        let created = &status.cloud_provider_integrations[0];
        assert_eq!(created.phase, AccessRolePhase::Created);
        assert!(!created.atlas_assumed_role_external_id.is_empty());
        assert!(remote.calls(Op::AuthorizeAccessRole).await.is_empty());

        let (second, status) = run(&remote, &spec, &Ownership::default()).await;
        assert_eq!(second, Outcome::Ready);
        assert_eq!(status.cloud_provider_integrations[0].phase, AccessRolePhase::Authorized);
        assert_eq!(remote.access_roles(PROJECT).await.len(), 1);

        remote.reset_calls().await;
        let (third, _) = run(&remote, &spec, &owned(&spec)).await;
        assert_eq!(third, Outcome::Ready);
        assert_eq!(remote.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_positional_match_takes_lowest_role_id() {
        let remote = Arc::new(MemoryRemote::new());
        for id in ["00000000000000000000000b", "00000000000000000000000a"] {
            remote
                .insert_access_role(
                    PROJECT,
                    AccessRole {
                        role_id: id.to_string(),
                        provider_name: ProviderName::Aws,
                        ..Default::default()
                    },
                )
                .await;
        }
        let spec = make_spec(vec![make_integration("arn:aws:iam::1:role/atlas")]);

        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(status.cloud_provider_integrations[0].role_id, "00000000000000000000000a");
        assert!(remote.calls(Op::CreateAccessRole).await.is_empty());
        assert!(remote.calls(Op::DeauthorizeAccessRole).await.is_empty());
    }

    #[test]
    fn test_foreign_unkeyed_role_survives_vanished_owned_role() {
        let foreign = AccessRole {
            role_id: "r-foreign".to_string(),
            provider_name: ProviderName::Aws,
            ..Default::default()
        };
        let owned = [make_integration("arn:aws:iam::1:role/x")];
        let plan = diff::compute(&RoleMatcher, &[], &[foreign], &owned);
        assert!(plan.to_delete.is_empty());
    }

    #[tokio::test]
    async fn test_removed_integration_leaves_foreign_role_alone() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .insert_access_role(
                PROJECT,
                AccessRole {
                    role_id: "r-foreign".to_string(),
                    provider_name: ProviderName::Aws,
                    ..Default::default()
                },
            )
            .await;
        let before = make_spec(vec![make_integration("arn:aws:iam::1:role/x")]);

        let (outcome, _) = run(&remote, &make_spec(vec![]), &owned(&before)).await;
        assert_eq!(outcome, Outcome::NotConfigured);
        assert_eq!(remote.mutation_count().await, 0);
        assert_eq!(remote.access_roles(PROJECT).await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_arn_stays_created() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_integration("")]);
        run(&remote, &spec, &Ownership::default()).await;

        remote.reset_calls().await;
        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        assert!(matches!(outcome, Outcome::InProgress { .. }));
        assert_eq!(status.cloud_provider_integrations[0].phase, AccessRolePhase::Created);
        assert_eq!(remote.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_authorize_failure() {
        let remote = Arc::new(MemoryRemote::new());
        let arn = "arn:aws:iam::1:role/untrusted";
        remote
            .fail(Op::AuthorizeAccessRole, Some(arn), ApiError::BadRequest("trust policy".to_string()))
            .await;
        let spec = make_spec(vec![make_integration(arn)]);
        run(&remote, &spec, &Ownership::default()).await;

        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        match outcome {
            Outcome::Failed { reason, message } => {
                assert_eq!(reason, Reason::CloudProviderIntegrationNotReady);
                assert!(message.contains("trust policy"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            status.cloud_provider_integrations[0].phase,
            AccessRolePhase::FailedToAuthorize
        );
    }

    #[tokio::test]
    async fn test_removed_role_is_deauthorized() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_integration("arn:aws:iam::1:role/atlas")]);
        run(&remote, &spec, &Ownership::default()).await;
        run(&remote, &spec, &Ownership::default()).await;

        let (outcome, _) = run(&remote, &make_spec(vec![]), &owned(&spec)).await;
        assert_eq!(outcome, Outcome::NotConfigured);
        assert!(remote.access_roles(PROJECT).await.is_empty());
    }

    #[tokio::test]
    async fn test_role_in_use_cannot_be_deleted() {
        let remote = Arc::new(MemoryRemote::new());
        let arn = "arn:aws:iam::1:role/atlas";
        remote
            .insert_access_role(
                PROJECT,
                AccessRole {
                    provider_name: ProviderName::Aws,
                    iam_assumed_role_arn: arn.to_string(),
                    feature_usages: vec![FeatureUsage {
                        feature_type: "ENCRYPTION_AT_REST".to_string(),
                        feature_id: String::new(),
                    }],
                    ..Default::default()
                },
            )
            .await;
        let spec = make_spec(vec![make_integration(arn)]);

        let (outcome, _) = run(&remote, &make_spec(vec![]), &owned(&spec)).await;
        match outcome {
            Outcome::Terminal { reason, message } => {
                assert_eq!(reason, Reason::UnsupportedOperation);
                assert!(message.contains("ENCRYPTION_AT_REST"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(remote.calls(Op::DeauthorizeAccessRole).await.is_empty());
    }

    #[tokio::test]
    async fn test_unowned_roles_are_left_alone() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .insert_access_role(
                PROJECT,
                AccessRole {
                    provider_name: ProviderName::Aws,
                    iam_assumed_role_arn: "arn:aws:iam::9:role/manual".to_string(),
                    ..Default::default()
                },
            )
            .await;
        let spec = make_spec(vec![make_integration("arn:aws:iam::1:role/atlas")]);
        run(&remote, &spec, &owned(&spec)).await;
        assert!(remote.calls(Op::DeauthorizeAccessRole).await.is_empty());
        assert_eq!(remote.access_roles(PROJECT).await.len(), 2);
    }
}
