//! Per-category reconcilers.
//!
//! Each category lists remote state, diffs it against the declaration and
//! the ownership snapshot, converges, and reports one [`Outcome`].

pub mod alert_config;
pub mod cloud_provider;
pub mod custom_role;
pub mod network_peering;
pub mod private_endpoint;
pub mod team;

use async_trait::async_trait;

use crate::aggregate::DeletionResult;
use crate::context::Context;
use crate::error::{ApiError, ApiResult};
use crate::ownership::Ownership;
use crate::remote::DEFAULT_PAGE_SIZE;
use crate::spec::ProjectSpec;
use crate::status::{ConditionType, ProjectStatus};
use crate::workflow::Outcome;

pub use alert_config::AlertConfigReconciler;
pub use cloud_provider::CloudProviderReconciler;
pub use custom_role::CustomRoleReconciler;
pub use network_peering::NetworkPeeringReconciler;
pub use private_endpoint::PrivateEndpointReconciler;
pub use team::TeamReconciler;

/// Tuning shared by all category reconcilers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Items requested per page when listing.
    pub page_size: usize,
    /// Concurrent calls in batched operations.
    pub batch_limit: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_limit: 8,
        }
    }
}

/// Everything a category needs to know about the project being reconciled.
pub struct CategoryInput<'a> {
    pub project_id: &'a str,
    pub namespace: &'a str,
    pub spec: &'a ProjectSpec,
    pub owned: &'a Ownership,
}

/// Reconciles one category of sub-resources.
#[async_trait]
pub trait CategoryReconciler: Send + Sync {
    /// Condition this category reports.
    fn condition(&self) -> ConditionType;

    /// Run one pass and record per-item statuses into `status`.
    async fn reconcile(
        &self,
        cx: &Context,
        input: &CategoryInput<'_>,
        status: &mut ProjectStatus,
    ) -> Outcome;
}

/// Classify the result of a delete call. Deleting something that is
/// already gone counts as success.
pub(crate) fn deletion_result(res: ApiResult<()>) -> DeletionResult {
    match res {
        Ok(()) => DeletionResult::Deleted,
        Err(e) if e.is_not_found() => DeletionResult::Deleted,
        Err(ApiError::Unsupported(msg)) => DeletionResult::Unsupported(msg),
        Err(e) => DeletionResult::Failed(e.to_string()),
    }
}
