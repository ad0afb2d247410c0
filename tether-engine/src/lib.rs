pub mod aggregate;
pub mod batch;
pub mod context;
pub mod cycle;
pub mod diff;
pub mod error;
pub mod ownership;
pub mod project;
pub mod provider;
pub mod reconciler;
pub mod remote;
pub mod secrets;
pub mod spec;
pub mod state;
pub mod status;
pub mod store;
pub mod workflow;

pub use context::Context;
pub use cycle::{CycleReport, ProjectReconciler};
pub use error::{ApiError, ApiResult, EngineError, SecretError, SnapshotError, StoreError};
pub use ownership::{Ownership, LAST_APPLIED_ANNOTATION};
pub use project::{ManagedProject, ObjectMeta, ProjectKey};
pub use reconciler::{CategoryReconciler, ReconcileConfig};
pub use remote::RemoteApi;
pub use secrets::{FileSecretStore, MemorySecretStore, SecretStore};
pub use status::{Condition, ConditionStatus, ConditionType, ProjectStatus};
pub use store::{FileProjectStore, ProjectStore};
pub use workflow::{Action, Outcome, Reason, RetryPolicy};
