//! Alert configurations.
//!
//! Alert configurations have no natural key: two configurations are the
//! same when everything but their credentials is equal. The API redacts
//! credentials on read, so matched configurations carrying credentials are
//! resubmitted on every pass.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::{deletion_result, CategoryInput, CategoryReconciler, ReconcileConfig};
use crate::aggregate::{aggregate, Deletion};
use crate::context::Context;
use crate::diff::{self, Matcher};
use crate::error::SecretError;
use crate::remote::types::{
    AlertConfig, AlertConfigMatcher, AlertMetricThreshold, AlertNotification, AlertThreshold,
};
use crate::remote::{list_all, AlertConfigApi};
use crate::secrets::{read_secret_field, SecretStore};
use crate::spec::{AlertConfiguration, Notification, SecretRef};
use crate::state::Step;
use crate::status::{AlertConfigurationStatus, ConditionType, ProjectStatus};
use crate::workflow::{Outcome, Reason};

const API_TOKEN_FIELD: &str = "APIToken";
const DATADOG_API_KEY_FIELD: &str = "DatadogAPIKey";
const OPS_GENIE_API_KEY_FIELD: &str = "OpsGenieAPIKey";
const SERVICE_KEY_FIELD: &str = "ServiceKey";
const VICTOR_OPS_API_KEY_FIELD: &str = "VictorOpsAPIKey";
const VICTOR_OPS_ROUTING_KEY_FIELD: &str = "VictorOpsRoutingKey";

// ============================================================================
// Conversion and comparison
// ============================================================================

fn parse_threshold(raw: &str) -> Result<f64, String> {
    raw.trim()
        .parse()
        .map_err(|_| format!("threshold '{raw}' is not a number"))
}

fn to_notification(n: &Notification) -> AlertNotification {
    AlertNotification {
        type_name: n.type_name.clone(),
        interval_min: n.interval_min,
        delay_min: n.delay_min,
        email_enabled: n.email_enabled,
        sms_enabled: n.sms_enabled,
        email_address: n.email_address.clone(),
        mobile_number: n.mobile_number.clone(),
        channel_name: n.channel_name.clone(),
        team_id: n.team_id.clone(),
        username: n.username.clone(),
        roles: n.roles.clone(),
        datadog_region: n.datadog_region.clone(),
        ops_genie_region: n.ops_genie_region.clone(),
        api_token: n.api_token.clone(),
        datadog_api_key: n.datadog_api_key.clone(),
        ops_genie_api_key: n.ops_genie_api_key.clone(),
        service_key: n.service_key.clone(),
        victor_ops_api_key: n.victor_ops_api_key.clone(),
        victor_ops_routing_key: n.victor_ops_routing_key.clone(),
    }
}

/// Request body for a declared configuration. Fails when a threshold is
/// not a number.
fn to_remote(config: &AlertConfiguration) -> Result<AlertConfig, String> {
    let threshold = match &config.threshold {
        Some(t) => Some(AlertThreshold {
            operator: t.operator.clone(),
            units: t.units.clone(),
            threshold: parse_threshold(&t.threshold)?,
        }),
        None => None,
    };
    let metric_threshold = match &config.metric_threshold {
        Some(t) => Some(AlertMetricThreshold {
            metric_name: t.metric_name.clone(),
            operator: t.operator.clone(),
            threshold: parse_threshold(&t.threshold)?,
            units: t.units.clone(),
            mode: t.mode.clone(),
        }),
        None => None,
    };
    Ok(AlertConfig {
        event_type_name: config.event_type_name.clone(),
        enabled: config.enabled,
        matchers: config
            .matchers
            .iter()
            .map(|m| AlertConfigMatcher {
                field_name: m.field_name.clone(),
                operator: m.operator.clone(),
                value: m.value.clone(),
            })
            .collect(),
        threshold,
        metric_threshold,
        notifications: config.notifications.iter().map(to_notification).collect(),
        ..Default::default()
    })
}

fn without_credentials(mut n: AlertNotification) -> AlertNotification {
    n.api_token.clear();
    n.datadog_api_key.clear();
    n.ops_genie_api_key.clear();
    n.service_key.clear();
    n.victor_ops_api_key.clear();
    n.victor_ops_routing_key.clear();
    n
}

/// Everything that identifies a configuration, with matchers and
/// notifications in canonical order and credentials removed.
fn fingerprint(config: &AlertConfig) -> String {
    let mut matchers = config.matchers.clone();
    matchers.sort();
    let mut notifications: Vec<String> = config
        .notifications
        .iter()
        .cloned()
        .map(without_credentials)
        .map(|n| serde_json::to_string(&n).unwrap_or_default())
        .collect();
    notifications.sort();
    serde_json::json!({
        "eventTypeName": config.event_type_name,
        "enabled": config.enabled,
        "threshold": config.threshold,
        "metricThreshold": config.metric_threshold,
        "matchers": matchers,
        "notifications": notifications,
    })
    .to_string()
}

/// A declared configuration with its request body precomputed.
#[derive(Debug, Clone)]
struct PreparedAlert {
    declared: AlertConfiguration,
    request: Result<AlertConfig, String>,
}

impl PreparedAlert {
    fn new(declared: &AlertConfiguration) -> Self {
        Self {
            declared: declared.clone(),
            request: to_remote(declared),
        }
    }

    fn fingerprint(&self) -> Option<String> {
        self.request.as_ref().ok().map(fingerprint)
    }
}

struct AlertMatcher;

impl Matcher for AlertMatcher {
    type Desired = PreparedAlert;
    type Observed = AlertConfig;

    fn matches(&self, desired: &PreparedAlert, observed: &AlertConfig) -> bool {
        desired
            .fingerprint()
            .is_some_and(|fp| fp == fingerprint(observed))
    }

    fn desired_key(&self, desired: &PreparedAlert) -> Option<String> {
        desired.fingerprint()
    }

    fn observed_id(&self, observed: &AlertConfig) -> String {
        observed.id.clone()
    }
}

// ============================================================================
// Secret resolution
// ============================================================================

async fn resolve_field(
    store: &dyn SecretStore,
    reference: &Option<SecretRef>,
    namespace: &str,
    field: &str,
    target: &mut String,
) -> Result<(), SecretError> {
    if let Some(reference) = reference {
        *target = read_secret_field(store, reference, namespace, field).await?;
    }
    Ok(())
}

/// Fill every referenced credential from the secret store.
async fn resolve_credentials(
    store: &dyn SecretStore,
    config: &AlertConfiguration,
    namespace: &str,
) -> Result<AlertConfiguration, SecretError> {
    let mut resolved = config.clone();
    for n in &mut resolved.notifications {
        resolve_field(store, &n.api_token_ref, namespace, API_TOKEN_FIELD, &mut n.api_token).await?;
        resolve_field(store, &n.datadog_api_key_ref, namespace, DATADOG_API_KEY_FIELD, &mut n.datadog_api_key)
            .await?;
        resolve_field(store, &n.ops_genie_api_key_ref, namespace, OPS_GENIE_API_KEY_FIELD, &mut n.ops_genie_api_key)
            .await?;
        resolve_field(store, &n.service_key_ref, namespace, SERVICE_KEY_FIELD, &mut n.service_key).await?;
        resolve_field(store, &n.victor_ops_secret_ref, namespace, VICTOR_OPS_API_KEY_FIELD, &mut n.victor_ops_api_key)
            .await?;
        resolve_field(
            store,
            &n.victor_ops_secret_ref,
            namespace,
            VICTOR_OPS_ROUTING_KEY_FIELD,
            &mut n.victor_ops_routing_key,
        )
        .await?;
    }
    Ok(resolved)
}

// ============================================================================
// Reconciler
// ============================================================================

fn record(status: &mut AlertConfigurationStatus, config: &AlertConfig) {
    status.id = config.id.clone();
    status.created = config.created;
    status.updated = config.updated;
}

pub struct AlertConfigReconciler {
    api: Arc<dyn AlertConfigApi>,
    secrets: Arc<dyn SecretStore>,
    config: ReconcileConfig,
}

impl AlertConfigReconciler {
    pub fn new(api: Arc<dyn AlertConfigApi>, secrets: Arc<dyn SecretStore>, config: ReconcileConfig) -> Self {
        Self {
            api,
            secrets,
            config,
        }
    }

    fn new_status(alert: &PreparedAlert) -> AlertConfigurationStatus {
        AlertConfigurationStatus {
            event_type_name: alert.declared.event_type_name.clone(),
            enabled: alert.declared.enabled,
            ..Default::default()
        }
    }

    async fn create(&self, cx: &Context, project_id: &str, alert: &PreparedAlert) -> AlertConfigurationStatus {
        let mut status = Self::new_status(alert);
        let request = match &alert.request {
            Ok(request) => request,
            Err(message) => {
                status.phase = status.phase.next(&Step::Error);
                status.error_message = Some(message.clone());
                return status;
            }
        };
        match cx.call(self.api.create_alert_config(project_id, request)).await {
            Ok(created) => {
                info!(parent: &cx.span, "Created alert configuration {} for {}", created.id, request.event_type_name);
                record(&mut status, &created);
                status.phase = status.phase.next(&Step::Created);
            }
            Err(e) => {
                warn!(parent: &cx.span, "Failed to create alert configuration for {}: {}", request.event_type_name, e);
                status.phase = status.phase.next(&Step::Error);
                status.error_message = Some(format!("failed to create: {e}"));
            }
        }
        status
    }

    async fn update(
        &self,
        cx: &Context,
        project_id: &str,
        observed: &AlertConfig,
        alert: &PreparedAlert,
    ) -> AlertConfigurationStatus {
        let mut status = Self::new_status(alert);
        record(&mut status, observed);
        let request = match &alert.request {
            Ok(request) if alert.declared.has_credentials() => request,
            _ => {
                status.phase = status.phase.next(&Step::Synced);
                return status;
            }
        };
        debug!(parent: &cx.span, "Resubmitting credentials of alert configuration {}", observed.id);
        match cx
            .call(self.api.update_alert_config(project_id, &observed.id, request))
            .await
        {
            Ok(updated) => {
                record(&mut status, &updated);
                status.phase = status.phase.next(&Step::Synced);
            }
            Err(e) => {
                warn!(parent: &cx.span, "Failed to update alert configuration {}: {}", observed.id, e);
                status.phase = status.phase.next(&Step::Error);
                status.error_message = Some(format!("failed to update: {e}"));
            }
        }
        status
    }
}

#[async_trait]
impl CategoryReconciler for AlertConfigReconciler {
    fn condition(&self) -> ConditionType {
        ConditionType::AlertConfigurationReady
    }

    async fn reconcile(
        &self,
        cx: &Context,
        input: &CategoryInput<'_>,
        status: &mut ProjectStatus,
    ) -> Outcome {
        if !input.spec.alert_configuration_sync_enabled {
            return Outcome::NotConfigured;
        }
        let declared = &input.spec.alert_configurations;
        let owned_declared = &input.owned.spec().alert_configurations;
        if declared.is_empty() && owned_declared.is_empty() {
            status.alert_configurations.clear();
            return Outcome::NotConfigured;
        }

        let mut desired = Vec::with_capacity(declared.len());
        for config in declared {
            match resolve_credentials(self.secrets.as_ref(), config, input.namespace).await {
                Ok(resolved) => desired.push(PreparedAlert::new(&resolved)),
                Err(e) => return Outcome::failed(Reason::SecretUnavailable, e.to_string()),
            }
        }
        let owned: Vec<PreparedAlert> = owned_declared.iter().map(PreparedAlert::new).collect();

        let configs = match list_all(self.config.page_size, |page| {
            cx.call(self.api.list_alert_configs(input.project_id, page))
        })
        .await
        {
            Ok(configs) => configs,
            Err(e) => {
                return Outcome::failed(
                    Reason::AlertConfigurationNotReady,
                    format!("failed to list alert configurations: {e}"),
                )
            }
        };

        let plan = diff::compute(&AlertMatcher, &desired, &configs, &owned);
        debug!(
            parent: &cx.span,
            "Alert configurations: {} to create, {} to update, {} to delete",
            plan.to_create.len(),
            plan.to_update.len(),
            plan.to_delete.len()
        );

        let mut deletions = Vec::with_capacity(plan.to_delete.len());
        for config in &plan.to_delete {
            info!(parent: &cx.span, "Deleting alert configuration {} ({})", config.id, config.event_type_name);
            let result = deletion_result(
                cx.call(self.api.delete_alert_config(input.project_id, &config.id))
                    .await,
            );
            deletions.push(Deletion::new(
                format!("alert {} ({})", config.event_type_name, config.id),
                result,
            ));
        }

        let mut statuses = Vec::with_capacity(plan.to_create.len() + plan.to_update.len());
        for alert in &plan.to_create {
            statuses.push(self.create(cx, input.project_id, alert).await);
        }
        for (observed, alert) in &plan.to_update {
            statuses.push(self.update(cx, input.project_id, observed, alert).await);
        }

        let outcome = aggregate(
            &statuses,
            statuses.len(),
            &deletions,
            Reason::AlertConfigurationNotReady,
        );
        status.alert_configurations = statuses;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ownership::{self, Ownership};
    use crate::remote::memory::{MemoryRemote, Op};
    use crate::secrets::MemorySecretStore;
    use crate::spec::{AlertMatcher as DeclaredMatcher, ProjectSpec, Threshold};
    use crate::state::SyncPhase;
    use std::collections::BTreeMap;

    const PROJECT: &str = "p1";
    const NAMESPACE: &str = "team-a";

    fn make_alert(event: &str, threshold: &str) -> AlertConfiguration {
        AlertConfiguration {
            enabled: true,
            event_type_name: event.to_string(),
            matchers: vec![
                DeclaredMatcher {
                    field_name: "HOSTNAME_AND_PORT".to_string(),
                    operator: "EQUALS".to_string(),
                    value: "db-0:27017".to_string(),
                },
                DeclaredMatcher {
                    field_name: "REPLICA_SET_NAME".to_string(),
                    operator: "EQUALS".to_string(),
                    value: "rs0".to_string(),
                },
            ],
            threshold: Some(Threshold {
                operator: "GREATER_THAN".to_string(),
                units: "HOURS".to_string(),
                threshold: threshold.to_string(),
            }),
            notifications: vec![Notification {
                type_name: "GROUP".to_string(),
                interval_min: 5,
                email_enabled: Some(true),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn make_pager_duty(event: &str) -> AlertConfiguration {
        let mut alert = make_alert(event, "1");
        alert.notifications = vec![Notification {
            type_name: "PAGER_DUTY".to_string(),
            interval_min: 5,
            service_key_ref: Some(SecretRef {
                name: "pagerduty".to_string(),
                namespace: String::new(),
            }),
            ..Default::default()
        }];
        alert
    }

    fn make_spec(alerts: Vec<AlertConfiguration>) -> ProjectSpec {
        ProjectSpec {
            project_id: PROJECT.to_string(),
            alert_configuration_sync_enabled: true,
            alert_configurations: alerts,
            ..Default::default()
        }
    }

    fn owned(spec: &ProjectSpec) -> Ownership {
        let mut annotations = BTreeMap::new();
        ownership::record(&mut annotations, spec).unwrap();
        Ownership::from_annotations(&annotations).unwrap()
    }

    async fn run_with(
        remote: &Arc<MemoryRemote>,
        secrets: Arc<MemorySecretStore>,
        spec: &ProjectSpec,
        owned: &Ownership,
    ) -> (Outcome, ProjectStatus) {
        let reconciler = AlertConfigReconciler::new(remote.clone(), secrets, ReconcileConfig::default());
        let input = CategoryInput {
            project_id: PROJECT,
            namespace: NAMESPACE,
            spec,
            owned,
        };
        let mut status = ProjectStatus::default();
        let outcome = reconciler
            .reconcile(&Context::detached(), &input, &mut status)
            .await;
        (outcome, status)
    }

    async fn run(remote: &Arc<MemoryRemote>, spec: &ProjectSpec, owned: &Ownership) -> (Outcome, ProjectStatus) {
        run_with(remote, Arc::new(MemorySecretStore::new()), spec, owned).await
    }

    #[test]
    fn test_fingerprint_ignores_order_and_credentials() {
        let a = to_remote(&make_alert("HOST_DOWN", "1")).unwrap();
        let mut b = a.clone();
        b.matchers.reverse();
        b.id = "remote-id".to_string();
        b.notifications[0].service_key = "****".to_string();
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let c = to_remote(&make_alert("HOST_DOWN", "1.5")).unwrap();
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_threshold_string_compares_as_number() {
        let a = to_remote(&make_alert("HOST_DOWN", "1")).unwrap();
        let b = to_remote(&make_alert("HOST_DOWN", " 1.0")).unwrap();
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert!(to_remote(&make_alert("HOST_DOWN", "one")).is_err());
    }

    #[tokio::test]
    async fn test_sync_disabled_is_not_configured() {
        let remote = Arc::new(MemoryRemote::new());
        let mut spec = make_spec(vec![make_alert("HOST_DOWN", "1")]);
        spec.alert_configuration_sync_enabled = false;
        let (outcome, _) = run(&remote, &spec, &Ownership::default()).await;
        assert_eq!(outcome, Outcome::NotConfigured);
        assert!(remote.calls(Op::ListAlertConfigs).await.is_empty());
    }

    #[tokio::test]
    async fn test_create_and_idempotence() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_alert("HOST_DOWN", "1"), make_alert("OUTSIDE_METRIC_THRESHOLD", "2")]);
        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(status.alert_configurations.len(), 2);
        assert!(status.alert_configurations.iter().all(|s| !s.id.is_empty()));

        remote.reset_calls().await;
        let (outcome, _) = run(&remote, &spec, &owned(&spec)).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(remote.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_changed_config_replaces_owned_one() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_alert("HOST_DOWN", "1")]);
        run(&remote, &spec, &Ownership::default()).await;
        let old_id = remote.alert_configs(PROJECT).await[0].id.clone();

        let changed = make_spec(vec![make_alert("HOST_DOWN", "3")]);
        let (outcome, _) = run(&remote, &changed, &owned(&spec)).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(remote.calls(Op::DeleteAlertConfig).await, vec![old_id]);
        let stored = remote.alert_configs(PROJECT).await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].threshold.as_ref().map(|t| t.threshold), Some(3.0));
    }

    #[tokio::test]
    async fn test_credentials_resolved_and_resubmitted() {
        let remote = Arc::new(MemoryRemote::new());
        let secrets = Arc::new(MemorySecretStore::new());
        secrets
            .insert(NAMESPACE, "pagerduty", &[(SERVICE_KEY_FIELD, "pd-secret")])
            .await;
        let spec = make_spec(vec![make_pager_duty("HOST_DOWN")]);

        let (outcome, _) = run_with(&remote, secrets.clone(), &spec, &Ownership::default()).await;
        assert_eq!(outcome, Outcome::Ready);
        let stored = remote.alert_configs(PROJECT).await;
        assert_eq!(stored[0].notifications[0].service_key, "pd-secret");

        remote.reset_calls().await;
        let (outcome, _) = run_with(&remote, secrets, &spec, &owned(&spec)).await;
        assert_eq!(outcome, Outcome::Ready);
        assert_eq!(remote.calls(Op::UpdateAlertConfig).await, vec![stored[0].id.clone()]);
        assert!(remote.calls(Op::CreateAlertConfig).await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_secret_fails_category() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_pager_duty("HOST_DOWN")]);
        let (outcome, _) = run(&remote, &spec, &Ownership::default()).await;
        match outcome {
            Outcome::Failed { reason, message } => {
                assert_eq!(reason, Reason::SecretUnavailable);
                assert!(message.contains("team-a/pagerduty"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(remote.mutation_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_threshold_fails_only_that_item() {
        let remote = Arc::new(MemoryRemote::new());
        let spec = make_spec(vec![make_alert("HOST_DOWN", "lots"), make_alert("NO_PRIMARY", "1")]);
        let (outcome, status) = run(&remote, &spec, &Ownership::default()).await;
        match outcome {
            Outcome::Failed { message, .. } => assert!(message.contains("threshold 'lots' is not a number")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(status.alert_configurations[0].phase, SyncPhase::Failed);
        assert_eq!(status.alert_configurations[1].phase, SyncPhase::Synced);
        assert_eq!(remote.alert_configs(PROJECT).await.len(), 1);
    }

    #[tokio::test]
    async fn test_unowned_configs_are_left_alone() {
        let remote = Arc::new(MemoryRemote::new());
        remote
            .insert_alert_config(
                PROJECT,
                AlertConfig {
                    event_type_name: "JOINED_GROUP".to_string(),
                    enabled: true,
                    ..Default::default()
                },
            )
            .await;
        let spec = make_spec(vec![make_alert("HOST_DOWN", "1")]);
        run(&remote, &spec, &owned(&spec)).await;
        assert!(remote.calls(Op::DeleteAlertConfig).await.is_empty());
        assert_eq!(remote.alert_configs(PROJECT).await.len(), 2);
    }
}
