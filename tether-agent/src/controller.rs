//! Worker pool and requeue scheduler.
//!
//! Every managed project is enqueued on each resync tick. At most `workers`
//! cycles run at once and a project is never processed by two workers at
//! the same time. The action a cycle returns decides when the project runs
//! again.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tether_engine::{
    Action, Context, CycleReport, EngineError, ProjectKey, ProjectReconciler, ProjectStore,
};
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn};

use crate::backoff::Backoff;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub workers: usize,
    pub resync_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

type Worker = (ProjectKey, Result<Processed, EngineError>);

/// Result of one worker run.
enum Processed {
    /// A cycle ran against the given generation.
    Cycle(CycleReport, i64),
    /// Parked on a terminal outcome and the declaration has not changed.
    Skipped,
}

pub struct Controller {
    store: Arc<dyn ProjectStore>,
    reconciler: Arc<ProjectReconciler>,
    config: ControllerConfig,
    backoff: Backoff,
    /// Due time per queued project.
    queue: BTreeMap<ProjectKey, Instant>,
    in_flight: HashSet<ProjectKey>,
    /// Project each running worker task belongs to.
    tasks: HashMap<task::Id, ProjectKey>,
    /// Generation at which a project ended in a no-retry outcome.
    parked: HashMap<ProjectKey, i64>,
}

impl Controller {
    pub fn new(
        store: Arc<dyn ProjectStore>,
        reconciler: Arc<ProjectReconciler>,
        config: ControllerConfig,
    ) -> Self {
        let backoff = Backoff::new(config.backoff_base, config.backoff_max);
        Self {
            store,
            reconciler,
            config,
            backoff,
            queue: BTreeMap::new(),
            in_flight: HashSet::new(),
            tasks: HashMap::new(),
            parked: HashMap::new(),
        }
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let mut resync = interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut workers: JoinSet<Worker> = JoinSet::new();

        info!(
            "Controller started with {} workers, resync every {:?}",
            self.config.workers, self.config.resync_interval
        );

        loop {
            self.dispatch(&mut workers, &shutdown);
            // With every worker busy only a finishing cycle can make progress.
            let due = if workers.len() < self.worker_limit() {
                self.next_due()
            } else {
                None
            };
            let wake = due.unwrap_or_else(|| Instant::now() + self.config.resync_interval);

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = resync.tick() => self.enqueue_all().await,
                Some(joined) = workers.join_next_with_id() => self.reap(joined),
                _ = sleep_until(wake) => {}
            }
        }

        info!("Waiting for {} in-flight cycles to stop", workers.len());
        while let Some(joined) = workers.join_next_with_id().await {
            self.reap(joined);
        }
    }

    /// Run one cycle for every project. Returns whether all of them settled.
    pub async fn run_once(&mut self, shutdown: CancellationToken) -> anyhow::Result<bool> {
        let keys = self.store.list().await?;
        info!("Reconciling {} projects once", keys.len());

        let mut workers = JoinSet::new();
        let mut pending = keys.into_iter();
        let mut converged = true;
        loop {
            while workers.len() < self.worker_limit() {
                let Some(key) = pending.next() else { break };
                let store = self.store.clone();
                let reconciler = self.reconciler.clone();
                let cancel = shutdown.child_token();
                workers.spawn(async move {
                    let result = process(&*store, &reconciler, &key, None, cancel).await;
                    (key, result)
                });
            }
            let Some(joined) = workers.join_next().await else {
                break;
            };
            let (key, result) = joined?;
            match result {
                Ok(Processed::Cycle(report, _)) if report.is_settled() => {}
                Ok(Processed::Cycle(report, _)) => {
                    info!("Project {} not converged: {:?}", key, report.action);
                    converged = false;
                }
                Ok(Processed::Skipped) => {}
                Err(e) => {
                    warn!("Project {} failed: {}", key, e);
                    converged = false;
                }
            }
        }
        Ok(converged)
    }

    fn worker_limit(&self) -> usize {
        self.config.workers.max(1)
    }

    async fn enqueue_all(&mut self) {
        match self.store.list().await {
            Ok(keys) => {
                debug!("Resync: {} projects", keys.len());
                let now = Instant::now();
                let listed: HashSet<&ProjectKey> = keys.iter().collect();
                self.parked.retain(|k, _| listed.contains(k));
                for key in keys {
                    // Keep an earlier retry if one is already queued.
                    let due = self.queue.entry(key).or_insert(now);
                    *due = (*due).min(now);
                }
            }
            Err(e) => warn!("Failed to list projects: {}", e),
        }
    }

    fn next_due(&self) -> Option<Instant> {
        self.queue
            .iter()
            .filter(|(k, _)| !self.in_flight.contains(*k))
            .map(|(_, due)| *due)
            .min()
    }

    fn dispatch(
        &mut self,
        workers: &mut JoinSet<Worker>,
        shutdown: &CancellationToken,
    ) {
        let now = Instant::now();
        let ready: Vec<ProjectKey> = self
            .queue
            .iter()
            .filter(|(k, due)| **due <= now && !self.in_flight.contains(*k))
            .map(|(k, _)| k.clone())
            .collect();

        for key in ready {
            if workers.len() >= self.worker_limit() {
                break;
            }
            self.queue.remove(&key);
            self.in_flight.insert(key.clone());

            let store = self.store.clone();
            let reconciler = self.reconciler.clone();
            let parked = self.parked.get(&key).copied();
            let cancel = shutdown.child_token();
            let owner = key.clone();
            let handle = workers.spawn(async move {
                let result = process(&*store, &reconciler, &key, parked, cancel).await;
                (key, result)
            });
            self.tasks.insert(handle.id(), owner);
        }
    }

    /// Handle a joined worker. A worker that panicked releases its project
    /// and retries it with backoff.
    fn reap(&mut self, joined: Result<(task::Id, Worker), JoinError>) {
        match joined {
            Ok((id, (key, result))) => {
                self.tasks.remove(&id);
                self.finish(key, result);
            }
            Err(e) => {
                let Some(key) = self.tasks.remove(&e.id()) else {
                    error!("Worker task failed: {}", e);
                    return;
                };
                self.in_flight.remove(&key);
                let delay = self.backoff.next_delay(&key);
                error!("Worker for {} failed: {}; retrying in {:?}", key, e, delay);
                self.requeue(key, delay);
            }
        }
    }

    fn finish(&mut self, key: ProjectKey, result: Result<Processed, EngineError>) {
        self.in_flight.remove(&key);
        let (report, generation) = match result {
            Ok(Processed::Cycle(report, generation)) => (report, generation),
            Ok(Processed::Skipped) => return,
            Err(EngineError::Cancelled) => {
                debug!("Cycle for {} cancelled", key);
                return;
            }
            Err(EngineError::Store(tether_engine::StoreError::NotFound(_))) => {
                debug!("Project {} is gone", key);
                self.backoff.reset(&key);
                self.parked.remove(&key);
                return;
            }
            Err(e) => {
                let delay = self.backoff.next_delay(&key);
                warn!("Cycle for {} failed: {}; retrying in {:?}", key, e, delay);
                self.requeue(key, delay);
                return;
            }
        };

        match report.action {
            Action::Done => {
                self.backoff.reset(&key);
                self.parked.remove(&key);
            }
            Action::NoRetry => {
                self.backoff.reset(&key);
                info!("Project {} needs manual intervention; not retrying", key);
                self.park(key, generation);
            }
            Action::RequeueAfter(delay) => {
                self.backoff.reset(&key);
                self.parked.remove(&key);
                self.requeue(key, delay);
            }
            Action::Backoff => {
                self.parked.remove(&key);
                let delay = self.backoff.next_delay(&key);
                debug!("Project {} backing off for {:?}", key, delay);
                self.requeue(key, delay);
            }
        }
    }

    fn requeue(&mut self, key: ProjectKey, delay: Duration) {
        let due = Instant::now() + delay;
        let entry = self.queue.entry(key).or_insert(due);
        *entry = (*entry).min(due);
    }

    /// Remember the generation a no-retry cycle ran against.
    fn park(&mut self, key: ProjectKey, generation: i64) {
        self.parked.insert(key, generation);
    }
}

/// Load, reconcile and save one project.
async fn process(
    store: &dyn ProjectStore,
    reconciler: &ProjectReconciler,
    key: &ProjectKey,
    parked_generation: Option<i64>,
    cancel: CancellationToken,
) -> Result<Processed, EngineError> {
    let mut project = store.load(key).await?;
    if parked_generation == Some(project.metadata.generation) {
        debug!("Project {} unchanged since last terminal outcome", key);
        return Ok(Processed::Skipped);
    }

    let span = info_span!(
        "project",
        namespace = %key.namespace,
        name = %key.name,
        project_id = %project.spec.project_id
    );
    let cx = Context::new(cancel, span);
    let report = reconciler.reconcile(&cx, &mut project).await?;
    store.save_status(&project).await?;
    Ok(Processed::Cycle(report, project.metadata.generation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_engine::remote::memory::{MemoryRemote, Op};
    use tether_engine::{
        ApiError, ConditionStatus, ConditionType, FileProjectStore, MemorySecretStore,
        ReconcileConfig, LAST_APPLIED_ANNOTATION,
    };

    const PROJECT: &str = r#"{
        "metadata": {"name": "app", "generation": 2},
        "spec": {
            "projectId": "p1",
            "customRoles": [{"name": "reader", "inheritedRoles": [{"name": "read", "database": "admin"}]}]
        }
    }"#;

    fn make_config() -> ControllerConfig {
        ControllerConfig {
            workers: 2,
            resync_interval: Duration::from_secs(60),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    fn make_controller(root: &std::path::Path, remote: &Arc<MemoryRemote>) -> Controller {
        let store = Arc::new(FileProjectStore::new(root));
        let reconciler = ProjectReconciler::new(
            remote.clone(),
            Arc::new(MemorySecretStore::new()),
            ReconcileConfig::default(),
        );
        Controller::new(store, Arc::new(reconciler), make_config())
    }

    fn write_project(root: &std::path::Path) {
        std::fs::create_dir_all(root.join("team-a")).unwrap();
        std::fs::write(root.join("team-a").join("app.json"), PROJECT).unwrap();
    }

    fn make_report(action: Action) -> CycleReport {
        CycleReport {
            action,
            outcomes: Vec::new(),
            snapshot_recorded: false,
        }
    }

    #[tokio::test]
    async fn test_run_once_converges_and_saves() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let remote = Arc::new(MemoryRemote::new());
        let mut controller = make_controller(dir.path(), &remote);

        let converged = controller.run_once(CancellationToken::new()).await.unwrap();
        assert!(converged);
        assert_eq!(remote.custom_roles("p1").await.len(), 1);

        let saved = FileProjectStore::new(dir.path())
            .load(&ProjectKey::new("team-a", "app"))
            .await
            .unwrap();
        assert_eq!(saved.status.observed_generation, 2);
        assert_eq!(
            saved.status.condition(ConditionType::Ready).map(|c| c.status),
            Some(ConditionStatus::True)
        );
        assert!(saved.metadata.annotations.contains_key(LAST_APPLIED_ANNOTATION));
    }

    #[tokio::test]
    async fn test_run_once_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let remote = Arc::new(MemoryRemote::new());
        remote
            .fail(Op::CreateCustomRole, None, ApiError::Transient("down".to_string()))
            .await;
        let mut controller = make_controller(dir.path(), &remote);

        let converged = controller.run_once(CancellationToken::new()).await.unwrap();
        assert!(!converged);
    }

    #[tokio::test]
    async fn test_actions_schedule_next_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let mut controller = make_controller(dir.path(), &remote);
        let key = ProjectKey::new("ns", "p");

        controller.in_flight.insert(key.clone());
        controller.finish(key.clone(), Ok(Processed::Cycle(make_report(Action::Backoff), 1)));
        assert!(controller.in_flight.is_empty());
        let first = controller.queue[&key];
        assert!(first > Instant::now() + Duration::from_secs(4));

        controller.queue.clear();
        controller.finish(key.clone(), Ok(Processed::Cycle(make_report(Action::Backoff), 1)));
        assert!(controller.queue[&key] > Instant::now() + Duration::from_secs(9));

        controller.queue.clear();
        controller.finish(
            key.clone(),
            Ok(Processed::Cycle(
                make_report(Action::RequeueAfter(Duration::from_secs(1))),
                1,
            )),
        );
        assert!(controller.queue[&key] <= Instant::now() + Duration::from_secs(1));

        controller.queue.clear();
        controller.finish(key.clone(), Ok(Processed::Cycle(make_report(Action::NoRetry), 3)));
        assert!(controller.queue.is_empty());
        assert_eq!(controller.parked.get(&key), Some(&3));

        controller.finish(key.clone(), Ok(Processed::Cycle(make_report(Action::Done), 4)));
        assert!(controller.queue.is_empty());
        assert!(controller.parked.is_empty());
    }

    #[tokio::test]
    async fn test_panicked_worker_releases_project() {
        let dir = tempfile::tempdir().unwrap();
        let remote = Arc::new(MemoryRemote::new());
        let mut controller = make_controller(dir.path(), &remote);
        let key = ProjectKey::new("ns", "p");

        fn explode() -> Worker {
            panic!("worker blew up")
        }
        let mut workers: JoinSet<Worker> = JoinSet::new();
        let handle = workers.spawn(async { explode() });
        controller.tasks.insert(handle.id(), key.clone());
        controller.in_flight.insert(key.clone());

        let joined = workers.join_next_with_id().await.unwrap();
        assert!(joined.is_err());
        controller.reap(joined);

        assert!(controller.in_flight.is_empty());
        assert!(controller.tasks.is_empty());
        assert!(controller.queue[&key] > Instant::now() + Duration::from_secs(4));
        assert!(controller.next_due().is_some());
    }

    #[tokio::test]
    async fn test_parked_project_is_skipped_until_changed() {
        let dir = tempfile::tempdir().unwrap();
        write_project(dir.path());
        let remote = Arc::new(MemoryRemote::new());
        let store = FileProjectStore::new(dir.path());
        let reconciler = ProjectReconciler::new(
            remote.clone(),
            Arc::new(MemorySecretStore::new()),
            ReconcileConfig::default(),
        );
        let key = ProjectKey::new("team-a", "app");

        let skipped = process(&store, &reconciler, &key, Some(2), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(skipped, Processed::Skipped));
        assert!(remote.calls(Op::ListCustomRoles).await.is_empty());

        let ran = process(&store, &reconciler, &key, Some(1), CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(ran, Processed::Cycle(_, 2)));
    }
}
