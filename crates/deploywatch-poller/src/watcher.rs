//! Watch jobs: discovery and status polling wired onto the scheduler.
//!
//! ```text
//! discovery (adaptive)  ── list/add deployments ──► Aggregator
//! status-batch | fan-out ── instance statuses ────► Aggregator ──► render channel
//! ```
//!
//! Every job swallows its own errors: failures are logged and fed to the
//! job's backoff controller, and the job runs again on its next tick.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use deploywatch_core::{
    ConfigError, DeploymentTracker, FleetInventory, PollIntervals, ServiceError, StatusMode,
    WatchConfig, partition,
};
use deploywatch_state::{Aggregator, DedupSet};

use crate::backoff::Backoff;
use crate::scheduler::{Cadence, Flow, Scheduler};

/// Key of a per-instance status poller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceKey {
    pub deployment_id: String,
    pub instance_id: String,
}

impl InstanceKey {
    pub fn new(deployment_id: &str, instance_id: &str) -> Self {
        Self {
            deployment_id: deployment_id.to_string(),
            instance_id: instance_id.to_string(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.deployment_id, self.instance_id)
    }
}

/// Drives discovery and status checks for one dashboard.
pub struct Watcher<S> {
    service: Arc<S>,
    aggregator: Arc<Aggregator>,
    config: WatchConfig,
    intervals: PollIntervals,
    /// Deployment ids to keep re-discovering: seeds plus filter matches.
    watch_set: DedupSet,
    /// (deployment, instance) pairs that reached a terminal status. An
    /// instance shared by several deployments is tracked once per deployment.
    done: DedupSet<InstanceKey>,
    discovery_backoff: Arc<Backoff>,
    status_backoff: Arc<Backoff>,
    frames: mpsc::Sender<Vec<u8>>,
}

impl<S> Watcher<S>
where
    S: DeploymentTracker + FleetInventory + 'static,
{
    pub fn new(
        service: Arc<S>,
        aggregator: Arc<Aggregator>,
        config: WatchConfig,
        frames: mpsc::Sender<Vec<u8>>,
    ) -> Result<Self, ConfigError> {
        let intervals = config.validate()?;
        Ok(Self {
            service,
            aggregator,
            discovery_backoff: Arc::new(Backoff::for_cadence(intervals.discovery, &intervals)),
            status_backoff: Arc::new(Backoff::for_cadence(intervals.status, &intervals)),
            config,
            intervals,
            watch_set: DedupSet::new(),
            done: DedupSet::new(),
            frames,
        })
    }

    /// Add deployment ids to watch regardless of the discovery filter.
    pub fn seed<I: IntoIterator<Item = String>>(&self, ids: I) {
        for id in ids {
            self.watch_set.add(id);
        }
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn status_backoff(&self) -> &Arc<Backoff> {
        &self.status_backoff
    }

    pub fn discovery_backoff(&self) -> &Arc<Backoff> {
        &self.discovery_backoff
    }

    /// Register discovery and status jobs for the configured status mode.
    pub fn start(self: Arc<Self>, scheduler: &Arc<Scheduler>) {
        let watcher = Arc::clone(&self);
        scheduler.register("discovery", Arc::clone(&self.discovery_backoff), move || {
            let watcher = Arc::clone(&watcher);
            async move { watcher.discover().await }
        });

        match self.config.poll.status_mode {
            StatusMode::Batch => {
                let watcher = Arc::clone(&self);
                scheduler.register("status-batch", Arc::clone(&self.status_backoff), move || {
                    let watcher = Arc::clone(&watcher);
                    async move { watcher.poll_batches().await }
                });
            }
            StatusMode::PerInstance => {
                let watcher = Arc::clone(&self);
                let sched = Arc::clone(scheduler);
                scheduler.register("fan-out", self.intervals.fan_out, move || {
                    let watcher = Arc::clone(&watcher);
                    let sched = Arc::clone(&sched);
                    async move {
                        watcher.fan_out(&sched);
                    }
                });
            }
        }

        info!(
            mode = ?self.config.poll.status_mode,
            discovery_ms = self.intervals.discovery.as_millis() as u64,
            status_ms = self.intervals.status.as_millis() as u64,
            "watch jobs started"
        );
    }

    /// One discovery pass: match the filter, then (re)add every watched deployment.
    pub async fn discover(&self) {
        if let Some(application) = self.config.filter.application.as_deref() {
            let groups: Vec<Option<&str>> = if self.config.filter.groups.is_empty() {
                vec![None]
            } else {
                self.config.filter.groups.iter().map(|g| Some(g.as_str())).collect()
            };
            for group in groups {
                match self
                    .service
                    .list_deployments(Some(application), group, &self.config.filter.statuses)
                    .await
                {
                    Ok(ids) => self.seed(ids),
                    Err(e) => {
                        warn!(%application, group = group.unwrap_or(""), error = %e, "listing deployments failed");
                        self.discovery_backoff.throttle();
                    }
                }
            }
        }

        let mut ids = self.watch_set.list();
        ids.sort();

        let mut changed = false;
        for deployment_id in ids {
            match self.aggregator.add_deployment(&*self.service, &deployment_id).await {
                Ok(found) if !found.is_empty() => {
                    info!(
                        %deployment_id,
                        new_deployment = found.new_deployment,
                        new_instances = found.new_instances.len(),
                        "discovered"
                    );
                    changed = true;
                }
                Ok(_) => {}
                Err(ServiceError::NotFound(_)) => {
                    warn!(%deployment_id, "deployment not found, retrying on next discovery");
                }
                Err(e) => {
                    warn!(%deployment_id, error = %e, "discovery failed");
                    if e.is_throttling() {
                        self.discovery_backoff.throttle();
                    }
                }
            }
        }

        if changed {
            self.publish(self.aggregator.render()).await;
        }
    }

    /// Batch-poll every deployment's still-pending instances.
    pub async fn poll_batches(&self) {
        for deployment_id in self.aggregator.deployment_ids() {
            self.poll_deployment(&deployment_id).await;
        }
    }

    /// Batch-poll one deployment's still-pending instances.
    pub async fn poll_deployment(&self, deployment_id: &str) {
        let pending: Vec<String> = self
            .pending_instances(deployment_id)
            .into_iter()
            .map(|key| key.instance_id)
            .collect();
        if pending.is_empty() {
            return;
        }

        for chunk in partition(&pending, self.config.poll.batch_size) {
            match self
                .service
                .batch_get_instance_status(deployment_id, &chunk)
                .await
            {
                Ok(summaries) => {
                    let frame = self.aggregator.batch_update(summaries);
                    self.mark_done(deployment_id, &chunk);
                    self.publish(frame).await;
                }
                Err(e) => {
                    warn!(%deployment_id, instances = chunk.len(), error = %e, "batch status check failed");
                    self.status_backoff.throttle();
                }
            }
        }
    }

    /// Poll one instance. Finishes once the instance is terminal.
    pub async fn check_instance(&self, key: &InstanceKey) -> Flow {
        match self
            .service
            .get_instance_status(&key.deployment_id, &key.instance_id)
            .await
        {
            Ok(summary) => {
                let frame = self.aggregator.update(summary);
                self.publish(frame).await;
                if self.aggregator.is_instance_done(&key.instance_id) {
                    self.done.add(key.clone());
                    debug!(instance = %key, "instance done");
                    Flow::Finished
                } else {
                    Flow::Continue
                }
            }
            Err(e) => {
                warn!(instance = %key, error = %e, "status check failed");
                self.status_backoff.throttle();
                Flow::Continue
            }
        }
    }

    /// Register a keyed poller for every pending instance without one.
    ///
    /// Returns how many pollers were started.
    pub fn fan_out(self: &Arc<Self>, scheduler: &Scheduler) -> usize {
        let mut started = 0;
        for deployment_id in self.aggregator.deployment_ids() {
            for key in self.pending_instances(&deployment_id) {
                if scheduler.active_count() >= self.config.poll.max_instance_pollers {
                    debug!("instance poller limit reached");
                    return started;
                }
                let watcher = Arc::clone(self);
                let registered = scheduler.register_keyed(
                    Cadence::Adaptive(Arc::clone(&self.status_backoff)),
                    key,
                    move |key: InstanceKey| {
                        let watcher = Arc::clone(&watcher);
                        async move { watcher.check_instance(&key).await }
                    },
                );
                if registered {
                    started += 1;
                }
            }
        }
        if started > 0 {
            debug!(started, "instance pollers started");
        }
        started
    }

    /// Whether the instance finished within this deployment.
    pub fn is_done(&self, deployment_id: &str, instance_id: &str) -> bool {
        self.done.has(&InstanceKey::new(deployment_id, instance_id))
    }

    /// Tracked instances of `deployment_id` not yet terminal there, sorted by instance id.
    fn pending_instances(&self, deployment_id: &str) -> Vec<InstanceKey> {
        let tracked: DedupSet<InstanceKey> = self
            .aggregator
            .instance_ids(deployment_id)
            .iter()
            .map(|id| InstanceKey::new(deployment_id, id))
            .collect();
        let mut pending = tracked.difference(&self.done);
        pending.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        pending
    }

    fn mark_done(&self, deployment_id: &str, instance_ids: &[String]) {
        for id in instance_ids {
            if self.aggregator.is_instance_done(id) {
                self.done.add(InstanceKey::new(deployment_id, id));
            }
        }
    }

    async fn publish(&self, frame: Vec<u8>) {
        if self.frames.send(frame).await.is_err() {
            debug!("render channel closed, dropping frame");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use deploywatch_core::{
        Deployment, DisplayMode, DisplayOptions, Instance, InstanceStatus, ServiceResult,
        StatusSummary,
    };

    use super::*;

    #[derive(Default)]
    struct MockService {
        /// deployment id → instance ids
        deployments: Mutex<HashMap<String, Vec<String>>>,
        statuses: Mutex<HashMap<String, InstanceStatus>>,
        listed: Vec<String>,
        fail_list: AtomicBool,
        fail_status: AtomicBool,
        batch_calls: Mutex<Vec<Vec<String>>>,
    }

    impl MockService {
        fn with_deployment(self, id: &str, instances: &[&str]) -> Self {
            self.add_deployment(id, instances);
            self
        }

        fn add_deployment(&self, id: &str, instances: &[&str]) {
            self.deployments
                .lock()
                .unwrap()
                .insert(id.to_string(), instances.iter().map(|s| s.to_string()).collect());
        }

        fn set_status(&self, instance_id: &str, status: InstanceStatus) {
            self.statuses.lock().unwrap().insert(instance_id.to_string(), status);
        }

        fn summary(&self, deployment_id: &str, instance_id: &str) -> StatusSummary {
            StatusSummary {
                instance_id: format!("{deployment_id}/{instance_id}"),
                status: self
                    .statuses
                    .lock()
                    .unwrap()
                    .get(instance_id)
                    .cloned()
                    .unwrap_or(InstanceStatus::Pending),
                instance_type: None,
                last_updated_at: None,
                lifecycle_events: vec![],
            }
        }
    }

    impl DeploymentTracker for MockService {
        async fn list_deployments(
            &self,
            _application: Option<&str>,
            _group: Option<&str>,
            _statuses: &[String],
        ) -> ServiceResult<Vec<String>> {
            if self.fail_list.load(Ordering::SeqCst) {
                return Err(ServiceError::Transient("rate exceeded".to_string()));
            }
            Ok(self.listed.clone())
        }

        async fn get_deployment(&self, id: &str) -> ServiceResult<Deployment> {
            if !self.deployments.lock().unwrap().contains_key(id) {
                return Err(ServiceError::NotFound(id.to_string()));
            }
            Ok(Deployment {
                id: id.to_string(),
                application: "web".to_string(),
                group: "prod".to_string(),
                status: "InProgress".to_string(),
            })
        }

        async fn list_deployment_instances(&self, id: &str) -> ServiceResult<Vec<String>> {
            self.deployments
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| ServiceError::NotFound(id.to_string()))
        }

        async fn get_instance_status(&self, d: &str, i: &str) -> ServiceResult<StatusSummary> {
            if self.fail_status.load(Ordering::SeqCst) {
                return Err(ServiceError::Transient("timeout".to_string()));
            }
            Ok(self.summary(d, i))
        }

        async fn batch_get_instance_status(
            &self,
            d: &str,
            ids: &[String],
        ) -> ServiceResult<Vec<StatusSummary>> {
            if self.fail_status.load(Ordering::SeqCst) {
                return Err(ServiceError::Transient("timeout".to_string()));
            }
            self.batch_calls.lock().unwrap().push(ids.to_vec());
            Ok(ids.iter().map(|i| self.summary(d, i)).collect())
        }
    }

    impl FleetInventory for MockService {
        async fn describe_instances(&self, ids: &[String]) -> ServiceResult<Vec<Instance>> {
            Ok(ids
                .iter()
                .map(|id| {
                    let mut inst = Instance {
                        id: id.clone(),
                        ..Default::default()
                    };
                    inst.tags.insert("Name".to_string(), format!("host-{id}"));
                    inst
                })
                .collect())
        }
    }

    fn watcher(
        service: MockService,
        config: WatchConfig,
    ) -> (Arc<Watcher<MockService>>, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(64);
        let aggregator = Arc::new(Aggregator::new(DisplayOptions {
            mode: DisplayMode::Compact,
            ..Default::default()
        }));
        let watcher = Watcher::new(Arc::new(service), aggregator, config, tx).unwrap();
        (Arc::new(watcher), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<Vec<u8>>) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(String::from_utf8(frame).unwrap());
        }
        frames
    }

    #[test]
    fn instance_key_display() {
        let key = InstanceKey {
            deployment_id: "d-1".to_string(),
            instance_id: "i-1".to_string(),
        };
        assert_eq!(key.to_string(), "d-1/i-1");
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = WatchConfig::default();
        config.poll.batch_size = 0;
        let (tx, _rx) = mpsc::channel(1);
        let aggregator = Arc::new(Aggregator::new(DisplayOptions::default()));
        assert!(Watcher::new(Arc::new(MockService::default()), aggregator, config, tx).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn discover_tracks_seeded_deployments() {
        let service = MockService::default().with_deployment("d-1", &["i-2", "i-1"]);
        let (watcher, mut rx) = watcher(service, WatchConfig::default());
        watcher.seed(["d-1".to_string()]);

        watcher.discover().await;
        assert_eq!(watcher.aggregator().deployment_ids(), vec!["d-1"]);
        assert_eq!(watcher.aggregator().instance_ids("d-1"), vec!["i-1", "i-2"]);

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].starts_with("d-1 web-prod (0/2)"));

        // Nothing new on the second pass, so nothing is published.
        watcher.discover().await;
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn discover_follows_application_filter() {
        let service = MockService {
            listed: vec!["d-7".to_string()],
            ..Default::default()
        }
        .with_deployment("d-7", &["i-1"]);
        let mut config = WatchConfig::default();
        config.filter.application = Some("web".to_string());
        let (watcher, _rx) = watcher(service, config);

        watcher.discover().await;
        assert_eq!(watcher.aggregator().deployment_ids(), vec!["d-7"]);
    }

    #[tokio::test(start_paused = true)]
    async fn listing_failure_throttles_discovery() {
        let service = MockService::default();
        service.fail_list.store(true, Ordering::SeqCst);
        let mut config = WatchConfig::default();
        config.filter.application = Some("web".to_string());
        config.filter.groups = vec!["blue".to_string(), "green".to_string()];
        let (watcher, _rx) = watcher(service, config);

        watcher.discover().await;
        assert!(watcher.discovery_backoff().current() > Duration::from_secs(10));
        assert_eq!(watcher.status_backoff().current(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_deployment_is_retried_next_pass() {
        let (watcher, _rx) = watcher(MockService::default(), WatchConfig::default());
        watcher.seed(["d-late".to_string()]);

        watcher.discover().await;
        assert!(watcher.aggregator().deployment_ids().is_empty());
        assert_eq!(watcher.discovery_backoff().current(), Duration::from_secs(10));

        watcher.service.add_deployment("d-late", &["i-1"]);
        watcher.discover().await;
        assert_eq!(watcher.aggregator().deployment_ids(), vec!["d-late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_poll_skips_finished_instances() {
        let service = MockService::default().with_deployment("d-1", &["i-1", "i-2"]);
        service.set_status("i-1", InstanceStatus::Succeeded);
        service.set_status("i-2", InstanceStatus::InProgress);
        let (watcher, mut rx) = watcher(service, WatchConfig::default());
        watcher.seed(["d-1".to_string()]);
        watcher.discover().await;

        watcher.poll_batches().await;
        assert!(watcher.is_done("d-1", "i-1"));
        assert!(!watcher.is_done("d-1", "i-2"));
        let frames = drain(&mut rx);
        assert!(frames.last().unwrap().starts_with("d-1 web-prod (1/2)"));

        watcher.poll_batches().await;
        let calls = watcher.service.batch_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec!["i-1".to_string(), "i-2".to_string()], vec!["i-2".to_string()]]);
    }

    #[tokio::test(start_paused = true)]
    async fn shared_instance_is_polled_for_each_deployment() {
        let service = MockService::default().with_deployment("d-1", &["i-1"]);
        service.set_status("i-1", InstanceStatus::Succeeded);
        let (watcher, mut rx) = watcher(service, WatchConfig::default());
        watcher.seed(["d-1".to_string()]);
        watcher.discover().await;
        watcher.poll_batches().await;
        assert!(watcher.is_done("d-1", "i-1"));

        // A later deployment rolls out to the same instance.
        watcher.service.add_deployment("d-2", &["i-1"]);
        watcher.service.set_status("i-1", InstanceStatus::InProgress);
        watcher.seed(["d-2".to_string()]);
        watcher.discover().await;
        assert!(!watcher.is_done("d-2", "i-1"));
        drain(&mut rx);

        watcher.poll_batches().await;
        let calls = watcher.service.batch_calls.lock().unwrap().clone();
        assert_eq!(calls, vec![vec!["i-1".to_string()], vec!["i-1".to_string()]]);
        let frames = drain(&mut rx);
        assert!(frames.last().unwrap().contains("d-2 web-prod (0/1)"));

        watcher.service.set_status("i-1", InstanceStatus::Succeeded);
        watcher.poll_batches().await;
        assert!(watcher.is_done("d-2", "i-1"));
        let frames = drain(&mut rx);
        assert!(frames.last().unwrap().contains("d-2 web-prod (1/1)"));
        assert_eq!(watcher.service.batch_calls.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_requests_respect_batch_size() {
        let service = MockService::default().with_deployment("d-1", &["i-1", "i-2", "i-3"]);
        let mut config = WatchConfig::default();
        config.poll.batch_size = 2;
        let (watcher, _rx) = watcher(service, config);
        watcher.seed(["d-1".to_string()]);
        watcher.discover().await;

        watcher.poll_batches().await;
        let sizes: Vec<usize> = watcher
            .service
            .batch_calls
            .lock()
            .unwrap()
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(sizes, vec![2, 1]);
    }

    #[tokio::test(start_paused = true)]
    async fn status_failure_throttles_status_backoff() {
        let service = MockService::default().with_deployment("d-1", &["i-1"]);
        let (watcher, _rx) = watcher(service, WatchConfig::default());
        watcher.seed(["d-1".to_string()]);
        watcher.discover().await;

        watcher.service.fail_status.store(true, Ordering::SeqCst);
        watcher.poll_batches().await;
        assert!(watcher.status_backoff().current() > Duration::from_secs(2));

        let key = InstanceKey {
            deployment_id: "d-1".to_string(),
            instance_id: "i-1".to_string(),
        };
        assert_eq!(watcher.check_instance(&key).await, Flow::Continue);
        assert!(!watcher.is_done("d-1", "i-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn check_instance_finishes_when_terminal() {
        let service = MockService::default().with_deployment("d-1", &["i-1"]);
        let (watcher, mut rx) = watcher(service, WatchConfig::default());
        watcher.seed(["d-1".to_string()]);
        watcher.discover().await;
        drain(&mut rx);

        let key = InstanceKey {
            deployment_id: "d-1".to_string(),
            instance_id: "i-1".to_string(),
        };
        watcher.service.set_status("i-1", InstanceStatus::InProgress);
        assert_eq!(watcher.check_instance(&key).await, Flow::Continue);

        watcher.service.set_status("i-1", InstanceStatus::Failed);
        assert_eq!(watcher.check_instance(&key).await, Flow::Finished);
        assert!(watcher.is_done("d-1", "i-1"));
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_registers_one_poller_per_instance() {
        let service = MockService::default().with_deployment("d-1", &["i-1", "i-2", "i-3"]);
        for id in ["i-1", "i-2", "i-3"] {
            service.set_status(id, InstanceStatus::InProgress);
        }
        let mut config = WatchConfig::default();
        config.poll.status_mode = StatusMode::PerInstance;
        config.poll.max_instance_pollers = 2;
        let (watcher, _rx) = watcher(service, config);
        watcher.seed(["d-1".to_string()]);
        watcher.discover().await;

        let scheduler = Scheduler::new();
        assert_eq!(watcher.fan_out(&scheduler), 2);
        assert_eq!(watcher.fan_out(&scheduler), 0);

        let mut keys = scheduler.active_keys();
        keys.sort();
        assert_eq!(keys, vec!["d-1/i-1", "d-1/i-2"]);

        // A finished instance frees its slot for the next one.
        watcher.service.set_status("i-1", InstanceStatus::Succeeded);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!scheduler.is_keyed_active("d-1/i-1"));
        assert_eq!(watcher.fan_out(&scheduler), 1);
        assert!(scheduler.is_keyed_active("d-1/i-3"));

        scheduler.shutdown();
        scheduler.wait().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fan_out_covers_shared_instance_per_deployment() {
        let service = MockService::default()
            .with_deployment("d-1", &["i-1"])
            .with_deployment("d-2", &["i-1"]);
        service.set_status("i-1", InstanceStatus::Succeeded);
        let mut config = WatchConfig::default();
        config.poll.status_mode = StatusMode::PerInstance;
        let (watcher, _rx) = watcher(service, config);
        watcher.seed(["d-1".to_string()]);
        watcher.discover().await;

        let key = InstanceKey::new("d-1", "i-1");
        assert_eq!(watcher.check_instance(&key).await, Flow::Finished);

        watcher.seed(["d-2".to_string()]);
        watcher.discover().await;
        let scheduler = Scheduler::new();
        assert_eq!(watcher.fan_out(&scheduler), 1);
        assert_eq!(scheduler.active_keys(), vec!["d-2/i-1"]);

        scheduler.shutdown();
        scheduler.wait().await;
    }
}
