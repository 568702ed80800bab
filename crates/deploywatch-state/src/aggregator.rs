//! Aggregator: the canonical snapshot of everything being watched.
//!
//! Discovery tasks feed deployments and instances in through
//! [`Aggregator::add_deployment`]; status tasks push summaries through
//! [`Aggregator::update`] / [`Aggregator::batch_update`] and get back the
//! freshly rendered frame to hand to the dashboard.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use tracing::debug;

use deploywatch_core::{
    Deployment, DeploymentId, DeploymentTracker, DisplayMode, DisplayOptions, FleetInventory,
    Instance, InstanceId, ServiceResult, StatusSummary,
};

use crate::render;
use crate::set::DedupSet;

/// What one `add_deployment` call found that was not known before.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Discovery {
    pub new_deployment: bool,
    pub new_instances: Vec<InstanceId>,
}

impl Discovery {
    pub fn is_empty(&self) -> bool {
        !self.new_deployment && self.new_instances.is_empty()
    }
}

#[derive(Default)]
struct Snapshot {
    /// Tracked deployments in discovery order.
    deployments: Vec<Deployment>,
    /// deployment_id → instances it targets. Grows only.
    membership: HashMap<DeploymentId, DedupSet>,
    /// Instance cache shared by every deployment.
    instances: HashMap<InstanceId, Instance>,
    /// instance_id → latest summary.
    summaries: HashMap<InstanceId, StatusSummary>,
}

/// Owns all deployment, instance, and status state behind one lock.
pub struct Aggregator {
    display: DisplayOptions,
    snapshot: RwLock<Snapshot>,
}

impl Aggregator {
    pub fn new(display: DisplayOptions) -> Self {
        Self {
            display,
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    pub fn display(&self) -> &DisplayOptions {
        &self.display
    }

    /// Track a deployment and any of its instances not seen yet.
    ///
    /// Deployment metadata is fetched only the first time; the instance
    /// list is fetched on every call and only new instances are described.
    /// Collaborator calls happen outside the lock; the merge re-checks under
    /// the write lock so concurrent calls for the same id stay idempotent.
    pub async fn add_deployment<S>(&self, service: &S, deployment_id: &str) -> ServiceResult<Discovery>
    where
        S: DeploymentTracker + FleetInventory,
    {
        let known = self.has_deployment(deployment_id);
        let deployment = if known {
            None
        } else {
            Some(service.get_deployment(deployment_id).await?)
        };

        let listed = service.list_deployment_instances(deployment_id).await?;

        let (new_ids, to_describe) = {
            let snap = self.snapshot.read().expect("snapshot lock");
            let tracked: HashSet<InstanceId> = snap
                .membership
                .get(deployment_id)
                .map(|m| m.list().into_iter().collect())
                .unwrap_or_default();
            let mut seen = HashSet::new();
            let new_ids: Vec<InstanceId> = listed
                .into_iter()
                .filter(|id| !id.is_empty() && !tracked.contains(id) && seen.insert(id.clone()))
                .collect();
            let to_describe: Vec<InstanceId> = new_ids
                .iter()
                .filter(|id| !snap.instances.contains_key(*id))
                .cloned()
                .collect();
            (new_ids, to_describe)
        };

        let described = if to_describe.is_empty() {
            Vec::new()
        } else {
            service.describe_instances(&to_describe).await?
        };

        let mut snap = self.snapshot.write().expect("snapshot lock");
        let mut discovery = Discovery::default();

        if let Some(deployment) = deployment {
            if !snap.deployments.iter().any(|d| d.id == deployment.id) {
                debug!(
                    deployment_id = %deployment.id,
                    application = %deployment.application,
                    group = %deployment.group,
                    "tracking deployment"
                );
                snap.deployments.push(deployment);
                discovery.new_deployment = true;
            }
        }

        for instance in described {
            snap.instances.insert(instance.id.clone(), instance);
        }

        let Snapshot {
            membership,
            instances,
            ..
        } = &mut *snap;
        let members = membership.entry(deployment_id.to_string()).or_default();
        for id in new_ids {
            if !instances.contains_key(&id) {
                debug!(%deployment_id, instance_id = %id, "instance not described, retrying later");
                continue;
            }
            if members.add(id.clone()) {
                discovery.new_instances.push(id);
            }
        }

        Ok(discovery)
    }

    /// Merge one summary and return the rendered snapshot.
    ///
    /// Summaries whose composite id does not split into exactly two parts
    /// are dropped.
    pub fn update(&self, summary: StatusSummary) -> Vec<u8> {
        let mut snap = self.snapshot.write().expect("snapshot lock");
        merge(&mut snap, summary);
        snap.render(&self.display)
    }

    /// Merge several summaries under one lock and render once.
    pub fn batch_update(&self, summaries: Vec<StatusSummary>) -> Vec<u8> {
        let mut snap = self.snapshot.write().expect("snapshot lock");
        for summary in summaries {
            merge(&mut snap, summary);
        }
        snap.render(&self.display)
    }

    pub fn render(&self) -> Vec<u8> {
        self.snapshot.read().expect("snapshot lock").render(&self.display)
    }

    /// True once the instance has a summary that is neither pending nor in progress.
    pub fn is_instance_done(&self, instance_id: &str) -> bool {
        self.snapshot
            .read()
            .expect("snapshot lock")
            .summaries
            .get(instance_id)
            .is_some_and(|s| !s.status.is_active())
    }

    /// Tracked deployment ids in discovery order.
    pub fn deployment_ids(&self) -> Vec<DeploymentId> {
        self.snapshot
            .read()
            .expect("snapshot lock")
            .deployments
            .iter()
            .map(|d| d.id.clone())
            .collect()
    }

    /// Instance ids tracked for a deployment, sorted.
    pub fn instance_ids(&self, deployment_id: &str) -> Vec<InstanceId> {
        let snap = self.snapshot.read().expect("snapshot lock");
        let mut ids = snap
            .membership
            .get(deployment_id)
            .map(DedupSet::list)
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn has_deployment(&self, deployment_id: &str) -> bool {
        self.snapshot
            .read()
            .expect("snapshot lock")
            .deployments
            .iter()
            .any(|d| d.id == deployment_id)
    }

    pub fn deployment(&self, deployment_id: &str) -> Option<Deployment> {
        self.snapshot
            .read()
            .expect("snapshot lock")
            .deployments
            .iter()
            .find(|d| d.id == deployment_id)
            .cloned()
    }

    pub fn instance(&self, instance_id: &str) -> Option<Instance> {
        self.snapshot.read().expect("snapshot lock").instances.get(instance_id).cloned()
    }

    pub fn summary(&self, instance_id: &str) -> Option<StatusSummary> {
        self.snapshot.read().expect("snapshot lock").summaries.get(instance_id).cloned()
    }
}

/// Store `summary` under its bare instance id.
///
/// A summary older than the stored one (both timestamped) is discarded;
/// otherwise the later lock holder wins.
fn merge(snap: &mut Snapshot, summary: StatusSummary) -> bool {
    let Some(instance_id) = summary.bare_instance_id().map(str::to_string) else {
        debug!(composite = %summary.instance_id, "dropping summary with malformed instance id");
        return false;
    };

    if let Some(current) = snap.summaries.get(&instance_id) {
        if let (Some(stored), Some(incoming)) = (current.last_updated_at, summary.last_updated_at) {
            if incoming < stored {
                debug!(%instance_id, %stored, %incoming, "dropping stale summary");
                return false;
            }
        }
    }

    snap.summaries.insert(instance_id, summary);
    true
}

impl Snapshot {
    fn render(&self, display: &DisplayOptions) -> Vec<u8> {
        let mut out = String::new();
        let name_width = self
            .instances
            .values()
            .map(|i| i.name().chars().count())
            .max()
            .unwrap_or(0);

        for deployment in &self.deployments {
            let mut ids = self
                .membership
                .get(&deployment.id)
                .map(DedupSet::list)
                .unwrap_or_default();
            if ids.is_empty() {
                continue;
            }
            ids.sort();

            let succeeded = ids
                .iter()
                .filter(|id| self.summaries.get(*id).is_some_and(|s| display.is_success(&s.status)))
                .count();
            out.push_str(&render::deployment_line(deployment, succeeded, ids.len()));

            for id in &ids {
                let summary = self.summaries.get(id);
                if display.hide_succeeded && summary.is_some_and(|s| display.is_success(&s.status)) {
                    continue;
                }
                let name = self.instances.get(id).map_or("", Instance::name);

                match display.mode {
                    DisplayMode::Compact => {
                        out.push_str(&render::compact_instance_line(name, id, summary, name_width));
                    }
                    DisplayMode::Verbose => {
                        out.push_str(&render::instance_line(name, id));
                        for event in summary.map(|s| s.lifecycle_events.as_slice()).unwrap_or_default() {
                            out.push_str(&render::lifecycle_event_line(event));
                        }
                    }
                }
            }
        }

        out.into_bytes()
    }
}
