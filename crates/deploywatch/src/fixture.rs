//! File-backed collaborator.
//!
//! `FixtureService` answers both collaborator contracts from one JSON
//! document. The file is re-read on every call, so editing it while the
//! dashboard runs moves the rollout forward.
//!
//! ```json
//! {
//!   "deployments": [
//!     { "id": "d-1", "application": "web", "group": "prod",
//!       "status": "InProgress", "instances": ["i-1", "i-2"] }
//!   ],
//!   "instances": [ { "id": "i-1", "tags": { "Name": "web-1" } } ],
//!   "statuses": {
//!     "d-1": [ { "instance_id": "d-1/i-1", "status": "InProgress" } ]
//!   },
//!   "batch_error": null
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use deploywatch_core::{
    Deployment, DeploymentId, DeploymentTracker, FleetInventory, Instance, InstanceId,
    MAX_DESCRIBE_BATCH, ServiceError, ServiceResult, StatusSummary, check_embedded_error,
    partition,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    pub deployments: Vec<FixtureDeployment>,
    pub instances: Vec<Instance>,
    /// deployment id → instance summaries
    pub statuses: HashMap<DeploymentId, Vec<StatusSummary>>,
    /// Error message embedded in every batch status response.
    pub batch_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureDeployment {
    #[serde(flatten)]
    pub deployment: Deployment,
    #[serde(default)]
    pub instances: Vec<InstanceId>,
}

impl Fixture {
    fn deployment(&self, id: &str) -> ServiceResult<&FixtureDeployment> {
        self.deployments
            .iter()
            .find(|d| d.deployment.id == id)
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    fn summary(&self, deployment_id: &str, instance_id: &str) -> Option<&StatusSummary> {
        self.statuses
            .get(deployment_id)?
            .iter()
            .find(|s| s.bare_instance_id() == Some(instance_id))
    }
}

pub struct FixtureService {
    path: PathBuf,
}

impl FixtureService {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    async fn load(&self) -> ServiceResult<Fixture> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ServiceError::Transient(format!("{}: {e}", self.path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| ServiceError::Malformed(format!("{}: {e}", self.path.display())))
    }
}

impl DeploymentTracker for FixtureService {
    async fn list_deployments(
        &self,
        application: Option<&str>,
        group: Option<&str>,
        statuses: &[String],
    ) -> ServiceResult<Vec<String>> {
        let fixture = self.load().await?;
        Ok(fixture
            .deployments
            .iter()
            .map(|d| &d.deployment)
            .filter(|d| application.is_none_or(|a| d.application == a))
            .filter(|d| group.is_none_or(|g| d.group == g))
            .filter(|d| statuses.is_empty() || statuses.contains(&d.status))
            .map(|d| d.id.clone())
            .collect())
    }

    async fn get_deployment(&self, id: &str) -> ServiceResult<Deployment> {
        let fixture = self.load().await?;
        Ok(fixture.deployment(id)?.deployment.clone())
    }

    async fn list_deployment_instances(&self, id: &str) -> ServiceResult<Vec<String>> {
        let fixture = self.load().await?;
        Ok(fixture.deployment(id)?.instances.clone())
    }

    async fn get_instance_status(
        &self,
        deployment_id: &str,
        instance_id: &str,
    ) -> ServiceResult<StatusSummary> {
        let fixture = self.load().await?;
        fixture
            .summary(deployment_id, instance_id)
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("{deployment_id}/{instance_id}")))
    }

    async fn batch_get_instance_status(
        &self,
        deployment_id: &str,
        instance_ids: &[String],
    ) -> ServiceResult<Vec<StatusSummary>> {
        let fixture = self.load().await?;
        check_embedded_error(fixture.batch_error.as_deref())?;
        Ok(instance_ids
            .iter()
            .filter_map(|id| fixture.summary(deployment_id, id).cloned())
            .collect())
    }
}

impl FleetInventory for FixtureService {
    async fn describe_instances(&self, ids: &[String]) -> ServiceResult<Vec<Instance>> {
        let fixture = self.load().await?;
        let mut described = Vec::with_capacity(ids.len());
        for page in partition(ids, MAX_DESCRIBE_BATCH) {
            debug!(count = page.len(), "describing instances");
            described.extend(
                fixture
                    .instances
                    .iter()
                    .filter(|i| page.contains(&i.id))
                    .cloned(),
            );
        }
        Ok(described)
    }
}
