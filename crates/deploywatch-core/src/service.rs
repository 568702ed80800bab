//! Collaborator contracts consumed by the poller.
//!
//! Implementations hide pagination and request shaping: every list call
//! returns the fully merged result.

use std::future::Future;

use crate::error::{ServiceError, ServiceResult};
use crate::types::{Deployment, Instance, StatusSummary};

/// Largest number of instance ids one inventory request may carry.
pub const MAX_DESCRIBE_BATCH: usize = 200;

/// The deployment-tracking service.
pub trait DeploymentTracker: Send + Sync {
    /// Ids of deployments matching the filters. Empty filters match everything.
    fn list_deployments(
        &self,
        application: Option<&str>,
        group: Option<&str>,
        statuses: &[String],
    ) -> impl Future<Output = ServiceResult<Vec<String>>> + Send;

    /// Deployment metadata. Fails with [`ServiceError::NotFound`] for unknown ids.
    fn get_deployment(&self, id: &str) -> impl Future<Output = ServiceResult<Deployment>> + Send;

    /// Bare ids of every instance targeted by the deployment.
    fn list_deployment_instances(
        &self,
        id: &str,
    ) -> impl Future<Output = ServiceResult<Vec<String>>> + Send;

    fn get_instance_status(
        &self,
        deployment_id: &str,
        instance_id: &str,
    ) -> impl Future<Output = ServiceResult<StatusSummary>> + Send;

    /// Statuses for several instances of one deployment.
    ///
    /// Fails with [`ServiceError::Reported`] when the response carries a
    /// non-empty error message (see [`check_embedded_error`]).
    fn batch_get_instance_status(
        &self,
        deployment_id: &str,
        instance_ids: &[String],
    ) -> impl Future<Output = ServiceResult<Vec<StatusSummary>>> + Send;
}

/// The fleet-inventory service.
pub trait FleetInventory: Send + Sync {
    /// Describe instances. Implementations split `ids` into requests of at
    /// most [`MAX_DESCRIBE_BATCH`] ids and merge the pages.
    fn describe_instances(
        &self,
        ids: &[String],
    ) -> impl Future<Output = ServiceResult<Vec<Instance>>> + Send;
}

/// Turn an error message embedded in a successful response into an error.
pub fn check_embedded_error(message: Option<&str>) -> ServiceResult<()> {
    match message.map(str::trim) {
        Some(msg) if !msg.is_empty() => Err(ServiceError::Reported(msg.to_string())),
        _ => Ok(()),
    }
}

/// Split `data` into consecutive chunks no longer than `size`.
///
/// A `size` of 0 or empty input yields no chunks.
pub fn partition(data: &[String], size: usize) -> Vec<Vec<String>> {
    if size == 0 {
        return Vec::new();
    }
    data.chunks(size).map(<[String]>::to_vec).collect()
}
