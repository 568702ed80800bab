//! deploywatch-core: shared types and contracts for deploywatch.
//!
//! Holds the domain model reported by the deployment-tracking and
//! fleet-inventory services, the explicit [`WatchConfig`] passed into the
//! poller and aggregator, and the collaborator traits the poller drives.

pub mod config;
pub mod error;
pub mod service;
pub mod types;

pub use config::{
    BackoffConfig, DisplayMode, DisplayOptions, FilterConfig, PollConfig, PollIntervals, StatusMode,
    WatchConfig, parse_duration,
};
pub use error::{ConfigError, ServiceError, ServiceResult};
pub use service::{DeploymentTracker, FleetInventory, MAX_DESCRIBE_BATCH, check_embedded_error, partition};
pub use types::*;
