//! deploywatch.toml configuration parser.
//!
//! Every option can also come from the command line; the binary loads the
//! file (if any) and then overrides individual fields from flags.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::InstanceStatus;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct WatchConfig {
    pub filter: FilterConfig,
    pub display: DisplayOptions,
    pub poll: PollConfig,
}

/// Which deployments discovery looks for.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    pub application: Option<String>,
    pub groups: Vec<String>,
    /// Deployment statuses worth watching.
    pub statuses: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            application: None,
            groups: Vec::new(),
            statuses: vec![
                "Created".to_string(),
                "Queued".to_string(),
                "InProgress".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    /// One line per instance.
    Compact,
    /// One line per instance plus one per lifecycle event.
    #[default]
    Verbose,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DisplayOptions {
    pub mode: DisplayMode,
    /// Leave succeeded instances out of the rendered detail lines.
    pub hide_succeeded: bool,
    /// Status values counted as terminal success.
    pub success_statuses: Vec<String>,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            mode: DisplayMode::default(),
            hide_succeeded: false,
            success_statuses: vec!["Succeeded".to_string(), "Success".to_string()],
        }
    }
}

impl DisplayOptions {
    pub fn is_success(&self, status: &InstanceStatus) -> bool {
        self.success_statuses.iter().any(|s| s == status.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StatusMode {
    /// One batch request per deployment per tick.
    #[default]
    Batch,
    /// One poller per instance.
    PerInstance,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollConfig {
    /// How often to look for new deployments and instances.
    pub discovery_interval: String,
    /// How often to schedule pollers for newly discovered instances.
    pub fan_out_interval: String,
    /// Base cadence of status checks.
    pub status_interval: String,
    pub status_mode: StatusMode,
    /// Instance ids per batch status request.
    pub batch_size: usize,
    /// Upper bound on concurrently running per-instance pollers.
    pub max_instance_pollers: usize,
    pub backoff: BackoffConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            discovery_interval: "10s".to_string(),
            fan_out_interval: "2s".to_string(),
            status_interval: "2s".to_string(),
            status_mode: StatusMode::default(),
            batch_size: 100,
            max_instance_pollers: 200,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Failure backoff applied on top of each job's base interval, which
/// doubles as the floor it decays back to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    /// Fraction by which each failure grows, and each decay shrinks, the interval.
    pub delta: f64,
    pub ceiling: Option<String>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            delta: 0.1,
            ceiling: Some("1m".to_string()),
        }
    }
}

/// Parsed, validated cadences.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollIntervals {
    pub discovery: Duration,
    pub fan_out: Duration,
    pub status: Duration,
    pub backoff_delta: f64,
    pub backoff_ceiling: Option<Duration>,
}

impl PollConfig {
    pub fn intervals(&self) -> Result<PollIntervals, ConfigError> {
        let backoff_ceiling = match &self.backoff.ceiling {
            Some(c) => Some(required("poll.backoff.ceiling", c)?),
            None => None,
        };
        Ok(PollIntervals {
            discovery: required("poll.discovery_interval", &self.discovery_interval)?,
            fan_out: required("poll.fan_out_interval", &self.fan_out_interval)?,
            status: required("poll.status_interval", &self.status_interval)?,
            backoff_delta: self.backoff.delta,
            backoff_ceiling,
        })
    }
}

fn required(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match parse_duration(value) {
        Some(d) if !d.is_zero() => Ok(d),
        _ => Err(ConfigError::Duration {
            field,
            value: value.to_string(),
        }),
    }
}

impl WatchConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: WatchConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every value the poller relies on.
    pub fn validate(&self) -> Result<PollIntervals, ConfigError> {
        let intervals = self.poll.intervals()?;

        let delta = self.poll.backoff.delta;
        if !(delta > 0.0 && delta < 1.0) {
            return Err(ConfigError::Invalid {
                field: "poll.backoff.delta",
                reason: format!("{delta} is not between 0 and 1"),
            });
        }
        if let Some(ceiling) = intervals.backoff_ceiling {
            if ceiling < intervals.status.max(intervals.discovery) {
                return Err(ConfigError::Invalid {
                    field: "poll.backoff.ceiling",
                    reason: "ceiling is below a base interval".to_string(),
                });
            }
        }
        if self.poll.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "poll.batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.poll.max_instance_pollers == 0 {
            return Err(ConfigError::Invalid {
                field: "poll.max_instance_pollers",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.display.success_statuses.is_empty() {
            return Err(ConfigError::Invalid {
                field: "display.success_statuses",
                reason: "at least one status is required".to_string(),
            });
        }
        Ok(intervals)
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
///
/// A bare number is read as seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
