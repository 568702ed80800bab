//! deploywatch-poller: periodic jobs that keep the dashboard current.
//!
//! # Architecture
//!
//! ```text
//! Scheduler
//!   ├── discovery        Cadence::Adaptive(discovery Backoff)
//!   ├── status-batch     Cadence::Adaptive(status Backoff)      (batch mode)
//!   ├── fan-out          Cadence::Fixed(fan_out_interval)       (per-instance mode)
//!   │   └── d-1/i-1 …    keyed pollers, retired once terminal
//!   └── dedup consumer   render channel → DashboardSink
//! ```
//!
//! Producers send each rendered frame over a capacity-1 channel; the dedup
//! consumer forwards a frame only when it differs from the last one shown.
//!
//! Failures never stop a job. They stretch the job's backoff by `1 + delta`,
//! and quiet periods shrink it back toward the base interval.

pub mod backoff;
pub mod scheduler;
pub mod watcher;

pub use backoff::Backoff;
pub use scheduler::{Cadence, DashboardSink, Flow, Scheduler, render_channel};
pub use watcher::{InstanceKey, Watcher};
