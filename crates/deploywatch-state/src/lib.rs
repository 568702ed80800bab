//! deploywatch-state: the in-memory snapshot behind the dashboard.
//!
//! # Architecture
//!
//! ```text
//! Aggregator (one RwLock)
//!   ├── deployments      Vec<Deployment>, discovery order
//!   ├── membership       deployment_id → DedupSet<instance_id>
//!   ├── instances        instance_id → Instance (shared cache)
//!   └── summaries        instance_id → StatusSummary
//! ```
//!
//! Writers (`add_deployment`, `update`, `batch_update`) take the lock
//! exclusively and render before releasing it, so every returned frame is
//! a consistent post-mutation view. Readers only ever receive copies.

pub mod aggregator;
pub mod render;
pub mod set;

pub use aggregator::Aggregator;
pub use set::DedupSet;
