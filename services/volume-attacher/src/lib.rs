//! Volume Attacher Library
//!
//! Reattaches a cluster slot's persistent volume to whichever instance the
//! autoscaling group has just launched into that slot, then tells the fleet
//! controller whether the instance may continue booting.
//!
//! ## Flow
//!
//! ```text
//! lifecycle event
//!   └── EventOrchestrator
//!         ├── resolve_slot            (group name -> slot)
//!         ├── VolumeLocator           (slot -> volume, by tags)
//!         ├── InstanceReadinessGate   (wait for running)
//!         ├── AttachmentReconciler    (observe, classify, act, retry)
//!         └── LifecycleCompleter      (CONTINUE / ABANDON)
//! ```
//!
//! ## Modules
//!
//! - `provider`: Storage, compute and fleet controller contracts, plus an
//!   in-memory implementation
//! - `attachment`: The reconciliation state machine
//! - `handler`: Event orchestration and the completion guard

pub mod attachment;
pub mod config;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod locator;
pub mod provider;
pub mod readiness;
pub mod slot;
pub mod telemetry;
pub mod waiters;

// Re-export commonly used types
pub use attachment::{AttachmentReconciler, ReconcileOutcome, VolumeCondition};
pub use config::Config;
pub use error::HandlerError;
pub use handler::EventOrchestrator;
pub use lifecycle::{LifecycleCompleter, ReportingError};
pub use locator::VolumeLocator;
pub use provider::InMemoryCloud;
pub use readiness::InstanceReadinessGate;
pub use slot::resolve_slot;
