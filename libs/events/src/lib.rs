//! # reattach-events
//!
//! Trigger payloads and completion records for autoscaling lifecycle hooks.
//!
//! ## Design Principles
//!
//! - The wire shape is lenient: every detail field is optional on the wire
//! - Validation is explicit: a `LaunchEvent` only exists once its required
//!   fields are present and well-formed
//! - Failure paths can still identify the hook through a `HookRef`, built from
//!   whatever fields survived, read one by one from the raw `detail`
//!
//! ## Flow
//!
//! ```text
//! raw payload
//!   ├── EventEnvelope<LifecycleActionDetail>
//!   │     └── LaunchEvent::from_detail  (validated, drives the attach)
//!   └── HookRef::from_value             (best effort, drives the failure ABANDON)
//!            └── HookCompletion         (sent to the fleet controller)
//! ```

mod envelope;
mod error;
mod types;

pub use envelope::*;
pub use error::EventError;
pub use types::*;
