//! # reattach-id
//!
//! Typed identifiers for the provider resources the volume attacher touches.
//!
//! ## Design Principles
//!
//! - Provider IDs are opaque, provider-generated strings; we only validate shape
//! - IDs are typed so a volume ID can never be passed where an instance ID is expected
//! - Parsing is strict and round-trips through `Display`
//!
//! ## ID Format
//!
//! Provider IDs use a prefixed hex format: `{prefix}-{hex}`
//!
//! Examples:
//! - `vol-0a1b2c3d4e5f60718`
//! - `i-0123456789abcdef0`
//! - `i-1a2b3c4d` (legacy 8-digit form)
//!
//! Slots are plain non-negative integers and are not prefixed.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;
