//! Typed ID definitions for provider resources.
//!
//! Each ID type has a unique prefix that identifies the resource type.

use crate::define_id;

// =============================================================================
// Provider Resources
// =============================================================================

define_id!(VolumeId, "vol");
define_id!(InstanceId, "i");

// =============================================================================
// Cluster Slots
// =============================================================================

/// Stable positional identifier of a cluster member.
///
/// A slot outlives the instances that occupy it; the volume tagged for a slot
/// follows whichever instance currently holds it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Slot(u64);

impl Slot {
    /// Creates a slot from its numeric position.
    #[must_use]
    pub const fn new(slot: u64) -> Self {
        Self(slot)
    }

    /// Returns the underlying number.
    #[must_use]
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Slot {
    fn from(slot: u64) -> Self {
        Self(slot)
    }
}

impl From<Slot> for u64 {
    fn from(slot: Slot) -> Self {
        slot.0
    }
}

impl serde::Serialize for Slot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> serde::Deserialize<'de> for Slot {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let slot = u64::deserialize(deserializer)?;
        Ok(Self(slot))
    }
}

// =============================================================================
// Tests
// =============================================================================
