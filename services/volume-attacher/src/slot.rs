//! Slot resolution from autoscaling group names.
//!
//! Each cluster member position has its own group, named
//! `{cluster}-{role}-{slot}`, e.g. `prod-control-plane-2`.

use reattach_id::Slot;
use thiserror::Error;

/// The group name carries no trailing `-<digits>` slot suffix.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no slot number at the end of group name '{group_name}'")]
pub struct SlotParseError {
    pub group_name: String,
}

/// Extract the slot number following the last hyphen of a group name.
///
/// The digit run is read as a `u64`; a run too large for that is rejected
/// like any other malformed suffix.
pub fn resolve_slot(group_name: &str) -> Result<Slot, SlotParseError> {
    let err = || SlotParseError {
        group_name: group_name.to_string(),
    };

    let (_, suffix) = group_name.rsplit_once('-').ok_or_else(err)?;
    if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err());
    }

    suffix.parse::<u64>().map(Slot::new).map_err(|_| err())
}
