//! Error types for the volume attacher.

use reattach_events::EventError;
use reattach_id::InstanceId;
use thiserror::Error;

use crate::lifecycle::ReportingError;
use crate::locator::LocateError;
use crate::slot::SlotParseError;
use crate::waiters::ProviderWaitError;

/// Failures that end a handler invocation with an error instead of a response.
///
/// Attach failures and readiness timeouts are not here: they are handled and
/// reported through the invocation response.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The event is missing a required field or a field is malformed.
    #[error("invalid event: {0}")]
    Validation(#[from] EventError),

    /// The group name carries no slot number.
    #[error(transparent)]
    Slot(#[from] SlotParseError),

    /// No volume is designated for the slot.
    #[error(transparent)]
    VolumeNotFound(#[from] LocateError),

    /// The instance could not be observed or reached a terminal state.
    #[error("instance {instance_id} did not become ready: {source}")]
    InstanceNotReady {
        instance_id: InstanceId,
        #[source]
        source: ProviderWaitError,
    },

    /// The final lifecycle decision could not be delivered.
    #[error(transparent)]
    Reporting(#[from] ReportingError),
}

impl HandlerError {
    /// Get the standardized reason code for this error.
    pub fn reason_code(&self) -> &'static str {
        match self {
            HandlerError::Validation(_) => "invalid_event",
            HandlerError::Slot(_) => "slot_parse_failed",
            HandlerError::VolumeNotFound(_) => "volume_not_found",
            HandlerError::InstanceNotReady { .. } => "instance_not_ready",
            HandlerError::Reporting(_) => "lifecycle_report_failed",
        }
    }
}
