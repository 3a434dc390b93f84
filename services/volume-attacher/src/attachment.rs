//! Attachment reconciliation.
//!
//! Drives a volume from whatever state it is in to "attached to the target
//! instance". Every attempt starts from a fresh provider read, so the loop
//! observes the effect of its own earlier detach/attach calls, of concurrent
//! external changes, and of progress made by an earlier invocation that was
//! interrupted.
//!
//! ```text
//!                 describe_volume
//!                       │
//!        ┌──────────────┼───────────────┬─────────────────┐
//!        ▼              ▼               ▼                 ▼
//!  AttachedToTarget  AttachedElsewhere  Transitioning   Available
//!    (done)          detach + wait      wait available      │
//!                    available               │              │
//!                        └───────────────────┴──► attach + wait attached
//! ```

use std::sync::Arc;

use reattach_id::{InstanceId, VolumeId};
use reattach_reconcile::{PollPolicy, RetryPolicy, Sleeper, WaitError};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::provider::{AttachmentState, BlockStorage, ProviderError, Volume, VolumeState};
use crate::waiters::{ProviderWaitError, Waiters};

/// Where a volume stands relative to the target instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeCondition {
    /// Attached to the target. Nothing to do.
    AttachedToTarget,

    /// An attach to the target is already in flight.
    AttachingToTarget,

    /// Held by another instance; must be detached first.
    AttachedElsewhere {
        instance_id: InstanceId,
        state: AttachmentState,
    },

    /// Free to attach.
    Available,

    /// Neither free nor attached; must settle before attaching.
    Transitioning { state: VolumeState },
}

impl VolumeCondition {
    /// Classify a freshly read volume.
    ///
    /// An active attachment to any other instance takes precedence, so a
    /// volume attached to several instances is first cleaned up.
    pub fn classify(volume: &Volume, target: &InstanceId) -> Self {
        if let Some(other) = volume
            .attachments
            .iter()
            .find(|a| &a.instance_id != target && a.is_active())
        {
            return Self::AttachedElsewhere {
                instance_id: other.instance_id.clone(),
                state: other.state,
            };
        }

        match volume.attachment_to(target).map(|a| a.state) {
            Some(AttachmentState::Attached) => return Self::AttachedToTarget,
            Some(AttachmentState::Attaching) => return Self::AttachingToTarget,
            _ => {}
        }

        if volume.state == VolumeState::Available {
            Self::Available
        } else {
            Self::Transitioning {
                state: volume.state,
            }
        }
    }
}

/// Failure of a single reconciliation attempt.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Wait(#[from] ProviderWaitError),
}

impl AttemptError {
    /// Returns true if no amount of retrying can succeed.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_not_found(),
            Self::Wait(WaitError::Check { source, .. }) => source.is_not_found(),
            Self::Wait(WaitError::Diverged { .. }) => true,
            Self::Wait(WaitError::Timeout { .. }) => false,
        }
    }

    /// Error code for logs.
    pub fn code(&self) -> &str {
        match self {
            Self::Provider(e) => e.code.as_str(),
            Self::Wait(WaitError::Check { source, .. }) => source.code.as_str(),
            Self::Wait(WaitError::Diverged { .. }) => "WaiterDiverged",
            Self::Wait(WaitError::Timeout { .. }) => "WaiterTimeout",
        }
    }
}

/// Result of reconciling one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    /// Whether the volume ended up attached to the target.
    pub succeeded: bool,

    /// Last volume state observed, if any read succeeded.
    pub final_volume_state: Option<VolumeState>,

    /// Attempts used.
    pub attempts: u32,
}

/// Drives a volume into the attached-to-target state.
pub struct AttachmentReconciler {
    storage: Arc<dyn BlockStorage>,
    waiters: Waiters,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
    volume_wait: PollPolicy,
    attach_wait: PollPolicy,
    device_name: String,
}

impl AttachmentReconciler {
    /// Create a reconciler.
    pub fn new(
        storage: Arc<dyn BlockStorage>,
        waiters: Waiters,
        sleeper: Arc<dyn Sleeper>,
        config: &Config,
    ) -> Self {
        Self {
            storage,
            waiters,
            sleeper,
            retry: config.attach_retry,
            volume_wait: config.volume_wait,
            attach_wait: config.attach_wait,
            device_name: config.device_name.clone(),
        }
    }

    /// Attach `volume_id` to `target`, retrying with backoff.
    ///
    /// Exhausting the retry budget is reported through the outcome, not as
    /// an error.
    #[instrument(skip_all, fields(volume_id = %volume_id, instance_id = %target))]
    pub async fn reconcile(&self, volume_id: &VolumeId, target: &InstanceId) -> ReconcileOutcome {
        let max_attempts = self.retry.max_attempts;
        let mut last_state = None;

        for attempt in 1..=max_attempts {
            match self
                .attempt(volume_id, target, attempt, &mut last_state)
                .await
            {
                Ok(state) => {
                    info!(attempt, "Volume successfully attached");
                    return ReconcileOutcome {
                        succeeded: true,
                        final_volume_state: Some(state),
                        attempts: attempt,
                    };
                }
                Err(e) if e.is_fatal() => {
                    error!(attempt, code = e.code(), error = %e, "Unrecoverable error");
                    return ReconcileOutcome {
                        succeeded: false,
                        final_volume_state: last_state,
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    warn!(
                        attempt,
                        max_attempts,
                        code = e.code(),
                        error = %e,
                        "Attempt failed"
                    );
                }
            }

            if let Some(delay) = self.retry.delay_after(attempt) {
                info!(attempt, delay_secs = delay.as_secs(), "Retrying after backoff");
                self.sleeper.sleep(delay).await;
            }
        }

        error!(max_attempts, "Attach attempts exhausted");
        ReconcileOutcome {
            succeeded: false,
            final_volume_state: last_state,
            attempts: max_attempts,
        }
    }

    /// Run one attempt: observe, classify, act.
    async fn attempt(
        &self,
        volume_id: &VolumeId,
        target: &InstanceId,
        attempt: u32,
        last_state: &mut Option<VolumeState>,
    ) -> Result<VolumeState, AttemptError> {
        let volume = self.storage.describe_volume(volume_id).await?;
        *last_state = Some(volume.state);

        let condition = VolumeCondition::classify(&volume, target);
        info!(
            attempt,
            max_attempts = self.retry.max_attempts,
            state = %volume.state,
            attachments = volume.attachments.len(),
            ?condition,
            "Observed volume"
        );

        match condition {
            VolumeCondition::AttachedToTarget => {
                info!("Volume already attached to target instance");
                return Ok(volume.state);
            }
            VolumeCondition::AttachingToTarget => {
                let settled = self.wait_attached(volume_id, target, last_state).await?;
                return Ok(settled);
            }
            VolumeCondition::AttachedElsewhere { instance_id, state } => {
                info!(current_instance = %instance_id, %state, "Volume held by another instance, detaching");
                // Shared with the target too: clear every attachment so the
                // volume can come back to available.
                let only = volume.attachment_to(target).is_none().then_some(&instance_id);
                self.storage.detach_volume(volume_id, only, true).await?;
                self.wait_available(volume_id, last_state).await?;
            }
            VolumeCondition::Transitioning { state } => {
                info!(%state, "Volume mid-transition, waiting for availability");
                self.wait_available(volume_id, last_state).await?;
            }
            VolumeCondition::Available => {}
        }

        info!(device = %self.device_name, "Attaching volume");
        self.storage
            .attach_volume(volume_id, target, &self.device_name)
            .await?;

        self.wait_attached(volume_id, target, last_state).await
    }

    async fn wait_available(
        &self,
        volume_id: &VolumeId,
        last_state: &mut Option<VolumeState>,
    ) -> Result<(), AttemptError> {
        let volume = self
            .waiters
            .volume_available(volume_id, &self.volume_wait)
            .await?;
        *last_state = Some(volume.state);
        info!("Volume is now available");
        Ok(())
    }

    async fn wait_attached(
        &self,
        volume_id: &VolumeId,
        target: &InstanceId,
        last_state: &mut Option<VolumeState>,
    ) -> Result<VolumeState, AttemptError> {
        let volume = self
            .waiters
            .volume_attached(volume_id, target, &self.attach_wait)
            .await?;
        *last_state = Some(volume.state);
        Ok(volume.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use crate::provider::Attachment;

    fn vol() -> VolumeId {
        "vol-0a1b2c3d4e5f60718".parse().unwrap()
    }

    fn target() -> InstanceId {
        "i-0123456789abcdef0".parse().unwrap()
    }

    fn stale() -> InstanceId {
        "i-0fedcba9876543210".parse().unwrap()
    }

    fn volume(state: VolumeState, attachments: Vec<(InstanceId, AttachmentState)>) -> Volume {
        Volume {
            id: vol(),
            state,
            attachments: attachments
                .into_iter()
                .map(|(instance_id, state)| Attachment {
                    volume_id: vol(),
                    instance_id,
                    state,
                    device: Some("/dev/sdf".into()),
                })
                .collect(),
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn test_classify_attached_to_target() {
        let v = volume(
            VolumeState::InUse,
            vec![(target(), AttachmentState::Attached)],
        );
        assert_eq!(
            VolumeCondition::classify(&v, &target()),
            VolumeCondition::AttachedToTarget
        );
    }

    #[test]
    fn test_classify_attaching_to_target() {
        let v = volume(
            VolumeState::InUse,
            vec![(target(), AttachmentState::Attaching)],
        );
        assert_eq!(
            VolumeCondition::classify(&v, &target()),
            VolumeCondition::AttachingToTarget
        );
    }

    #[test]
    fn test_classify_attached_elsewhere() {
        for state in [AttachmentState::Attached, AttachmentState::Attaching] {
            let v = volume(VolumeState::InUse, vec![(stale(), state)]);
            assert_eq!(
                VolumeCondition::classify(&v, &target()),
                VolumeCondition::AttachedElsewhere {
                    instance_id: stale(),
                    state
                }
            );
        }
    }

    #[test]
    fn test_classify_detaching_elsewhere_is_transitioning() {
        let v = volume(
            VolumeState::InUse,
            vec![(stale(), AttachmentState::Detaching)],
        );
        assert_eq!(
            VolumeCondition::classify(&v, &target()),
            VolumeCondition::Transitioning {
                state: VolumeState::InUse
            }
        );
    }

    #[test]
    fn test_classify_multi_attach_prefers_cleanup() {
        let v = volume(
            VolumeState::InUse,
            vec![
                (target(), AttachmentState::Attached),
                (stale(), AttachmentState::Attached),
            ],
        );
        assert!(matches!(
            VolumeCondition::classify(&v, &target()),
            VolumeCondition::AttachedElsewhere { .. }
        ));
    }

    #[test]
    fn test_classify_available_and_creating() {
        assert_eq!(
            VolumeCondition::classify(&volume(VolumeState::Available, vec![]), &target()),
            VolumeCondition::Available
        );
        assert_eq!(
            VolumeCondition::classify(&volume(VolumeState::Creating, vec![]), &target()),
            VolumeCondition::Transitioning {
                state: VolumeState::Creating
            }
        );
    }

    #[test]
    fn test_attempt_error_fatality() {
        let not_found = AttemptError::Provider(ProviderError::volume_not_found(&vol()));
        assert!(not_found.is_fatal());

        let throttled =
            AttemptError::Provider(ProviderError::new("RequestLimitExceeded", "slow down"));
        assert!(!throttled.is_fatal());

        let timeout = AttemptError::Wait(WaitError::Timeout {
            resource: "volume".into(),
            attempts: 24,
        });
        assert!(!timeout.is_fatal());
        assert_eq!(timeout.code(), "WaiterTimeout");

        let diverged = AttemptError::Wait(WaitError::Diverged {
            resource: "volume".into(),
            reason: "deleting".into(),
        });
        assert!(diverged.is_fatal());
    }
}
