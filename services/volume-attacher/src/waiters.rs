//! Bounded waits on provider resources.
//!
//! Each waiter polls one resource through [`wait_for`] and maps what it
//! observes onto [`Convergence`].

use std::sync::Arc;

use reattach_id::{InstanceId, VolumeId};
use reattach_reconcile::{wait_for, Convergence, PollPolicy, Sleeper, WaitError};
use tracing::debug;

use crate::provider::{
    AttachmentState, BlockStorage, Compute, InstanceState, ProviderError, Volume, VolumeState,
};

/// Failure of a provider wait.
pub type ProviderWaitError = WaitError<ProviderError>;

/// Polling helpers over the storage and compute services.
#[derive(Clone)]
pub struct Waiters {
    storage: Arc<dyn BlockStorage>,
    compute: Arc<dyn Compute>,
    sleeper: Arc<dyn Sleeper>,
}

impl Waiters {
    pub fn new(
        storage: Arc<dyn BlockStorage>,
        compute: Arc<dyn Compute>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            storage,
            compute,
            sleeper,
        }
    }

    /// Wait until the volume reports `available`.
    ///
    /// A volume that starts deleting can never become available.
    pub async fn volume_available(
        &self,
        volume_id: &VolumeId,
        policy: &PollPolicy,
    ) -> Result<Volume, ProviderWaitError> {
        let resource = format!("volume {volume_id} to be available");
        wait_for(policy, self.sleeper.as_ref(), &resource, || async move {
            let volume = self.storage.describe_volume(volume_id).await?;
            Ok::<_, ProviderError>(match volume.state {
                VolumeState::Available => Convergence::Converged(volume),
                VolumeState::Deleting => {
                    Convergence::Diverged(format!("volume {volume_id} is deleting"))
                }
                _ => Convergence::Converging,
            })
        })
        .await
    }

    /// Wait until the volume has an `attached` attachment to `instance_id`.
    pub async fn volume_attached(
        &self,
        volume_id: &VolumeId,
        instance_id: &InstanceId,
        policy: &PollPolicy,
    ) -> Result<Volume, ProviderWaitError> {
        let resource = format!("volume {volume_id} to attach to {instance_id}");
        wait_for(policy, self.sleeper.as_ref(), &resource, || async move {
            let volume = self.storage.describe_volume(volume_id).await?;
            let attached = volume
                .attachment_to(instance_id)
                .is_some_and(|a| a.state == AttachmentState::Attached);
            Ok::<_, ProviderError>(match (attached, volume.state) {
                (true, _) => Convergence::Converged(volume),
                (false, VolumeState::Deleting) => {
                    Convergence::Diverged(format!("volume {volume_id} is deleting"))
                }
                (false, _) => Convergence::Converging,
            })
        })
        .await
    }

    /// Wait until the instance reports `running`.
    ///
    /// Not-found answers are retried: a just-launched instance may not be
    /// visible to the compute API yet. Transient failures (throttling) are
    /// retried too; both stay within the poll budget.
    pub async fn instance_running(
        &self,
        instance_id: &InstanceId,
        policy: &PollPolicy,
    ) -> Result<InstanceState, ProviderWaitError> {
        let resource = format!("instance {instance_id} to be running");
        wait_for(policy, self.sleeper.as_ref(), &resource, || async move {
            match self.compute.describe_instance(instance_id).await {
                Ok(InstanceState::Running) => Ok(Convergence::Converged(InstanceState::Running)),
                Ok(state) if state.is_terminal() => Ok(Convergence::Diverged(format!(
                    "instance {instance_id} is {state}"
                ))),
                Ok(_) => Ok(Convergence::Converging),
                Err(e) if e.is_not_found() || e.is_transient() => {
                    debug!(code = %e.code, "Instance not observable yet");
                    Ok(Convergence::Converging)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }
}
