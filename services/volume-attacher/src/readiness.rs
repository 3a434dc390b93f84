//! Gate that holds the handler until the launched instance is running.

use reattach_id::InstanceId;
use reattach_reconcile::PollPolicy;
use tracing::{info, instrument};

use crate::provider::InstanceState;
use crate::waiters::{ProviderWaitError, Waiters};

/// Blocks until an instance reports `running`, bounded by a poll policy.
pub struct InstanceReadinessGate {
    waiters: Waiters,
    policy: PollPolicy,
}

impl InstanceReadinessGate {
    pub fn new(waiters: Waiters, policy: PollPolicy) -> Self {
        Self { waiters, policy }
    }

    /// Wait for `instance_id` to be running.
    ///
    /// Returns a timeout error if the instance never gets there, and a
    /// diverged error if it reaches a terminal state first.
    #[instrument(skip_all, fields(instance_id = %instance_id))]
    pub async fn wait_until_running(
        &self,
        instance_id: &InstanceId,
    ) -> Result<InstanceState, ProviderWaitError> {
        info!(
            max_attempts = self.policy.max_attempts,
            interval_secs = self.policy.interval.as_secs(),
            "Waiting for instance to be running"
        );
        let state = self
            .waiters
            .instance_running(instance_id, &self.policy)
            .await?;
        info!("Instance is running");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use reattach_reconcile::RecordingSleeper;

    use crate::provider::InMemoryCloud;

    fn inst() -> InstanceId {
        "i-0123456789abcdef0".parse().unwrap()
    }

    fn gate(cloud: &Arc<InMemoryCloud>, attempts: u32) -> InstanceReadinessGate {
        let waiters = Waiters::new(
            cloud.clone(),
            cloud.clone(),
            Arc::new(RecordingSleeper::new()),
        );
        InstanceReadinessGate::new(waiters, PollPolicy::new(Duration::from_secs(5), attempts))
    }

    #[tokio::test]
    async fn test_running_instance_passes_immediately() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_instance(inst(), InstanceState::Running);

        let state = gate(&cloud, 1).wait_until_running(&inst()).await.unwrap();
        assert_eq!(state, InstanceState::Running);
    }

    #[tokio::test]
    async fn test_slow_boot_times_out() {
        let cloud = Arc::new(InMemoryCloud::new());
        cloud.add_booting_instance(inst(), InstanceState::Pending, 5);

        let err = gate(&cloud, 3).wait_until_running(&inst()).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
