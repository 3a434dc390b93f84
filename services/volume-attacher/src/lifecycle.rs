//! Lifecycle action completion.

use std::sync::Arc;

use reattach_events::HookCompletion;
use reattach_reconcile::{RetryPolicy, Sleeper};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::provider::{FleetController, ProviderError};

/// The completion call could not be made to succeed.
#[derive(Debug, Clone, Error)]
#[error("failed to complete lifecycle action {hook_name} with {result} after {attempts} attempt(s): {source}")]
pub struct ReportingError {
    pub hook_name: String,
    pub result: reattach_events::LifecycleActionResult,
    pub attempts: u32,
    #[source]
    pub source: ProviderError,
}

/// Reports terminal CONTINUE/ABANDON decisions to the fleet controller.
pub struct LifecycleCompleter {
    fleet: Arc<dyn FleetController>,
    sleeper: Arc<dyn Sleeper>,
    retry: RetryPolicy,
}

impl LifecycleCompleter {
    pub fn new(
        fleet: Arc<dyn FleetController>,
        sleeper: Arc<dyn Sleeper>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fleet,
            sleeper,
            retry,
        }
    }

    /// Complete the lifecycle action.
    ///
    /// Transient failures are retried within the report budget; the controller
    /// treats repeated reports for the same token as one.
    pub async fn complete(&self, completion: &HookCompletion) -> Result<(), ReportingError> {
        info!(
            hook_name = %completion.hook_name,
            group_name = %completion.group_name,
            instance_id = completion.instance_id.as_deref().unwrap_or("-"),
            result = %completion.result,
            "Completing lifecycle action"
        );

        let mut attempt = 1;
        loop {
            let err = match self.fleet.complete_lifecycle_action(completion).await {
                Ok(()) => {
                    info!(result = %completion.result, attempt, "Lifecycle action completed");
                    return Ok(());
                }
                Err(e) => e,
            };

            let delay = self.retry.delay_after(attempt).filter(|_| err.is_transient());
            let Some(delay) = delay else {
                error!(
                    result = %completion.result,
                    attempt,
                    code = %err.code,
                    error = %err,
                    "Failed to complete lifecycle action"
                );
                return Err(ReportingError {
                    hook_name: completion.hook_name.clone(),
                    result: completion.result,
                    attempts: attempt,
                    source: err,
                });
            };

            warn!(
                attempt,
                code = %err.code,
                delay_secs = delay.as_secs(),
                "Lifecycle completion failed, retrying"
            );
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}
