//! Event orchestration.
//!
//! One lifecycle event in, one invocation response out. The handler resolves
//! the slot, finds its volume, waits for the instance, reconciles the
//! attachment and reports the lifecycle decision.
//!
//! Every path out of [`EventOrchestrator::handle`] either reports a decision
//! or passes through a single finalization step that reports ABANDON on a
//! best-effort basis, so the fleet controller is never left waiting on the
//! hook timeout.

use std::sync::Arc;

use reattach_events::{
    lifecycle, HookCompletion, HookRef, InvocationResponse, LaunchEvent, LifecycleActionResult,
    LifecycleEnvelope,
};
use reattach_reconcile::Sleeper;
use serde_json::Value;
use tracing::{error, field, info, instrument, warn, Span};

use crate::attachment::AttachmentReconciler;
use crate::config::Config;
use crate::error::HandlerError;
use crate::lifecycle::{LifecycleCompleter, ReportingError};
use crate::locator::VolumeLocator;
use crate::provider::{BlockStorage, Compute, FleetController};
use crate::readiness::InstanceReadinessGate;
use crate::slot::resolve_slot;
use crate::waiters::Waiters;

/// Response bodies.
pub mod responses {
    pub const ATTACHED: &str = "Volume attached successfully";
    pub const ATTACH_FAILED: &str = "Failed to attach volume";
    pub const INSTANCE_NOT_READY: &str = "Instance did not become ready";
}

/// Sequences slot resolution, volume lookup, readiness, reconciliation and
/// lifecycle completion for a single event.
pub struct EventOrchestrator {
    locator: VolumeLocator,
    readiness: InstanceReadinessGate,
    reconciler: AttachmentReconciler,
    completer: LifecycleCompleter,
}

impl EventOrchestrator {
    /// Wire up the components over the given provider clients.
    pub fn new(
        config: &Config,
        storage: Arc<dyn BlockStorage>,
        compute: Arc<dyn Compute>,
        fleet: Arc<dyn FleetController>,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        let waiters = Waiters::new(storage.clone(), compute, sleeper.clone());

        Self {
            locator: VolumeLocator::new(
                storage.clone(),
                &config.cluster_name,
                &config.volume_type,
            ),
            readiness: InstanceReadinessGate::new(waiters.clone(), config.instance_wait),
            reconciler: AttachmentReconciler::new(storage, waiters, sleeper.clone(), config),
            completer: LifecycleCompleter::new(fleet, sleeper, config.report_retry),
        }
    }

    /// Handle one lifecycle event.
    ///
    /// Attach failures and readiness timeouts are handled: ABANDON is reported
    /// and a `500` response returned. Anything else is returned as an error
    /// after the finalization step has run.
    #[instrument(skip_all, fields(group_name = field::Empty, instance_id = field::Empty))]
    pub async fn handle(&self, event: &Value) -> Result<InvocationResponse, HandlerError> {
        info!(%event, "Received event");

        let mut guard = CompletionGuard::new(&self.completer, hook_ref(event));
        let result = self.process(event, &mut guard).await;

        match &result {
            Ok(response) => info!(
                status_code = response.status_code,
                body = %response.body,
                "Invocation finished"
            ),
            Err(e) => {
                error!(reason_code = e.reason_code(), error = %e, "Invocation failed");
                guard.finalize().await;
            }
        }

        result
    }

    async fn process(
        &self,
        event: &Value,
        guard: &mut CompletionGuard<'_>,
    ) -> Result<InvocationResponse, HandlerError> {
        let envelope = LifecycleEnvelope::from_value(event)?;
        let launch = LaunchEvent::from_detail(&envelope.detail)?;

        let span = Span::current();
        span.record("group_name", launch.group_name.as_str());
        span.record("instance_id", launch.instance_id.as_str());

        info!(
            delivery_id = ?envelope.delivery_id(),
            occurred_at = ?envelope.occurred_at(),
            "Validated launch event"
        );

        let foreign_detail_type = envelope
            .detail_type
            .as_deref()
            .is_some_and(|t| t != lifecycle::DETAIL_TYPE_LAUNCH);
        if !launch.is_launch() || foreign_detail_type {
            warn!(
                transition = launch.transition.as_deref().unwrap_or("-"),
                detail_type = envelope.detail_type.as_deref().unwrap_or("-"),
                "Event is not an instance launch, handling it anyway"
            );
        }

        let slot = resolve_slot(&launch.group_name)?;
        info!(%slot, "Resolved slot");

        let volume_id = self.locator.locate(slot).await?;
        info!(%slot, %volume_id, "Found volume for slot");

        if let Err(e) = self.readiness.wait_until_running(&launch.instance_id).await {
            if !e.is_timeout() {
                return Err(HandlerError::InstanceNotReady {
                    instance_id: launch.instance_id.clone(),
                    source: e,
                });
            }
            error!(error = %e, "Instance did not become ready");
            guard
                .report(launch.completion(LifecycleActionResult::Abandon))
                .await?;
            return Ok(InvocationResponse::failed(responses::INSTANCE_NOT_READY));
        }

        let outcome = self
            .reconciler
            .reconcile(&volume_id, &launch.instance_id)
            .await;

        if outcome.succeeded {
            info!(
                %volume_id,
                attempts = outcome.attempts,
                "Volume attached, continuing lifecycle"
            );
            guard
                .report(launch.completion(LifecycleActionResult::Continue))
                .await?;
            Ok(InvocationResponse::ok(responses::ATTACHED))
        } else {
            error!(
                %volume_id,
                attempts = outcome.attempts,
                final_state = ?outcome.final_volume_state,
                "Failed to attach volume, abandoning lifecycle"
            );
            guard
                .report(launch.completion(LifecycleActionResult::Abandon))
                .await?;
            Ok(InvocationResponse::failed(responses::ATTACH_FAILED))
        }
    }
}

/// Recover what identifies the hook from a raw payload, even one that does
/// not parse as an envelope.
fn hook_ref(event: &Value) -> HookRef {
    event
        .get("detail")
        .map(HookRef::from_value)
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GuardState {
    /// No terminal decision has been delivered.
    Armed,
    /// A decision was delivered, or an ABANDON was attempted.
    Reported,
}

/// Tracks whether the invocation still owes the controller a decision.
struct CompletionGuard<'a> {
    completer: &'a LifecycleCompleter,
    hook: HookRef,
    state: GuardState,
}

impl<'a> CompletionGuard<'a> {
    fn new(completer: &'a LifecycleCompleter, hook: HookRef) -> Self {
        Self {
            completer,
            hook,
            state: GuardState::Armed,
        }
    }

    /// Report the designed decision for this invocation.
    ///
    /// A CONTINUE that fails leaves the guard armed.
    async fn report(&mut self, completion: HookCompletion) -> Result<(), ReportingError> {
        let result = self.completer.complete(&completion).await;
        if result.is_ok() || completion.result == LifecycleActionResult::Abandon {
            self.state = GuardState::Reported;
        }
        result
    }

    /// Report ABANDON if no decision went out. Failures are logged only.
    async fn finalize(&mut self) {
        if self.state == GuardState::Reported {
            return;
        }
        self.state = GuardState::Reported;

        let Some(completion) = self.hook.completion(LifecycleActionResult::Abandon) else {
            warn!(
                hook = ?self.hook,
                "Not enough event fields to abandon lifecycle action"
            );
            return;
        };

        match self.completer.complete(&completion).await {
            Ok(()) => info!("Abandoned lifecycle action after failure"),
            Err(e) => error!(error = %e, "Failed to abandon lifecycle action after failure"),
        }
    }
}
