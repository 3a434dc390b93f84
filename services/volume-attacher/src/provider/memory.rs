//! In-memory provider for testing and dry runs.
//!
//! Models just enough provider behavior to exercise the attacher:
//! - Tag-filtered volume queries, in insertion order
//! - Attach/detach that settle after a number of observations
//! - Instances that boot after a number of observations
//! - Injected faults per operation
//! - A log of every call made

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use reattach_events::HookCompletion;
use reattach_id::{InstanceId, VolumeId};
use serde::Deserialize;
use tracing::debug;

use super::{
    codes, Attachment, AttachmentState, BlockStorage, Compute, FleetController, InstanceState,
    ProviderError, TagFilter, Volume, VolumeState,
};

/// Provider operations, used to target injected faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    DescribeVolumes,
    DescribeVolume,
    AttachVolume,
    DetachVolume,
    DescribeInstance,
    CompleteLifecycleAction,
}

/// A recorded provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    DescribeVolumes(Vec<TagFilter>),
    DescribeVolume(VolumeId),
    AttachVolume {
        volume_id: VolumeId,
        instance_id: InstanceId,
        device: String,
    },
    DetachVolume {
        volume_id: VolumeId,
        instance_id: Option<InstanceId>,
        force: bool,
    },
    DescribeInstance(InstanceId),
    CompleteLifecycleAction(HookCompletion),
}

impl Call {
    /// The operation this call invoked.
    pub fn operation(&self) -> Operation {
        match self {
            Call::DescribeVolumes(_) => Operation::DescribeVolumes,
            Call::DescribeVolume(_) => Operation::DescribeVolume,
            Call::AttachVolume { .. } => Operation::AttachVolume,
            Call::DetachVolume { .. } => Operation::DetachVolume,
            Call::DescribeInstance(_) => Operation::DescribeInstance,
            Call::CompleteLifecycleAction(_) => Operation::CompleteLifecycleAction,
        }
    }

    /// Returns true for calls that change volume state.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Call::AttachVolume { .. } | Call::DetachVolume { .. })
    }
}

/// Initial world for an [`InMemoryCloud`], loadable from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CloudSeed {
    #[serde(default)]
    pub volumes: Vec<Volume>,

    #[serde(default)]
    pub instances: Vec<SeedInstance>,

    /// Observations before an attach or detach settles.
    #[serde(default = "default_settle_after")]
    pub settle_after: u32,
}

/// An instance in a [`CloudSeed`].
#[derive(Debug, Clone, Deserialize)]
pub struct SeedInstance {
    pub id: InstanceId,
    pub state: InstanceState,

    /// Observations a pending instance stays pending for.
    #[serde(default)]
    pub boot_polls: u32,
}

fn default_settle_after() -> u32 {
    1
}

#[derive(Debug, Clone)]
enum Transition {
    Attach(InstanceId),
    Detach(Option<InstanceId>),
}

#[derive(Debug, Clone)]
struct PendingTransition {
    transition: Transition,
    remaining: u32,
}

#[derive(Debug, Clone)]
struct VolumeRecord {
    volume: Volume,
    pending: Option<PendingTransition>,
}

impl VolumeRecord {
    fn apply(&mut self, transition: &Transition) {
        match transition {
            Transition::Attach(instance_id) => {
                for attachment in &mut self.volume.attachments {
                    if &attachment.instance_id == instance_id
                        && attachment.state == AttachmentState::Attaching
                    {
                        attachment.state = AttachmentState::Attached;
                    }
                }
            }
            Transition::Detach(instance_id) => {
                self.volume.attachments.retain(|a| match instance_id {
                    Some(id) => &a.instance_id != id,
                    None => false,
                });
                if !self.volume.attachments.iter().any(Attachment::is_active) {
                    self.volume.attachments.clear();
                    self.volume.state = VolumeState::Available;
                }
            }
        }
    }

    /// Advance any pending transition by one observation.
    fn observe(&mut self) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };

        pending.remaining = pending.remaining.saturating_sub(1);
        if pending.remaining == 0 {
            let transition = pending.transition.clone();
            self.pending = None;
            self.apply(&transition);
        }
    }

    fn schedule(&mut self, transition: Transition, settle_after: u32) {
        if settle_after == 0 {
            self.pending = None;
            self.apply(&transition);
        } else {
            self.pending = Some(PendingTransition {
                transition,
                remaining: settle_after,
            });
        }
    }
}

#[derive(Debug, Clone)]
struct InstanceRecord {
    state: InstanceState,
    boot_polls: u32,
}

#[derive(Debug, Default)]
struct CloudState {
    volumes: Vec<VolumeRecord>,
    instances: BTreeMap<InstanceId, InstanceRecord>,
    calls: Vec<Call>,
    faults: HashMap<Operation, VecDeque<ProviderError>>,
    persistent_faults: HashMap<Operation, ProviderError>,
    completions: Vec<HookCompletion>,
    settle_after: u32,
    stall_attachments: bool,
}

impl CloudState {
    fn record(&mut self, call: Call) -> Result<(), ProviderError> {
        let operation = call.operation();
        self.calls.push(call);

        if let Some(err) = self.persistent_faults.get(&operation) {
            return Err(err.clone());
        }
        match self.faults.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn volume_mut(&mut self, volume_id: &VolumeId) -> Result<&mut VolumeRecord, ProviderError> {
        self.volumes
            .iter_mut()
            .find(|r| &r.volume.id == volume_id)
            .ok_or_else(|| ProviderError::volume_not_found(volume_id))
    }
}

/// In-memory block storage, compute, and fleet controller.
#[derive(Debug)]
pub struct InMemoryCloud {
    state: Mutex<CloudState>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    /// Create an empty cloud whose transitions settle after one observation.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(CloudState {
                settle_after: default_settle_after(),
                ..CloudState::default()
            }),
        }
    }

    /// Create a cloud from a seed.
    pub fn from_seed(seed: CloudSeed) -> Self {
        let cloud = Self::new().with_settle_after(seed.settle_after);
        for volume in seed.volumes {
            cloud.add_volume(volume);
        }
        for instance in seed.instances {
            cloud.add_booting_instance(instance.id, instance.state, instance.boot_polls);
        }
        cloud
    }

    /// Set how many observations an attach or detach takes to settle.
    pub fn with_settle_after(self, observations: u32) -> Self {
        self.lock().settle_after = observations;
        self
    }

    fn lock(&self) -> MutexGuard<'_, CloudState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add or replace a volume.
    pub fn add_volume(&self, volume: Volume) {
        let mut state = self.lock();
        state.volumes.retain(|r| r.volume.id != volume.id);
        state.volumes.push(VolumeRecord {
            volume,
            pending: None,
        });
    }

    /// Add or replace an instance.
    pub fn add_instance(&self, instance_id: InstanceId, instance_state: InstanceState) {
        self.add_booting_instance(instance_id, instance_state, 0);
    }

    /// Add an instance that reports `pending` for `boot_polls` observations
    /// before it reports `running`.
    pub fn add_booting_instance(
        &self,
        instance_id: InstanceId,
        instance_state: InstanceState,
        boot_polls: u32,
    ) {
        self.lock().instances.insert(
            instance_id,
            InstanceRecord {
                state: instance_state,
                boot_polls,
            },
        );
    }

    /// Queue a one-shot fault for the next call of `operation`.
    pub fn inject_fault(&self, operation: Operation, error: ProviderError) {
        self.lock()
            .faults
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Fail every call of `operation`.
    pub fn fail_always(&self, operation: Operation, error: ProviderError) {
        self.lock().persistent_faults.insert(operation, error);
    }

    /// Keep new attachments in `attaching` forever.
    pub fn stall_attachments(&self, stall: bool) {
        self.lock().stall_attachments = stall;
    }

    /// Current snapshot of a volume, without counting as an observation.
    pub fn volume(&self, volume_id: &VolumeId) -> Option<Volume> {
        self.lock()
            .volumes
            .iter()
            .find(|r| &r.volume.id == volume_id)
            .map(|r| r.volume.clone())
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Attach and detach calls made so far, in order.
    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    /// Number of calls made to `operation`.
    pub fn call_count(&self, operation: Operation) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.operation() == operation)
            .count()
    }

    /// Lifecycle completions accepted so far.
    pub fn completions(&self) -> Vec<HookCompletion> {
        self.lock().completions.clone()
    }
}

#[async_trait]
impl BlockStorage for InMemoryCloud {
    async fn describe_volumes(&self, filters: &[TagFilter]) -> Result<Vec<Volume>, ProviderError> {
        let mut state = self.lock();
        state.record(Call::DescribeVolumes(filters.to_vec()))?;

        Ok(state
            .volumes
            .iter()
            .filter(|r| filters.iter().all(|f| f.matches(&r.volume.tags)))
            .map(|r| r.volume.clone())
            .collect())
    }

    async fn describe_volume(&self, volume_id: &VolumeId) -> Result<Volume, ProviderError> {
        let mut state = self.lock();
        state.record(Call::DescribeVolume(volume_id.clone()))?;

        let record = state.volume_mut(volume_id)?;
        record.observe();
        Ok(record.volume.clone())
    }

    async fn attach_volume(
        &self,
        volume_id: &VolumeId,
        instance_id: &InstanceId,
        device: &str,
    ) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.record(Call::AttachVolume {
            volume_id: volume_id.clone(),
            instance_id: instance_id.clone(),
            device: device.to_string(),
        })?;

        let instance_state = state
            .instances
            .get(instance_id)
            .map(|i| i.state)
            .ok_or_else(|| ProviderError::instance_not_found(instance_id))?;
        let settle_after = state.settle_after;
        let stall = state.stall_attachments;
        let record = state.volume_mut(volume_id)?;

        if instance_state != InstanceState::Running {
            return Err(ProviderError::new(
                codes::INCORRECT_INSTANCE_STATE,
                format!("The instance '{instance_id}' is not 'running'."),
            ));
        }
        if record.volume.state != VolumeState::Available {
            return Err(ProviderError::new(
                codes::INCORRECT_STATE,
                format!("vol '{volume_id}' is '{}'.", record.volume.state),
            ));
        }

        debug!(%volume_id, %instance_id, device, "[MOCK] Attaching volume");
        record.volume.state = VolumeState::InUse;
        record.volume.attachments = vec![Attachment {
            volume_id: volume_id.clone(),
            instance_id: instance_id.clone(),
            state: AttachmentState::Attaching,
            device: Some(device.to_string()),
        }];

        if stall {
            record.pending = None;
        } else {
            record.schedule(Transition::Attach(instance_id.clone()), settle_after);
        }
        Ok(())
    }

    async fn detach_volume(
        &self,
        volume_id: &VolumeId,
        instance_id: Option<&InstanceId>,
        force: bool,
    ) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.record(Call::DetachVolume {
            volume_id: volume_id.clone(),
            instance_id: instance_id.cloned(),
            force,
        })?;

        let settle_after = state.settle_after;
        let record = state.volume_mut(volume_id)?;

        let mut detached_any = false;
        for attachment in &mut record.volume.attachments {
            let targeted = instance_id.is_none_or(|id| &attachment.instance_id == id);
            if targeted && attachment.is_active() {
                attachment.state = AttachmentState::Detaching;
                detached_any = true;
            }
        }

        if !detached_any {
            return Err(ProviderError::new(
                codes::INCORRECT_STATE,
                format!("Volume '{volume_id}' is in the '{}' state.", record.volume.state),
            ));
        }

        debug!(%volume_id, force, "[MOCK] Detaching volume");
        record.schedule(Transition::Detach(instance_id.cloned()), settle_after);
        Ok(())
    }
}

#[async_trait]
impl Compute for InMemoryCloud {
    async fn describe_instance(
        &self,
        instance_id: &InstanceId,
    ) -> Result<InstanceState, ProviderError> {
        let mut state = self.lock();
        state.record(Call::DescribeInstance(instance_id.clone()))?;

        let instance = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| ProviderError::instance_not_found(instance_id))?;

        if instance.state == InstanceState::Pending {
            if instance.boot_polls == 0 {
                instance.state = InstanceState::Running;
            } else {
                instance.boot_polls -= 1;
            }
        }
        Ok(instance.state)
    }
}

#[async_trait]
impl FleetController for InMemoryCloud {
    async fn complete_lifecycle_action(
        &self,
        completion: &HookCompletion,
    ) -> Result<(), ProviderError> {
        let mut state = self.lock();
        state.record(Call::CompleteLifecycleAction(completion.clone()))?;

        debug!(
            hook_name = %completion.hook_name,
            result = %completion.result,
            "[MOCK] Lifecycle action completed"
        );
        state.completions.push(completion.clone());
        Ok(())
    }
}
