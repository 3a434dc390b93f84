//! Provider contracts for block storage, compute, and the fleet controller.
//!
//! The attacher never talks to a provider API directly; every component is
//! handed the trait objects it needs at construction time.
//!
//! An in-memory implementation is provided for testing and dry runs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reattach_events::HookCompletion;
use reattach_id::{InstanceId, VolumeId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryCloud;

/// Provider error codes the attacher reacts to.
pub mod codes {
    pub const VOLUME_NOT_FOUND: &str = "InvalidVolume.NotFound";
    pub const INSTANCE_NOT_FOUND: &str = "InvalidInstanceID.NotFound";
    pub const INCORRECT_STATE: &str = "IncorrectState";
    pub const INCORRECT_INSTANCE_STATE: &str = "IncorrectInstanceState";
    pub const VALIDATION_ERROR: &str = "ValidationError";
    pub const REQUEST_LIMIT_EXCEEDED: &str = "RequestLimitExceeded";
    pub const REQUEST_TIMEOUT: &str = "RequestTimeout";
}

// =============================================================================
// Errors
// =============================================================================

/// How the attacher should treat a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The volume or instance no longer exists. Retrying cannot help.
    NotFound,

    /// The request was refused as invalid. Retrying the same call cannot help.
    Rejected,

    /// Throttling, eventual consistency, or a mid-transition state.
    Transient,
}

/// An error returned by a provider API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    /// Machine-readable error code.
    pub code: String,

    /// Human-readable message.
    pub message: String,
}

impl ProviderError {
    /// Create a provider error.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Error for a volume that does not exist.
    pub fn volume_not_found(volume_id: &VolumeId) -> Self {
        Self::new(
            codes::VOLUME_NOT_FOUND,
            format!("The volume '{volume_id}' does not exist."),
        )
    }

    /// Error for an instance that does not exist.
    pub fn instance_not_found(instance_id: &InstanceId) -> Self {
        Self::new(
            codes::INSTANCE_NOT_FOUND,
            format!("The instance ID '{instance_id}' does not exist"),
        )
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self.code.as_str() {
            codes::VOLUME_NOT_FOUND | codes::INSTANCE_NOT_FOUND => ErrorClass::NotFound,
            codes::VALIDATION_ERROR => ErrorClass::Rejected,
            _ => ErrorClass::Transient,
        }
    }

    /// Returns true if the addressed resource no longer exists.
    pub fn is_not_found(&self) -> bool {
        self.class() == ErrorClass::NotFound
    }

    /// Returns true if retrying the call may succeed.
    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

// =============================================================================
// Resource Model
// =============================================================================

/// Lifecycle state of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Error,
}

impl VolumeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::InUse => "in-use",
            Self::Deleting => "deleting",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for VolumeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a single volume attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentState {
    Attaching,
    Attached,
    Detaching,
    Detached,
}

impl AttachmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Attaching => "attaching",
            Self::Attached => "attached",
            Self::Detaching => "detaching",
            Self::Detached => "detached",
        }
    }
}

impl std::fmt::Display for AttachmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Association between a volume and an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub volume_id: VolumeId,
    pub instance_id: InstanceId,
    pub state: AttachmentState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
}

impl Attachment {
    /// Returns true while the attachment holds the volume (attaching or attached).
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            AttachmentState::Attaching | AttachmentState::Attached
        )
    }
}

/// Snapshot of a volume as reported by the storage service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: VolumeId,
    pub state: VolumeState,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl Volume {
    /// Find the attachment for a given instance.
    pub fn attachment_to(&self, instance_id: &InstanceId) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|a| &a.instance_id == instance_id)
    }
}

/// Lifecycle state of a compute instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        }
    }

    /// Returns true for states an instance never returns to `running` from
    /// without outside intervention.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ShuttingDown | Self::Terminated | Self::Stopping | Self::Stopped
        )
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tag equality filter for volume queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagFilter {
    pub key: String,
    pub value: String,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Returns true if the tag set carries this key with this value.
    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        tags.get(&self.key) == Some(&self.value)
    }
}

// =============================================================================
// Service Contracts
// =============================================================================

/// Block storage service.
#[async_trait]
pub trait BlockStorage: Send + Sync {
    /// List volumes whose tags match every filter.
    async fn describe_volumes(&self, filters: &[TagFilter]) -> Result<Vec<Volume>, ProviderError>;

    /// Read a single volume. Fails with a not-found error if it does not exist.
    async fn describe_volume(&self, volume_id: &VolumeId) -> Result<Volume, ProviderError>;

    /// Request attachment of a volume to an instance at `device`.
    async fn attach_volume(
        &self,
        volume_id: &VolumeId,
        instance_id: &InstanceId,
        device: &str,
    ) -> Result<(), ProviderError>;

    /// Request detachment of a volume, optionally naming the instance.
    async fn detach_volume(
        &self,
        volume_id: &VolumeId,
        instance_id: Option<&InstanceId>,
        force: bool,
    ) -> Result<(), ProviderError>;
}

/// Compute service.
#[async_trait]
pub trait Compute: Send + Sync {
    /// Read the lifecycle state of an instance.
    async fn describe_instance(&self, instance_id: &InstanceId)
        -> Result<InstanceState, ProviderError>;
}

/// Fleet controller owning the lifecycle hooks.
#[async_trait]
pub trait FleetController: Send + Sync {
    /// Finish a pending lifecycle action.
    async fn complete_lifecycle_action(
        &self,
        completion: &HookCompletion,
    ) -> Result<(), ProviderError>;
}
