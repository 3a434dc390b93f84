//! Lookup of the volume designated for a cluster slot.

use std::sync::Arc;

use reattach_id::{Slot, VolumeId};
use thiserror::Error;
use tracing::{error, warn};

use crate::provider::{BlockStorage, TagFilter};

/// Tag keys carried by slot volumes.
pub mod tags {
    pub const CLUSTER: &str = "Cluster";
    pub const SLOT: &str = "Slot";
    pub const VOLUME_TYPE: &str = "VolumeType";
}

/// No volume could be found for a slot.
///
/// Provider failures during the query are reported the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no volume found for cluster '{cluster}' slot {slot}")]
pub struct LocateError {
    pub cluster: String,
    pub slot: Slot,
}

/// Finds slot volumes by their tags.
pub struct VolumeLocator {
    storage: Arc<dyn BlockStorage>,
    cluster_name: String,
    volume_type: String,
}

impl VolumeLocator {
    /// Create a locator for one cluster.
    pub fn new(
        storage: Arc<dyn BlockStorage>,
        cluster_name: impl Into<String>,
        volume_type: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            cluster_name: cluster_name.into(),
            volume_type: volume_type.into(),
        }
    }

    /// Tag filters selecting the volume for `slot`.
    pub fn filters(&self, slot: Slot) -> Vec<TagFilter> {
        vec![
            TagFilter::new(tags::CLUSTER, &self.cluster_name),
            TagFilter::new(tags::SLOT, slot.to_string()),
            TagFilter::new(tags::VOLUME_TYPE, &self.volume_type),
        ]
    }

    /// Find the volume designated for `slot`.
    ///
    /// When several volumes match, the first one returned by the provider is
    /// used; the provider gives no ordering guarantee.
    pub async fn locate(&self, slot: Slot) -> Result<VolumeId, LocateError> {
        let not_found = || LocateError {
            cluster: self.cluster_name.clone(),
            slot,
        };

        let volumes = match self.storage.describe_volumes(&self.filters(slot)).await {
            Ok(volumes) => volumes,
            Err(e) => {
                error!(
                    cluster = %self.cluster_name,
                    %slot,
                    code = %e.code,
                    error = %e,
                    "Error finding volume"
                );
                return Err(not_found());
            }
        };

        let mut matches = volumes.into_iter();
        let Some(first) = matches.next() else {
            warn!(cluster = %self.cluster_name, %slot, "No volume found for slot");
            return Err(not_found());
        };

        let extra: Vec<String> = matches.map(|v| v.id.to_string()).collect();
        if !extra.is_empty() {
            warn!(
                %slot,
                volume_id = %first.id,
                ignored = ?extra,
                "Multiple volumes found for slot, using first one"
            );
        }

        Ok(first.id)
    }
}
