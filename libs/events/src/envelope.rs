//! Event envelope - the wrapper the event bus puts around every trigger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EventError, LifecycleActionDetail};

/// The event envelope as delivered by the event bus.
///
/// Only `detail` matters for the attach; the remaining fields are carried for
/// log correlation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventEnvelope<D> {
    /// Envelope schema version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Delivery ID, kept verbatim. See [`EventEnvelope::delivery_id`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable event type (e.g., "EC2 Instance-launch Lifecycle Action").
    #[serde(
        rename = "detail-type",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub detail_type: Option<String>,

    /// Emitting service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    /// Account the event originated in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// When the event occurred, kept verbatim. See [`EventEnvelope::occurred_at`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,

    /// Region the event originated in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// ARNs of resources involved.
    #[serde(default)]
    pub resources: Vec<String>,

    /// Event-specific payload.
    #[serde(default)]
    pub detail: D,
}

impl<D> EventEnvelope<D> {
    /// The delivery ID, if it is a well-formed UUID.
    pub fn delivery_id(&self) -> Option<Uuid> {
        self.id.as_deref().and_then(|id| Uuid::parse_str(id).ok())
    }

    /// The event time, if it is a well-formed RFC 3339 timestamp.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        self.time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Envelope carrying an autoscaling lifecycle action.
pub type LifecycleEnvelope = EventEnvelope<LifecycleActionDetail>;

impl LifecycleEnvelope {
    /// Parse an envelope from a raw JSON payload.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, EventError> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_parses_bus_payload() {
        let raw = serde_json::json!({
            "version": "0",
            "id": "7e4cbb4a-2b1c-4e3a-9d5f-0c1f1d2e3a4b",
            "detail-type": "EC2 Instance-launch Lifecycle Action",
            "source": "aws.autoscaling",
            "account": "123456789012",
            "time": "2026-10-19T08:30:00Z",
            "region": "eu-west-1",
            "resources": ["arn:aws:autoscaling:eu-west-1:123456789012:autoScalingGroup:x"],
            "detail": {
                "LifecycleHookName": "attach-volume",
                "AutoScalingGroupName": "prod-control-plane-3",
                "EC2InstanceId": "i-0123456789abcdef0",
                "LifecycleActionToken": "token-1",
                "LifecycleTransition": "autoscaling:EC2_INSTANCE_LAUNCHING"
            }
        });

        let envelope = LifecycleEnvelope::from_value(&raw).unwrap();
        assert_eq!(envelope.source.as_deref(), Some("aws.autoscaling"));
        assert_eq!(
            envelope.detail.group_name.as_deref(),
            Some("prod-control-plane-3")
        );
        assert!(envelope.occurred_at().is_some());
        assert_eq!(
            envelope.delivery_id().map(|id| id.to_string()).as_deref(),
            Some("7e4cbb4a-2b1c-4e3a-9d5f-0c1f1d2e3a4b")
        );
        assert_eq!(envelope.resources.len(), 1);
    }

    #[test]
    fn test_loose_metadata_does_not_reject_envelope() {
        let raw = serde_json::json!({
            "id": "test-event-1",
            "time": "yesterday",
            "detail": {
                "LifecycleHookName": "attach-volume",
                "AutoScalingGroupName": "prod-control-plane-3",
                "EC2InstanceId": "i-0123456789abcdef0"
            }
        });

        let envelope = LifecycleEnvelope::from_value(&raw).unwrap();
        assert_eq!(envelope.id.as_deref(), Some("test-event-1"));
        assert_eq!(envelope.delivery_id(), None);
        assert_eq!(envelope.occurred_at(), None);
        assert_eq!(
            envelope.detail.instance_id.as_deref(),
            Some("i-0123456789abcdef0")
        );
    }

    #[test]
    fn test_envelope_without_detail_defaults() {
        let envelope = LifecycleEnvelope::from_value(&serde_json::json!({})).unwrap();
        assert_eq!(envelope.detail, LifecycleActionDetail::default());
    }

    #[test]
    fn test_envelope_rejects_non_object() {
        let err = LifecycleEnvelope::from_value(&serde_json::json!([1, 2])).unwrap_err();
        assert!(matches!(err, EventError::Malformed(_)));
    }
}
