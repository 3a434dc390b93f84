//! Lifecycle action payloads, validated launch events, and completion records.

use reattach_id::InstanceId;
use serde::{Deserialize, Serialize};

use crate::EventError;

/// Well-known values found in lifecycle action payloads.
pub mod lifecycle {
    /// Transition name for instance launches.
    pub const TRANSITION_LAUNCHING: &str = "autoscaling:EC2_INSTANCE_LAUNCHING";

    /// Detail type for launch lifecycle actions.
    pub const DETAIL_TYPE_LAUNCH: &str = "EC2 Instance-launch Lifecycle Action";
}

// =============================================================================
// Wire Payload
// =============================================================================

/// The `detail` object of a lifecycle action event.
///
/// Every field is optional on the wire; use [`LaunchEvent::from_detail`] to
/// validate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleActionDetail {
    #[serde(
        rename = "LifecycleHookName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub hook_name: Option<String>,

    #[serde(
        rename = "AutoScalingGroupName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub group_name: Option<String>,

    #[serde(
        rename = "EC2InstanceId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub instance_id: Option<String>,

    #[serde(
        rename = "LifecycleActionToken",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub action_token: Option<String>,

    #[serde(
        rename = "LifecycleTransition",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub transition: Option<String>,

    #[serde(
        rename = "NotificationMetadata",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub notification_metadata: Option<serde_json::Value>,
}

/// Returns the field value if it is present and not blank.
fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

// =============================================================================
// Validated Launch Event
// =============================================================================

/// A validated instance-launch notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchEvent {
    /// Lifecycle hook holding the instance.
    pub hook_name: String,

    /// Autoscaling group the instance belongs to.
    pub group_name: String,

    /// The freshly launched instance.
    pub instance_id: InstanceId,

    /// Token for the pending lifecycle action.
    ///
    /// When absent the completion identifies the action by instance ID.
    pub action_token: Option<String>,

    /// Raw transition name, if the payload carried one.
    pub transition: Option<String>,
}

impl LaunchEvent {
    /// Validate a lifecycle action detail.
    pub fn from_detail(detail: &LifecycleActionDetail) -> Result<Self, EventError> {
        let hook_name =
            present(&detail.hook_name).ok_or(EventError::MissingField("LifecycleHookName"))?;
        let group_name = present(&detail.group_name)
            .ok_or(EventError::MissingField("AutoScalingGroupName"))?;
        let instance_id =
            present(&detail.instance_id).ok_or(EventError::MissingField("EC2InstanceId"))?;

        let instance_id = instance_id
            .parse::<InstanceId>()
            .map_err(|e| EventError::InvalidField {
                field: "EC2InstanceId",
                reason: e.to_string(),
            })?;

        Ok(Self {
            hook_name: hook_name.to_string(),
            group_name: group_name.to_string(),
            instance_id,
            action_token: present(&detail.action_token).map(str::to_string),
            transition: present(&detail.transition).map(str::to_string),
        })
    }

    /// Returns true unless the payload names a transition other than launch.
    pub fn is_launch(&self) -> bool {
        self.transition
            .as_deref()
            .is_none_or(|t| t == lifecycle::TRANSITION_LAUNCHING)
    }

    /// Build the completion record for this event.
    pub fn completion(&self, result: LifecycleActionResult) -> HookCompletion {
        HookCompletion {
            hook_name: self.hook_name.clone(),
            group_name: self.group_name.clone(),
            instance_id: Some(self.instance_id.to_string()),
            action_token: self.action_token.clone(),
            result,
        }
    }
}

// =============================================================================
// Best-effort Hook Reference
// =============================================================================

/// Whatever identifying fields could be recovered from a payload.
///
/// Used on failure paths where the event may not have validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HookRef {
    pub hook_name: Option<String>,
    pub group_name: Option<String>,
    pub instance_id: Option<String>,
    pub action_token: Option<String>,
}

impl HookRef {
    /// Collect the identifying fields of a raw `detail` object.
    ///
    /// Each field is read on its own, so a malformed sibling does not hide the
    /// others. Blank and non-string values are skipped.
    pub fn from_value(detail: &serde_json::Value) -> Self {
        let field = |key: &str| {
            detail
                .get(key)
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            hook_name: field("LifecycleHookName"),
            group_name: field("AutoScalingGroupName"),
            instance_id: field("EC2InstanceId"),
            action_token: field("LifecycleActionToken"),
        }
    }

    /// Build a completion record if enough fields survived to address the action.
    ///
    /// The controller needs the hook and group, plus either the token or the
    /// instance ID.
    pub fn completion(&self, result: LifecycleActionResult) -> Option<HookCompletion> {
        let hook_name = self.hook_name.clone()?;
        let group_name = self.group_name.clone()?;
        if self.instance_id.is_none() && self.action_token.is_none() {
            return None;
        }

        Some(HookCompletion {
            hook_name,
            group_name,
            instance_id: self.instance_id.clone(),
            action_token: self.action_token.clone(),
            result,
        })
    }
}

// =============================================================================
// Completion
// =============================================================================

/// Terminal decision reported to the fleet controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleActionResult {
    /// Let the instance keep booting.
    Continue,
    /// Have the controller terminate the instance.
    Abandon,
}

impl LifecycleActionResult {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Continue => "CONTINUE",
            Self::Abandon => "ABANDON",
        }
    }
}

impl std::fmt::Display for LifecycleActionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record sent to the fleet controller to finish a lifecycle action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookCompletion {
    pub hook_name: String,
    pub group_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_token: Option<String>,
    pub result: LifecycleActionResult,
}

// =============================================================================
// Invocation Result
// =============================================================================

/// Structured result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    pub body: String,
}

impl InvocationResponse {
    /// A successful invocation.
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status_code: 200,
            body: body.into(),
        }
    }

    /// A handled failure.
    pub fn failed(body: impl Into<String>) -> Self {
        Self {
            status_code: 500,
            body: body.into(),
        }
    }

    /// Returns true for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn detail() -> LifecycleActionDetail {
        LifecycleActionDetail {
            hook_name: Some("attach-volume".to_string()),
            group_name: Some("prod-control-plane-3".to_string()),
            instance_id: Some("i-0123456789abcdef0".to_string()),
            action_token: Some("token-1".to_string()),
            transition: Some(lifecycle::TRANSITION_LAUNCHING.to_string()),
            notification_metadata: None,
        }
    }

    #[test]
    fn test_launch_event_from_detail() {
        let event = LaunchEvent::from_detail(&detail()).unwrap();
        assert_eq!(event.hook_name, "attach-volume");
        assert_eq!(event.group_name, "prod-control-plane-3");
        assert_eq!(event.instance_id.as_str(), "i-0123456789abcdef0");
        assert_eq!(event.action_token.as_deref(), Some("token-1"));
        assert!(event.is_launch());
    }

    #[rstest]
    #[case::hook(|d: &mut LifecycleActionDetail| d.hook_name = None, "LifecycleHookName")]
    #[case::group(|d: &mut LifecycleActionDetail| d.group_name = Some("  ".into()), "AutoScalingGroupName")]
    #[case::instance(|d: &mut LifecycleActionDetail| d.instance_id = None, "EC2InstanceId")]
    fn test_launch_event_missing_field(
        #[case] strip: fn(&mut LifecycleActionDetail),
        #[case] field: &'static str,
    ) {
        let mut d = detail();
        strip(&mut d);
        assert_eq!(
            LaunchEvent::from_detail(&d).unwrap_err(),
            EventError::MissingField(field)
        );
    }

    #[test]
    fn test_launch_event_token_optional() {
        let mut d = detail();
        d.action_token = None;
        let event = LaunchEvent::from_detail(&d).unwrap();
        let completion = event.completion(LifecycleActionResult::Continue);
        assert_eq!(completion.action_token, None);
        assert_eq!(completion.instance_id.as_deref(), Some("i-0123456789abcdef0"));
    }

    #[test]
    fn test_launch_event_invalid_instance_id() {
        let mut d = detail();
        d.instance_id = Some("not-an-instance".to_string());
        assert!(matches!(
            LaunchEvent::from_detail(&d).unwrap_err(),
            EventError::InvalidField {
                field: "EC2InstanceId",
                ..
            }
        ));
    }

    #[test]
    fn test_terminating_transition_is_not_launch() {
        let mut d = detail();
        d.transition = Some("autoscaling:EC2_INSTANCE_TERMINATING".to_string());
        assert!(!LaunchEvent::from_detail(&d).unwrap().is_launch());
    }

    #[test]
    fn test_hook_ref_completion_requires_addressable_action() {
        let partial = HookRef {
            hook_name: Some("attach-volume".into()),
            group_name: Some("prod-control-plane-3".into()),
            instance_id: None,
            action_token: None,
        };
        assert!(partial.completion(LifecycleActionResult::Abandon).is_none());

        let with_token = HookRef {
            action_token: Some("token-1".into()),
            ..partial.clone()
        };
        let completion = with_token
            .completion(LifecycleActionResult::Abandon)
            .unwrap();
        assert_eq!(completion.result, LifecycleActionResult::Abandon);

        let no_group = HookRef {
            group_name: None,
            ..with_token
        };
        assert!(no_group.completion(LifecycleActionResult::Abandon).is_none());
    }

    #[test]
    fn test_hook_ref_keeps_malformed_instance_id() {
        let hook = HookRef::from_value(&serde_json::json!({ "EC2InstanceId": "garbage" }));
        assert_eq!(hook.instance_id.as_deref(), Some("garbage"));
    }

    #[test]
    fn test_hook_ref_reads_fields_independently() {
        let hook = HookRef::from_value(&serde_json::json!({
            "LifecycleHookName": "attach-volume",
            "AutoScalingGroupName": "prod-control-plane-3",
            "EC2InstanceId": 42,
            "LifecycleActionToken": "token-1",
            "LifecycleTransition": ["not", "a", "string"]
        }));

        assert_eq!(hook.hook_name.as_deref(), Some("attach-volume"));
        assert_eq!(hook.instance_id, None);
        let completion = hook.completion(LifecycleActionResult::Abandon).unwrap();
        assert_eq!(completion.action_token.as_deref(), Some("token-1"));
    }

    #[test]
    fn test_hook_ref_from_non_object_is_empty() {
        assert_eq!(HookRef::from_value(&serde_json::json!("detail")), HookRef::default());
    }

    #[test]
    fn test_structured_notification_metadata_is_accepted() {
        let d: LifecycleActionDetail = serde_json::from_value(serde_json::json!({
            "LifecycleHookName": "attach-volume",
            "AutoScalingGroupName": "prod-control-plane-3",
            "EC2InstanceId": "i-0123456789abcdef0",
            "NotificationMetadata": { "role": "control-plane" }
        }))
        .unwrap();
        assert!(LaunchEvent::from_detail(&d).is_ok());
    }

    #[test]
    fn test_result_wire_format() {
        assert_eq!(
            serde_json::to_string(&LifecycleActionResult::Abandon).unwrap(),
            "\"ABANDON\""
        );
        assert_eq!(LifecycleActionResult::Continue.to_string(), "CONTINUE");
    }

    #[test]
    fn test_invocation_response_shape() {
        let json = serde_json::to_value(InvocationResponse::failed("Failed to attach volume"))
            .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"statusCode": 500, "body": "Failed to attach volume"})
        );
        assert!(InvocationResponse::ok("done").is_success());
    }
}
