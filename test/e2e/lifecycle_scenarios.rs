//! End-to-end lifecycle scenarios.
//!
//! Each test seeds an in-memory cloud from a JSON world, feeds a raw launch
//! event through the orchestrator and checks both the invocation result and
//! what the fleet controller was told:
//!
//! 1. Stale attachment to a terminated instance is moved to the new instance
//! 2. No volume exists for the slot
//! 3. The attachment never settles
//!
//! ## Running
//!
//! ```bash
//! cargo test -p reattach-e2e --test lifecycle_scenarios
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use reattach_events::{InvocationResponse, LifecycleActionResult};
use reattach_id::{InstanceId, VolumeId};
use reattach_reconcile::RecordingSleeper;
use reattach_volume_attacher::handler::responses;
use reattach_volume_attacher::provider::memory::{CloudSeed, Operation};
use reattach_volume_attacher::provider::{AttachmentState, VolumeState};
use reattach_volume_attacher::{Config, EventOrchestrator, HandlerError, InMemoryCloud};
use serde_json::{json, Value};

const NEW_INSTANCE: &str = "i-0123456789abcdef0";
const OLD_INSTANCE: &str = "i-0fedcba9876543210";
const SLOT_VOLUME: &str = "vol-0a1b2c3d4e5f60718";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

fn config(vars: &[(&str, &str)]) -> Config {
    let mut vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    vars.entry("CLUSTER_NAME".to_string())
        .or_insert_with(|| "prod".to_string());
    Config::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

/// A world where slot 3's volume is still held by the instance it replaced.
fn world() -> CloudSeed {
    serde_json::from_value(json!({
        "volumes": [
            {
                "id": SLOT_VOLUME,
                "state": "in-use",
                "attachments": [{
                    "volume_id": SLOT_VOLUME,
                    "instance_id": OLD_INSTANCE,
                    "state": "attached",
                    "device": "/dev/sdf"
                }],
                "tags": { "Cluster": "prod", "Slot": "3", "VolumeType": "ephemeral" }
            },
            {
                "id": "vol-00000000000000002",
                "state": "available",
                "tags": { "Cluster": "prod", "Slot": "2", "VolumeType": "ephemeral" }
            }
        ],
        "instances": [
            { "id": OLD_INSTANCE, "state": "terminated" },
            { "id": NEW_INSTANCE, "state": "pending", "boot_polls": 2 }
        ],
        "settle_after": 2
    }))
    .unwrap()
}

fn launch_event(group_name: &str) -> Value {
    json!({
        "version": "0",
        "id": "7e4cbb4a-2b1c-4e3a-9d5f-0c1f1d2e3a4b",
        "detail-type": "EC2 Instance-launch Lifecycle Action",
        "source": "aws.autoscaling",
        "time": "2026-10-19T08:30:00Z",
        "region": "eu-west-1",
        "resources": [],
        "detail": {
            "LifecycleHookName": "attach-volume",
            "AutoScalingGroupName": group_name,
            "EC2InstanceId": NEW_INSTANCE,
            "LifecycleActionToken": "b1a6b1f4-3c2e-4b7e-9f51-6a0f1f7e9c11",
            "LifecycleTransition": "autoscaling:EC2_INSTANCE_LAUNCHING"
        }
    })
}

fn orchestrator(cloud: &Arc<InMemoryCloud>, config: &Config) -> EventOrchestrator {
    EventOrchestrator::new(
        config,
        cloud.clone(),
        cloud.clone(),
        cloud.clone(),
        Arc::new(RecordingSleeper::new()),
    )
}

fn reported(cloud: &InMemoryCloud) -> Vec<LifecycleActionResult> {
    cloud.completions().iter().map(|c| c.result).collect()
}

#[tokio::test]
async fn test_stale_volume_moves_to_new_instance() {
    init_tracing();
    let cloud = Arc::new(InMemoryCloud::from_seed(world()));

    let response = orchestrator(&cloud, &config(&[]))
        .handle(&launch_event("prod-control-plane-3"))
        .await
        .unwrap();

    assert_eq!(response, InvocationResponse::ok(responses::ATTACHED));
    assert_eq!(reported(&cloud), vec![LifecycleActionResult::Continue]);

    let volume_id: VolumeId = SLOT_VOLUME.parse().unwrap();
    let new_instance: InstanceId = NEW_INSTANCE.parse().unwrap();
    let volume = cloud.volume(&volume_id).unwrap();
    assert_eq!(volume.state, VolumeState::InUse);
    assert_eq!(volume.attachments.len(), 1);
    assert_eq!(volume.attachments[0].instance_id, new_instance);
    assert_eq!(volume.attachments[0].state, AttachmentState::Attached);

    let mutations: Vec<Operation> = cloud
        .mutating_calls()
        .iter()
        .map(|call| call.operation())
        .collect();
    assert_eq!(
        mutations,
        vec![Operation::DetachVolume, Operation::AttachVolume]
    );

    let completion = &cloud.completions()[0];
    assert_eq!(completion.group_name, "prod-control-plane-3");
    assert_eq!(
        completion.action_token.as_deref(),
        Some("b1a6b1f4-3c2e-4b7e-9f51-6a0f1f7e9c11")
    );
}

#[tokio::test]
async fn test_missing_slot_volume_abandons() {
    init_tracing();
    let cloud = Arc::new(InMemoryCloud::from_seed(world()));

    let err = orchestrator(&cloud, &config(&[]))
        .handle(&launch_event("prod-control-plane-7"))
        .await
        .unwrap_err();

    assert!(matches!(err, HandlerError::VolumeNotFound(_)));
    assert_eq!(err.reason_code(), "volume_not_found");
    assert_eq!(reported(&cloud), vec![LifecycleActionResult::Abandon]);
    assert_eq!(cloud.call_count(Operation::AttachVolume), 0);
    assert_eq!(cloud.call_count(Operation::DetachVolume), 0);
}

#[tokio::test]
async fn test_stalled_attach_abandons_with_failure_body() {
    init_tracing();
    let cloud = Arc::new(InMemoryCloud::from_seed(world()));
    cloud.stall_attachments(true);

    let response = orchestrator(&cloud, &config(&[("ATTACH_WAIT_TIMEOUT_SECS", "15")]))
        .handle(&launch_event("prod-control-plane-2"))
        .await
        .unwrap();

    assert_eq!(response, InvocationResponse::failed(responses::ATTACH_FAILED));
    assert!(!response.is_success());
    assert_eq!(reported(&cloud), vec![LifecycleActionResult::Abandon]);

    let volume = cloud
        .volume(&"vol-00000000000000002".parse().unwrap())
        .unwrap();
    assert_eq!(volume.attachments[0].state, AttachmentState::Attaching);
}

#[tokio::test]
async fn test_response_serializes_for_the_caller() {
    let body = serde_json::to_value(InvocationResponse::failed(responses::ATTACH_FAILED)).unwrap();
    assert_eq!(
        body,
        json!({ "statusCode": 500, "body": "Failed to attach volume" })
    );
}
