//! Drives the full `Supervisor` loop over a real loopback socket, playing
//! the spine's side of the newline-delimited JSON protocol. Exercises
//! invariants 1-3 of the decision pipeline end to end: every envelope
//! either carries a safe target or a null one, `sequence` strictly
//! increases per session, and `reasoning_hash` is exactly
//! `sha256(canonical_json(envelope))`.

use cortex::provider::{MockProvider, ToolCall};
use cortex_testing::{sample_observation, supervisor_with_baseline, supervisor_with_provider, FakeSpine};

#[tokio::test]
async fn baseline_cycle_emits_approved_envelope_with_monotonic_sequence() {
    let (listener, port) = FakeSpine::reserve_port().await;
    let supervisor = supervisor_with_baseline("127.0.0.1", port);
    let mut spine = FakeSpine::accept(listener, supervisor).await;

    let obs = sample_observation();
    spine.send_state(&obs).await;
    let first = spine.recv_recommendation().await;
    assert_eq!(first["type"], "recommendation");
    assert_eq!(first["sequence"], 1);
    assert!(first["reasoning_hash"].as_str().map(|h| h.len() == 64).unwrap_or(false));

    spine.send_state(&obs).await;
    let second = spine.recv_recommendation().await;
    assert_eq!(second["sequence"], 2);
    assert!(second["sequence"].as_u64().unwrap() > first["sequence"].as_u64().unwrap());
}

/// Scenario (a): an out-of-bounds candidate target is clamped by bounds
/// then by rate, and the resulting recommendation is rejected so the wire
/// frame nulls out the target.
#[tokio::test]
async fn out_of_bounds_observation_yields_null_target_on_the_wire() {
    let (listener, port) = FakeSpine::reserve_port().await;
    let supervisor = supervisor_with_baseline("127.0.0.1", port);
    let mut spine = FakeSpine::accept(listener, supervisor).await;

    // Temperature already past the interlock: baseline proposes a
    // downshift, but the observation itself carries the violation.
    let mut obs = sample_observation();
    obs.motor_temp_c = 95.0;
    spine.send_state(&obs).await;
    let frame = spine.recv_recommendation().await;

    // Default constraints cap temperature at 80C; the interlock violation
    // always fires above that, so the wire value must be nulled out even
    // though the target itself may still be in-bounds.
    assert!(frame["target_speed_rpm"].is_null());
    assert_eq!(frame["confidence"], 0.0);
}

/// Scenario (f), driven end to end over the socket: a provider that first
/// requests `get_constraints` and then returns a valid recommendation JSON
/// payload produces one approved envelope after the tool round-trip.
#[tokio::test]
async fn agentic_engine_resolves_tool_call_then_recommendation_over_the_wire() {
    let (listener, port) = FakeSpine::reserve_port().await;

    let single_shot = MockProvider::new("mock-single-shot");
    let agent = MockProvider::with_queue(
        "mock-agent",
        vec![
            MockProvider::tool_call_reply(vec![ToolCall {
                id: "call_1".to_string(),
                name: "get_constraints".to_string(),
                arguments: serde_json::json!({}),
            }]),
            MockProvider::text_reply(
                serde_json::json!({
                    "action": "adjust_setpoint",
                    "target_speed_rpm": 1530.0,
                    "confidence": 0.95,
                    "reasoning": "within envelope"
                })
                .to_string(),
            ),
        ],
    );

    let supervisor = supervisor_with_provider("127.0.0.1", port, Box::new(single_shot), Box::new(agent));
    let mut spine = FakeSpine::accept(listener, supervisor).await;

    spine.send_state(&sample_observation()).await;
    let frame = spine.recv_recommendation().await;

    assert_eq!(frame["target_speed_rpm"].as_f64(), Some(1530.0));
    assert!(frame["confidence"].as_f64().unwrap() > 0.0);
}

/// Unknown frame types and malformed JSON lines are ignored rather than
/// breaking the session; the next valid `state` frame still gets a reply.
#[tokio::test]
async fn malformed_and_unknown_frames_are_skipped() {
    let (listener, port) = FakeSpine::reserve_port().await;
    let supervisor = supervisor_with_baseline("127.0.0.1", port);
    let mut spine = FakeSpine::accept(listener, supervisor).await;

    spine.send_raw("not json").await;
    spine.send_raw(r#"{"type":"hello","client_id":"spine-1"}"#).await;
    spine.send_state(&sample_observation()).await;

    let frame = spine.recv_recommendation().await;
    assert_eq!(frame["type"], "recommendation");
    assert_eq!(frame["sequence"], 1);
}
