//! Round-trip law: `deserialize(serialize(record)) == record` for
//! `DecisionRecord`, the value persisted verbatim (as `observation_json`)
//! in the decision store and reconstructed when auditing a `reasoning_hash`.

use cortex::model::{Action, Candidate, Constraints, DecisionRecord, Observation, ToolTrace};
use quickcheck::{quickcheck, Arbitrary, Gen};

/// Bounded, always-finite f64 in `[-range, range]` — quickcheck's own
/// `f64::arbitrary` can produce NaN/infinity, which would make the
/// round-trip equality check meaningless (`NaN != NaN`).
fn bounded_f64(g: &mut Gen, range: f64) -> f64 {
    let raw = u32::arbitrary(g) as f64 / u32::MAX as f64; // [0, 1]
    (raw * 2.0 - 1.0) * range
}

fn bounded_string(g: &mut Gen, max_len: usize) -> String {
    let len = usize::arbitrary(g) % (max_len + 1);
    (0..len)
        .map(|_| *g.choose(&['a', 'b', 'c', ' ', '_', '-', '3']).unwrap())
        .collect()
}

fn arbitrary_observation(g: &mut Gen) -> Observation {
    Observation {
        timestamp_us: u64::arbitrary(g) % 1_000_000_000,
        unix_us: if bool::arbitrary(g) { Some(u64::arbitrary(g) % 1_000_000_000) } else { None },
        cycle_count: u64::arbitrary(g) % 100_000,
        safety_state: bounded_string(g, 16),
        motor_speed_rpm: bounded_f64(g, 5000.0),
        motor_temp_c: bounded_f64(g, 200.0),
        pressure_bar: bounded_f64(g, 20.0),
        cycle_jitter_us: u64::arbitrary(g) % 10_000,
    }
}

fn arbitrary_constraints(g: &mut Gen) -> Constraints {
    let min = bounded_f64(g, 1000.0);
    Constraints {
        min_speed_rpm: min,
        max_speed_rpm: min + bounded_f64(g, 5000.0).abs(),
        max_rate_rpm: bounded_f64(g, 1000.0).abs(),
        max_temp_c: bounded_f64(g, 200.0).abs() + 1.0,
        staleness_us: u64::arbitrary(g) % 1_000_000,
    }
}

fn arbitrary_candidate(g: &mut Gen) -> Candidate {
    let action = *g
        .choose(&[Action::AdjustSetpoint, Action::Hold, Action::Fallback, Action::Review])
        .unwrap();
    Candidate {
        action,
        target_speed_rpm: bounded_f64(g, 5000.0),
        confidence: (u32::arbitrary(g) as f64 / u32::MAX as f64).clamp(0.0, 1.0),
        reasoning: bounded_string(g, 64),
    }
}

fn arbitrary_tool_trace(g: &mut Gen) -> ToolTrace {
    ToolTrace {
        name: bounded_string(g, 24),
        args_hash: bounded_string(g, 64),
        result_hash: bounded_string(g, 64),
    }
}

#[derive(Clone, Debug)]
struct ArbDecisionRecord(DecisionRecord);

impl Arbitrary for ArbDecisionRecord {
    fn arbitrary(g: &mut Gen) -> Self {
        let tool_trace_count = usize::arbitrary(g) % 4;
        let violation_count = usize::arbitrary(g) % 3;
        let warning_count = usize::arbitrary(g) % 3;

        ArbDecisionRecord(DecisionRecord {
            trace_id: bounded_string(g, 32),
            timestamp_unix_us: u64::arbitrary(g) % 1_000_000_000,
            observation: arbitrary_observation(g),
            candidate: arbitrary_candidate(g),
            constraints: arbitrary_constraints(g),
            engine: bounded_string(g, 16),
            model: if bool::arbitrary(g) { Some(bounded_string(g, 16)) } else { None },
            llm_latency_ms: if bool::arbitrary(g) { Some(u64::arbitrary(g) % 60_000) } else { None },
            llm_output_hash: if bool::arbitrary(g) { Some(bounded_string(g, 64)) } else { None },
            approved: bool::arbitrary(g),
            violations: (0..violation_count).map(|_| bounded_string(g, 32)).collect(),
            warnings: (0..warning_count).map(|_| bounded_string(g, 32)).collect(),
            tool_traces: (0..tool_trace_count).map(|_| arbitrary_tool_trace(g)).collect(),
            spine_accepted: if bool::arbitrary(g) { Some(bool::arbitrary(g)) } else { None },
            actual_speed_rpm: if bool::arbitrary(g) { Some(bounded_f64(g, 5000.0)) } else { None },
            outcome_timestamp_us: if bool::arbitrary(g) { Some(u64::arbitrary(g) % 1_000_000_000) } else { None },
            outcome_notes: if bool::arbitrary(g) { Some(bounded_string(g, 48)) } else { None },
        })
    }
}

fn decision_record_round_trips(record: ArbDecisionRecord) -> bool {
    let record = record.0;
    let json = serde_json::to_string(&record).expect("DecisionRecord must serialize");
    let restored: DecisionRecord = serde_json::from_str(&json).expect("DecisionRecord must deserialize");
    restored == record
}

#[test]
fn decision_record_canonical_round_trip() {
    quickcheck(decision_record_round_trips as fn(ArbDecisionRecord) -> bool);
}
