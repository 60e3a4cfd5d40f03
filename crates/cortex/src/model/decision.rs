use serde::{Deserialize, Serialize};

use super::{Candidate, Constraints, Observation};

/// Audit trace for one tool invocation inside a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolTrace {
    pub name: String,
    pub args_hash: String,
    pub result_hash: String,
}

/// Immutable (save for one feedback update) record of a single cycle's
/// decision, as persisted by the decision store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub trace_id: String,
    pub timestamp_unix_us: u64,
    pub observation: Observation,
    pub candidate: Candidate,
    pub constraints: Constraints,
    pub engine: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_latency_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_output_hash: Option<String>,
    pub approved: bool,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(default)]
    pub tool_traces: Vec<ToolTrace>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spine_accepted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_speed_rpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_timestamp_us: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_notes: Option<String>,
}

/// Outcome report from the spine about whether it accepted a recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeFeedback {
    pub trace_id: String,
    pub spine_accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_speed_rpm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_timestamp_us: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}
