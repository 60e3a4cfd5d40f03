//! State record threaded through the workflow graph's nodes (§4.7).
//!
//! A record with explicit optional fields rather than a loose map — a node
//! that forgets to set a field is a compile error at the read site, not a
//! runtime `KeyError`.

use std::time::Instant;

use crate::model::{Candidate, Constraints, Observation, Recommendation, ToolTrace};
use crate::provider::{Message, ToolCall};

#[derive(Debug, Clone)]
pub enum PlanOutput {
    ToolCalls(Vec<ToolCall>),
    Recommendation(Candidate),
    None,
}

#[derive(Debug, Clone)]
pub struct CriticFeedback {
    pub approved: bool,
    pub reason: String,
    pub violations: Vec<String>,
}

pub struct AgentState {
    pub observation: Observation,
    pub constraints: Constraints,
    pub last_recommendation: Option<Recommendation>,
    pub speed_history: Vec<f64>,
    pub temp_history: Vec<f64>,
    pub rate_limit_is_violation: bool,

    pub messages: Vec<Message>,
    pub step_count: u32,
    pub max_steps: u32,

    pub plan_output: PlanOutput,
    pub tool_traces: Vec<ToolTrace>,
    pub critic_feedback: Option<CriticFeedback>,
    pub validation: Option<crate::safety::ValidationResult>,
    pub candidate: Option<Candidate>,

    pub should_fallback: bool,
    pub error_message: Option<String>,

    pub start_time: Instant,
    pub latency_ms: Option<u64>,
}

impl AgentState {
    pub fn new(
        observation: Observation,
        constraints: Constraints,
        last_recommendation: Option<Recommendation>,
        speed_history: Vec<f64>,
        temp_history: Vec<f64>,
        max_steps: u32,
        rate_limit_is_violation: bool,
    ) -> Self {
        AgentState {
            observation,
            constraints,
            last_recommendation,
            speed_history,
            temp_history,
            rate_limit_is_violation,
            messages: Vec::new(),
            step_count: 0,
            max_steps,
            plan_output: PlanOutput::None,
            tool_traces: Vec::new(),
            critic_feedback: None,
            validation: None,
            candidate: None,
            should_fallback: false,
            error_message: None,
            start_time: Instant::now(),
            latency_ms: None,
        }
    }
}

/// Output handed back to the engine dispatcher once the graph terminates.
pub struct WorkflowOutput {
    pub candidate: Candidate,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
    pub tool_traces: Vec<ToolTrace>,
    pub latency_ms: u64,
    pub critic: Option<CriticFeedback>,
    pub step_count: u32,
}
