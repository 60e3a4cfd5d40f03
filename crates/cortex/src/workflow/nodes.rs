//! Node functions for the workflow graph (§4.7). Each takes the shared
//! state by mutable reference and updates it in place; `invoke` in
//! `workflow/mod.rs` owns the transition logic between them.

use std::time::Duration;

use serde_json::Value;

use crate::learner::AdaptiveLearner;
use crate::model::{Candidate, ToolTrace};
use crate::provider::{Message, Provider, ToolSpec};
use crate::safety;
use crate::store::DecisionStore;
use crate::tools::{AgentContext, ToolRegistry};
use crate::twin::TwinAdapter;

use super::state::{AgentState, CriticFeedback, PlanOutput};

fn candidate_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "action": {"type": "string", "enum": ["adjust_setpoint", "hold", "fallback", "review"]},
            "target_speed_rpm": {"type": "number"},
            "confidence": {"type": "number"},
            "reasoning": {"type": "string"}
        },
        "required": ["action", "target_speed_rpm", "confidence", "reasoning"]
    })
}

fn critic_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "approved": {"type": "boolean"},
            "reason": {"type": "string"},
            "violations": {"type": "array", "items": {"type": "string"}}
        },
        "required": ["approved", "reason"]
    })
}

/// Build the initial transcript: a system prompt declaring the safety
/// envelope, and a user turn describing the current state.
pub fn observe(state: &mut AgentState) {
    let system = format!(
        "You supervise a motor's speed setpoint. Stay within bounds [{}, {}] rpm, \
         never change the setpoint by more than {} rpm per cycle, and never recommend \
         a setpoint while temperature exceeds {} C. Use the available tools to gather \
         context, then respond with JSON matching the Recommendation schema: {}",
        state.constraints.min_speed_rpm,
        state.constraints.max_speed_rpm,
        state.constraints.max_rate_rpm,
        state.constraints.max_temp_c,
        candidate_schema(),
    );
    let user = serde_json::json!({
        "observation": state.observation,
        "constraints": state.constraints,
        "speed_history_tail": state.speed_history.iter().rev().take(5).collect::<Vec<_>>(),
        "temp_history_tail": state.temp_history.iter().rev().take(5).collect::<Vec<_>>(),
    });
    state.messages.push(Message::system(system));
    state.messages.push(Message::user(user.to_string()));
}

/// Invoke the provider; on the penultimate step, force a schema-enforced
/// final answer with tools disabled if the provider supports it natively.
pub async fn plan(
    state: &mut AgentState,
    provider: &dyn Provider,
    tool_specs: &[ToolSpec],
    timeout: Duration,
) -> crate::error::CortexResult<()> {
    state.step_count += 1;
    let force_final =
        state.step_count >= state.max_steps.saturating_sub(1) && provider.supports_native_structured_output();

    let (tools_arg, schema_arg) = if force_final {
        (None, Some(candidate_schema()))
    } else {
        (Some(tool_specs), None)
    };

    let response = provider
        .chat(&state.messages, tools_arg, schema_arg.as_ref(), 0.2, timeout)
        .await?;

    if !response.tool_calls.is_empty() {
        state.messages.push(Message::assistant_tool_calls(response.tool_calls.clone()));
        state.plan_output = PlanOutput::ToolCalls(response.tool_calls);
        return Ok(());
    }

    match response.content.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => match serde_json::from_str::<Candidate>(text) {
            Ok(candidate) => {
                state.messages.push(Message::assistant(text));
                state.plan_output = PlanOutput::Recommendation(candidate);
            }
            Err(e) => {
                state.should_fallback = true;
                state.error_message = Some(format!("unparseable plan output: {e}"));
                state.plan_output = PlanOutput::None;
            }
        },
        _ => {
            state.should_fallback = true;
            state.error_message = Some("empty plan response".to_string());
            state.plan_output = PlanOutput::None;
        }
    }
    Ok(())
}

/// Execute every pending tool call against the registry, in order. A tool
/// failure is recorded as an error result and does not abort the cycle.
pub fn execute_tools(
    state: &mut AgentState,
    registry: &ToolRegistry,
    twin: Option<&TwinAdapter>,
    store: Option<&DecisionStore>,
    learner: Option<&AdaptiveLearner>,
) {
    let calls = match std::mem::replace(&mut state.plan_output, PlanOutput::None) {
        PlanOutput::ToolCalls(calls) => calls,
        other => {
            state.plan_output = other;
            return;
        }
    };

    for call in calls {
        let ctx = AgentContext {
            observation: &state.observation,
            constraints: &state.constraints,
            last_recommendation: state.last_recommendation.as_ref(),
            speed_history: &state.speed_history,
            temp_history: &state.temp_history,
            twin,
            store,
            learner,
        };
        let result = match registry.execute(&call.name, &call.arguments, &ctx) {
            Ok(value) => value,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        let args_hash = crate::audit::hash_tool_call(&call.name, &call.arguments);
        let result_hash = crate::audit::hash_envelope(&serde_json::json!({ "result": &result }));
        state.tool_traces.push(ToolTrace { name: call.name.clone(), args_hash, result_hash });
        state.messages.push(Message::tool_result(&call.id, result.to_string()));
    }
}

/// Run the deterministic safety validator against the plan's recommended
/// candidate and record the result.
pub fn validate(state: &mut AgentState) {
    let candidate = match &state.plan_output {
        PlanOutput::Recommendation(c) => c.clone(),
        _ => return,
    };
    let result =
        safety::validate(&candidate, &state.observation, &state.constraints, state.rate_limit_is_violation);
    let mut clamped = candidate;
    clamped.target_speed_rpm = result.target_speed_rpm;

    if !result.approved {
        state.critic_feedback = Some(CriticFeedback {
            approved: false,
            reason: "deterministic validator rejected".to_string(),
            violations: result.violations.clone(),
        });
    }
    state.candidate = Some(clamped);
    state.validation = Some(result);
}

/// Advisory LLM re-check. A no-op when the deterministic validator already
/// rejected the candidate — that rejection is authoritative and survives.
/// On parse failure, approves by default: the validator is authoritative,
/// the critic is advisory.
pub async fn critic(state: &mut AgentState, provider: &dyn Provider, timeout: Duration) -> crate::error::CortexResult<()> {
    if matches!(&state.critic_feedback, Some(fb) if !fb.approved) {
        return Ok(());
    }
    let Some(candidate) = &state.candidate else { return Ok(()) };

    let prompt = serde_json::json!({
        "candidate": candidate,
        "constraints": state.constraints,
        "observation": state.observation,
    });
    let messages = vec![
        Message::system(
            "You are a strict safety reviewer. Respond only with JSON \
             {\"approved\": bool, \"reason\": string, \"violations\": [string]}.",
        ),
        Message::user(prompt.to_string()),
    ];

    let response = provider.chat(&messages, None, Some(&critic_schema()), 0.0, timeout).await?;
    let feedback = response
        .content
        .as_deref()
        .and_then(|text| serde_json::from_str::<CriticFeedback>(text).ok())
        .unwrap_or(CriticFeedback { approved: true, reason: "unparseable critic response".to_string(), violations: vec![] });

    state.critic_feedback = Some(feedback);
    Ok(())
}

pub fn finalize(state: &mut AgentState) {
    state.latency_ms = Some(state.start_time.elapsed().as_millis() as u64);
}

pub fn fallback(state: &mut AgentState, reason: &str) {
    let candidate = Candidate::fallback(state.observation.motor_speed_rpm, reason);
    let result =
        safety::validate(&candidate, &state.observation, &state.constraints, state.rate_limit_is_violation);
    let mut clamped = candidate;
    clamped.target_speed_rpm = result.target_speed_rpm;
    state.candidate = Some(clamped);
    state.validation = Some(result);
    state.latency_ms = Some(state.start_time.elapsed().as_millis() as u64);
}

impl serde::Serialize for CriticFeedback {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("CriticFeedback", 3)?;
        s.serialize_field("approved", &self.approved)?;
        s.serialize_field("reason", &self.reason)?;
        s.serialize_field("violations", &self.violations)?;
        s.end()
    }
}

impl<'de> serde::Deserialize<'de> for CriticFeedback {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(serde::Deserialize)]
        struct Raw {
            approved: bool,
            #[serde(default)]
            reason: String,
            #[serde(default)]
            violations: Vec<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(CriticFeedback { approved: raw.approved, reason: raw.reason, violations: raw.violations })
    }
}
