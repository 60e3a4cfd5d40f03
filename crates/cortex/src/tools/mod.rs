//! Tool registry (C8): named, schema-described capabilities the agentic
//! engines can call, executed against a shared read-mostly context.

pub mod trend;

use std::collections::HashMap;

use serde_json::Value;
use thiserror::Error;

use crate::learner::AdaptiveLearner;
use crate::model::{Constraints, Observation, Recommendation};
use crate::store::DecisionStore;
use crate::twin::TwinAdapter;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("upstream failure: {0}")]
    Upstream(String),
}

/// Read-mostly context handed to every tool invocation within one workflow
/// run. Borrowed, not owned — the workflow graph outlives any single tool
/// call.
pub struct AgentContext<'a> {
    pub observation: &'a Observation,
    pub constraints: &'a Constraints,
    pub last_recommendation: Option<&'a Recommendation>,
    pub speed_history: &'a [f64],
    pub temp_history: &'a [f64],
    pub twin: Option<&'a TwinAdapter>,
    pub store: Option<&'a DecisionStore>,
    pub learner: Option<&'a AdaptiveLearner>,
}

pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn schema(&self) -> Value;
    fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError>;
}

fn arg_f64(args: &Value, name: &str) -> Result<f64, ToolError> {
    args.get(name)
        .and_then(Value::as_f64)
        .ok_or_else(|| ToolError::InvalidArgs(format!("missing numeric field '{name}'")))
}

fn arg_usize(args: &Value, name: &str, default: usize) -> usize {
    args.get(name).and_then(Value::as_u64).map(|v| v as usize).unwrap_or(default)
}

struct GetConstraintsTool;
impl Tool for GetConstraintsTool {
    fn name(&self) -> &'static str {
        "get_constraints"
    }
    fn description(&self) -> &'static str {
        "Return the active safety envelope (speed bounds, max rate, max temperature)."
    }
    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    fn execute(&self, _args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        Ok(serde_json::to_value(ctx.constraints).unwrap_or(Value::Null))
    }
}

struct GetLastRecommendationTool;
impl Tool for GetLastRecommendationTool {
    fn name(&self) -> &'static str {
        "get_last_recommendation"
    }
    fn description(&self) -> &'static str {
        "Return the previous cycle's recommendation, if any."
    }
    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    fn execute(&self, _args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        Ok(ctx.last_recommendation.map(|r| serde_json::to_value(r).unwrap_or(Value::Null)).unwrap_or(Value::Null))
    }
}

struct GetStateSummaryTool;
impl Tool for GetStateSummaryTool {
    fn name(&self) -> &'static str {
        "get_state_summary"
    }
    fn description(&self) -> &'static str {
        "Return the current observation alongside speed/temperature trend summaries."
    }
    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
    fn execute(&self, _args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        Ok(serde_json::json!({
            "observation": ctx.observation,
            "speed_trend": trend::compute_trend(ctx.speed_history),
            "temp_trend": trend::compute_trend(ctx.temp_history),
        }))
    }
}

struct ComputeSlewLimitedSetpointTool;
impl Tool for ComputeSlewLimitedSetpointTool {
    fn name(&self) -> &'static str {
        "compute_slew_limited_setpoint"
    }
    fn description(&self) -> &'static str {
        "Clamp a proposed target to the maximum allowed rate of change from the current speed."
    }
    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "target": {"type": "number"},
                "current": {"type": "number"},
                "max_rate": {"type": "number"}
            },
            "required": ["target", "current", "max_rate"]
        })
    }
    fn execute(&self, args: &Value, _ctx: &AgentContext) -> Result<Value, ToolError> {
        let target = arg_f64(args, "target")?;
        let current = arg_f64(args, "current")?;
        let max_rate = arg_f64(args, "max_rate")?;
        let delta = target - current;
        let limited = if delta.abs() > max_rate { current + delta.signum() * max_rate } else { target };
        Ok(serde_json::json!({"limited_target": limited}))
    }
}

struct GetSpeedTrendTool;
impl Tool for GetSpeedTrendTool {
    fn name(&self) -> &'static str {
        "get_speed_trend"
    }
    fn description(&self) -> &'static str {
        "Linear-regression trend statistics over the last `window` speed samples."
    }
    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {"window": {"type": "integer"}}})
    }
    fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let window = arg_usize(args, "window", ctx.speed_history.len());
        let start = ctx.speed_history.len().saturating_sub(window);
        Ok(serde_json::to_value(trend::compute_trend(&ctx.speed_history[start..])).unwrap_or(Value::Null))
    }
}

struct GetTempTrendTool;
impl Tool for GetTempTrendTool {
    fn name(&self) -> &'static str {
        "get_temp_trend"
    }
    fn description(&self) -> &'static str {
        "Linear-regression trend statistics over the last `window` temperature samples."
    }
    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {"window": {"type": "integer"}}})
    }
    fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let window = arg_usize(args, "window", ctx.temp_history.len());
        let start = ctx.temp_history.len().saturating_sub(window);
        Ok(serde_json::to_value(trend::compute_trend(&ctx.temp_history[start..])).unwrap_or(Value::Null))
    }
}

struct QueryDigitalTwinTool;
impl Tool for QueryDigitalTwinTool {
    fn name(&self) -> &'static str {
        "query_digital_twin"
    }
    fn description(&self) -> &'static str {
        "Look up a nameplate or safety property from the digital twin registry."
    }
    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"property_name": {"type": "string"}},
            "required": ["property_name"]
        })
    }
    fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let name = args
            .get("property_name")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing 'property_name'".into()))?;
        let property = crate::twin::TwinProperty::parse(name)
            .ok_or_else(|| ToolError::InvalidArgs(format!("unknown twin property '{name}'")))?;

        match ctx.twin {
            Some(twin) => {
                // Tool execution is synchronous (the workflow graph's node
                // functions are not async); block on the twin's async HTTP
                // call from this dedicated runtime handle. `block_in_place`
                // panics outright on a current-thread runtime — `main.rs`
                // pins `#[tokio::main(flavor = "multi_thread")]` so this is
                // always safe in the running binary, not just by default.
                let (value, source) = tokio::task::block_in_place(|| {
                    tokio::runtime::Handle::current().block_on(twin.get_property(property, ctx.constraints))
                });
                Ok(serde_json::json!({"value": value, "source": source}))
            }
            None => Ok(serde_json::json!({
                "value": value_from_constraints(property, ctx.constraints),
                "source": "constraints_fallback",
            })),
        }
    }
}

fn value_from_constraints(property: crate::twin::TwinProperty, constraints: &Constraints) -> Value {
    use crate::twin::TwinProperty::*;
    match property {
        MaxSpeedRpm => serde_json::json!(constraints.max_speed_rpm),
        MinSpeedRpm => serde_json::json!(constraints.min_speed_rpm),
        MaxTemperatureC => serde_json::json!(constraints.max_temp_c),
        MaxRateChangeRpm => serde_json::json!(constraints.max_rate_rpm),
        SafetyIntegrityLevel | ManufacturerName | SerialNumber => serde_json::json!("unknown"),
    }
}

struct QueryDecisionHistoryTool;
impl Tool for QueryDecisionHistoryTool {
    fn name(&self) -> &'static str {
        "query_decision_history"
    }
    fn description(&self) -> &'static str {
        "Return the most recent decisions, newest first."
    }
    fn schema(&self) -> Value {
        serde_json::json!({"type": "object", "properties": {"limit": {"type": "integer"}}})
    }
    fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let store = ctx.store.ok_or_else(|| ToolError::Upstream("decision store unavailable".into()))?;
        let limit = arg_usize(args, "limit", 10);
        let rows = store
            .query_decisions(None, None, None, false, limit, 0)
            .map_err(|e| ToolError::Upstream(e.to_string()))?;
        Ok(serde_json::json!(rows
            .iter()
            .map(|r| serde_json::json!({
                "trace_id": r.trace_id,
                "timestamp_unix_us": r.timestamp_unix_us,
                "action": r.action,
                "target_speed_rpm": r.target_speed_rpm,
                "confidence": r.confidence,
                "engine": r.engine,
                "approved": r.approved,
                "spine_accepted": r.spine_accepted,
            }))
            .collect::<Vec<_>>()))
    }
}

struct GetSimilarScenariosTool;
impl Tool for GetSimilarScenariosTool {
    fn name(&self) -> &'static str {
        "get_similar_scenarios"
    }
    fn description(&self) -> &'static str {
        "Return past decisions ranked by a blend of observation similarity and spine outcome."
    }
    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"k": {"type": "integer"}, "threshold": {"type": "number"}}
        })
    }
    fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let store = ctx.store.ok_or_else(|| ToolError::Upstream("decision store unavailable".into()))?;
        let learner = ctx.learner.ok_or_else(|| ToolError::Upstream("adaptive learner unavailable".into()))?;
        let k = arg_usize(args, "k", 5);
        let threshold = args.get("threshold").and_then(Value::as_f64).unwrap_or(0.8);
        let scenarios = learner
            .get_success_weighted_similar(ctx.observation, k, threshold, store)
            .map_err(|e| ToolError::Upstream(e.to_string()))?;
        Ok(serde_json::json!(scenarios
            .iter()
            .map(|s| serde_json::json!({
                "trace_id": s.decision.trace_id,
                "similarity": s.similarity,
                "score": s.score,
                "spine_accepted": s.decision.spine_accepted,
                "target_speed_rpm": s.decision.target_speed_rpm,
            }))
            .collect::<Vec<_>>()))
    }
}

struct GetFewShotExamplesTool;
impl Tool for GetFewShotExamplesTool {
    fn name(&self) -> &'static str {
        "get_few_shot_examples"
    }
    fn description(&self) -> &'static str {
        "Return past accepted decisions similar to the current state, for use as few-shot prompt examples."
    }
    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"n": {"type": "integer"}, "min_confidence": {"type": "number"}}
        })
    }
    fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let store = ctx.store.ok_or_else(|| ToolError::Upstream("decision store unavailable".into()))?;
        let learner = ctx.learner.ok_or_else(|| ToolError::Upstream("adaptive learner unavailable".into()))?;
        let n = arg_usize(args, "n", 3);
        let min_confidence = args.get("min_confidence").and_then(Value::as_f64).unwrap_or(0.7);
        let examples = learner
            .get_few_shot_examples(ctx.observation, n, min_confidence, store)
            .map_err(|e| ToolError::Upstream(e.to_string()))?;
        Ok(serde_json::json!(examples
            .iter()
            .map(|s| serde_json::json!({
                "trace_id": s.decision.trace_id,
                "similarity": s.similarity,
                "target_speed_rpm": s.decision.target_speed_rpm,
                "confidence": s.decision.confidence,
                "reasoning": s.decision.reasoning,
            }))
            .collect::<Vec<_>>()))
    }
}

struct GetDecisionOutcomeTool;
impl Tool for GetDecisionOutcomeTool {
    fn name(&self) -> &'static str {
        "get_decision_outcome"
    }
    fn description(&self) -> &'static str {
        "Look up the recorded spine outcome for a given decision trace_id."
    }
    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"trace_id": {"type": "string"}},
            "required": ["trace_id"]
        })
    }
    fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let store = ctx.store.ok_or_else(|| ToolError::Upstream("decision store unavailable".into()))?;
        let trace_id = args
            .get("trace_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing 'trace_id'".into()))?;
        let row = store.get_decision(trace_id).map_err(|e| ToolError::Upstream(e.to_string()))?;
        Ok(match row {
            Some(r) => serde_json::json!({"found": true, "spine_accepted": r.spine_accepted}),
            None => serde_json::json!({"found": false}),
        })
    }
}

struct RecordFeedbackTool;
impl Tool for RecordFeedbackTool {
    fn name(&self) -> &'static str {
        "record_feedback"
    }
    fn description(&self) -> &'static str {
        "Record whether the spine accepted a prior recommendation."
    }
    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "trace_id": {"type": "string"},
                "accepted": {"type": "boolean"},
                "actual_speed_rpm": {"type": "number"}
            },
            "required": ["trace_id", "accepted"]
        })
    }
    fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let store = ctx.store.ok_or_else(|| ToolError::Upstream("decision store unavailable".into()))?;
        let learner = ctx.learner.ok_or_else(|| ToolError::Upstream("adaptive learner unavailable".into()))?;
        let trace_id = args
            .get("trace_id")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArgs("missing 'trace_id'".into()))?;
        let accepted = args
            .get("accepted")
            .and_then(Value::as_bool)
            .ok_or_else(|| ToolError::InvalidArgs("missing 'accepted'".into()))?;
        let actual = args.get("actual_speed_rpm").and_then(Value::as_f64);
        let updated = learner
            .record_outcome(store, trace_id, accepted, actual)
            .map_err(|e| ToolError::Upstream(e.to_string()))?;
        Ok(serde_json::json!({"updated": updated}))
    }
}

struct GetLearningStatsTool;
impl Tool for GetLearningStatsTool {
    fn name(&self) -> &'static str {
        "get_learning_stats"
    }
    fn description(&self) -> &'static str {
        "Return success-rate statistics bucketed by temperature and speed range."
    }
    fn schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {"temp_range": {"type": "string"}, "speed_range": {"type": "string"}}
        })
    }
    fn execute(&self, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        let store = ctx.store.ok_or_else(|| ToolError::Upstream("decision store unavailable".into()))?;
        let learner = ctx.learner.ok_or_else(|| ToolError::Upstream("adaptive learner unavailable".into()))?;
        let temp_range = args.get("temp_range").and_then(Value::as_str);
        let speed_range = args.get("speed_range").and_then(Value::as_str);
        let stats = learner
            .get_learning_stats(temp_range, speed_range, store)
            .map_err(|e| ToolError::Upstream(e.to_string()))?;
        Ok(serde_json::to_value(stats).unwrap_or(Value::Null))
    }
}

/// The canonical tool set (§4.6), keyed by name.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn standard() -> Self {
        let mut tools: HashMap<&'static str, Box<dyn Tool>> = HashMap::new();
        let all: Vec<Box<dyn Tool>> = vec![
            Box::new(GetConstraintsTool),
            Box::new(GetLastRecommendationTool),
            Box::new(GetStateSummaryTool),
            Box::new(ComputeSlewLimitedSetpointTool),
            Box::new(GetSpeedTrendTool),
            Box::new(GetTempTrendTool),
            Box::new(QueryDigitalTwinTool),
            Box::new(QueryDecisionHistoryTool),
            Box::new(GetSimilarScenariosTool),
            Box::new(GetFewShotExamplesTool),
            Box::new(GetDecisionOutcomeTool),
            Box::new(RecordFeedbackTool),
            Box::new(GetLearningStatsTool),
        ];
        for tool in all {
            tools.insert(tool.name(), tool);
        }
        ToolRegistry { tools }
    }

    pub fn specs(&self) -> Vec<crate::provider::ToolSpec> {
        let mut specs: Vec<crate::provider::ToolSpec> = self
            .tools
            .values()
            .map(|t| crate::provider::ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    pub fn execute(&self, name: &str, args: &Value, ctx: &AgentContext) -> Result<Value, ToolError> {
        self.tools.get(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?.execute(args, ctx)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Constraints;

    fn ctx<'a>(obs: &'a Observation, constraints: &'a Constraints) -> AgentContext<'a> {
        AgentContext {
            observation: obs,
            constraints,
            last_recommendation: None,
            speed_history: &[],
            temp_history: &[],
            twin: None,
            store: None,
            learner: None,
        }
    }

    fn obs() -> Observation {
        Observation {
            timestamp_us: 0,
            unix_us: Some(0),
            cycle_count: 0,
            safety_state: "nominal".into(),
            motor_speed_rpm: 1500.0,
            motor_temp_c: 55.0,
            pressure_bar: 5.0,
            cycle_jitter_us: 0,
        }
    }

    fn constraints() -> Constraints {
        Constraints { min_speed_rpm: 0.0, max_speed_rpm: 3000.0, max_rate_rpm: 50.0, max_temp_c: 80.0, staleness_us: 250_000 }
    }

    #[test]
    fn unknown_tool_errors() {
        let registry = ToolRegistry::standard();
        let o = obs();
        let c = constraints();
        let result = registry.execute("not_a_tool", &Value::Null, &ctx(&o, &c));
        assert!(matches!(result, Err(ToolError::UnknownTool(_))));
    }

    #[test]
    fn get_constraints_returns_current_envelope() {
        let registry = ToolRegistry::standard();
        let o = obs();
        let c = constraints();
        let result = registry.execute("get_constraints", &Value::Null, &ctx(&o, &c)).unwrap();
        assert_eq!(result["max_speed_rpm"], serde_json::json!(3000.0));
    }

    #[test]
    fn slew_limited_setpoint_clamps() {
        let registry = ToolRegistry::standard();
        let o = obs();
        let c = constraints();
        let args = serde_json::json!({"target": 2000.0, "current": 1500.0, "max_rate": 50.0});
        let result = registry.execute("compute_slew_limited_setpoint", &args, &ctx(&o, &c)).unwrap();
        assert_eq!(result["limited_target"], serde_json::json!(1550.0));
    }

    #[test]
    fn twin_query_without_adapter_falls_back_to_constraints() {
        let registry = ToolRegistry::standard();
        let o = obs();
        let c = constraints();
        let args = serde_json::json!({"property_name": "MaxSpeedRPM"});
        let result = registry.execute("query_digital_twin", &args, &ctx(&o, &c)).unwrap();
        assert_eq!(result["source"], serde_json::json!("constraints_fallback"));
        assert_eq!(result["value"], serde_json::json!(3000.0));
    }

    #[test]
    fn specs_are_sorted_and_nonempty() {
        let registry = ToolRegistry::standard();
        let specs = registry.specs();
        assert_eq!(specs.len(), 13);
        assert!(specs.windows(2).all(|w| w[0].name <= w[1].name));
    }
}
