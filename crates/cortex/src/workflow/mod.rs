//! Workflow graph (C9): the cooperative observe/plan/execute_tools/validate
//! /critic/finalize/fallback state machine used by the `llm-agent` and
//! `langgraph` engines.

mod nodes;
mod state;

pub use state::{AgentState, CriticFeedback, PlanOutput, WorkflowOutput};

use std::sync::Arc;
use std::time::Duration;

use crate::error::CortexResult;
use crate::learner::AdaptiveLearner;
use crate::model::{Constraints, Observation, Recommendation};
use crate::provider::Provider;
use crate::store::DecisionStore;
use crate::tools::ToolRegistry;
use crate::twin::TwinAdapter;

enum Stage {
    Plan,
    ExecuteTools,
    Validate,
    Critic,
    Finalize,
    Fallback(String),
}

/// Orchestrates node calls over one `AgentState` until it reaches
/// `finalize` or `fallback`. Bounded to `2 * max_steps + 4` node executions
/// so a misbehaving provider can never hang the supervisor loop.
pub struct WorkflowGraph {
    provider: Box<dyn Provider>,
    tools: Arc<ToolRegistry>,
    critic_enabled: bool,
}

impl WorkflowGraph {
    pub fn new(provider: Box<dyn Provider>, tools: Arc<ToolRegistry>, critic_enabled: bool) -> Self {
        WorkflowGraph { provider, tools, critic_enabled }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn invoke(
        &self,
        observation: Observation,
        constraints: Constraints,
        last_recommendation: Option<Recommendation>,
        speed_history: Vec<f64>,
        temp_history: Vec<f64>,
        max_steps: u32,
        timeout: Duration,
        twin: Option<&TwinAdapter>,
        store: Option<&DecisionStore>,
        learner: Option<&AdaptiveLearner>,
        rate_limit_is_violation: bool,
    ) -> CortexResult<WorkflowOutput> {
        let mut agent_state = AgentState::new(
            observation,
            constraints,
            last_recommendation,
            speed_history,
            temp_history,
            max_steps,
            rate_limit_is_violation,
        );
        nodes::observe(&mut agent_state);

        let tool_specs = self.tools.specs();
        let max_node_executions = 2 * max_steps + 4;
        let mut executions: u32 = 0;
        let mut stage = Stage::Plan;

        loop {
            executions += 1;
            if executions > max_node_executions {
                return Err(crate::error::CortexError::WorkflowExhaustion { steps: agent_state.step_count });
            }

            stage = match stage {
                Stage::Plan => {
                    nodes::plan(&mut agent_state, self.provider.as_ref(), &tool_specs, timeout).await?;
                    match &agent_state.plan_output {
                        PlanOutput::ToolCalls(_) if agent_state.step_count < agent_state.max_steps => {
                            Stage::ExecuteTools
                        }
                        PlanOutput::Recommendation(_) => Stage::Validate,
                        _ => Stage::Fallback(
                            agent_state.error_message.clone().unwrap_or_else(|| "plan exhausted steps".to_string()),
                        ),
                    }
                }
                Stage::ExecuteTools => {
                    nodes::execute_tools(&mut agent_state, &self.tools, twin, store, learner);
                    Stage::Plan
                }
                Stage::Validate => {
                    nodes::validate(&mut agent_state);
                    if self.critic_enabled {
                        Stage::Critic
                    } else {
                        Stage::Finalize
                    }
                }
                Stage::Critic => {
                    nodes::critic(&mut agent_state, self.provider.as_ref(), timeout).await?;
                    match &agent_state.critic_feedback {
                        Some(fb) if fb.approved => Stage::Finalize,
                        Some(_) if agent_state.step_count < agent_state.max_steps.saturating_sub(1) => Stage::Plan,
                        _ => Stage::Fallback("critic rejected".to_string()),
                    }
                }
                Stage::Finalize => {
                    nodes::finalize(&mut agent_state);
                    break;
                }
                Stage::Fallback(reason) => {
                    nodes::fallback(&mut agent_state, &reason);
                    break;
                }
            };
        }

        let candidate = agent_state
            .candidate
            .clone()
            .unwrap_or_else(|| crate::model::Candidate::fallback(agent_state.observation.motor_speed_rpm, "no candidate produced"));
        let (violations, warnings) = agent_state
            .validation
            .map(|v| (v.violations, v.warnings))
            .unwrap_or_default();

        Ok(WorkflowOutput {
            candidate,
            violations,
            warnings,
            tool_traces: agent_state.tool_traces,
            latency_ms: agent_state.latency_ms.unwrap_or(0),
            critic: agent_state.critic_feedback,
            step_count: agent_state.step_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, Candidate};
    use crate::provider::{MockProvider, ToolCall};

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
        Constraints { min_speed_rpm: 0.0, max_speed_rpm: 3000.0, max_rate_rpm: 200.0, max_temp_c: 80.0, staleness_us: 250_000 }
    }

    /// Scenario (f): a tool-call round then a valid recommendation.
    #[tokio::test]
    async fn tool_loop_then_recommendation() {
        let mock = MockProvider::with_queue(
            "mock-1",
            vec![
                MockProvider::tool_call_reply(vec![ToolCall {
                    id: "call_1".into(),
                    name: "get_constraints".into(),
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

        let graph = WorkflowGraph::new(Box::new(mock), Arc::new(ToolRegistry::standard()), false);
        let output = graph
            .invoke(obs(), constraints(), None, vec![], vec![], 6, Duration::from_millis(500), None, None, None, true)
            .await
            .unwrap();

        assert_eq!(output.candidate.target_speed_rpm, 1530.0);
        assert!(output.tool_traces.len() >= 1);
        assert_eq!(output.step_count, 2);
        assert!(output.violations.is_empty());
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back() {
        let mock = MockProvider::with_queue("mock-2", vec![MockProvider::text_reply("not json at all")]);
        let graph = WorkflowGraph::new(Box::new(mock), Arc::new(ToolRegistry::standard()), false);
        let output = graph
            .invoke(obs(), constraints(), None, vec![], vec![], 6, Duration::from_millis(500), None, None, None, true)
            .await
            .unwrap();
        assert_eq!(output.candidate.action, Action::Fallback);
    }

    #[tokio::test]
    async fn out_of_bounds_recommendation_is_rejected_and_clamped() {
        let mock = MockProvider::with_queue(
            "mock-3",
            vec![MockProvider::text_reply(
                serde_json::json!({
                    "action": "adjust_setpoint",
                    "target_speed_rpm": 5000.0,
                    "confidence": 0.9,
                    "reasoning": "too fast"
                })
                .to_string(),
            )],
        );
        let graph = WorkflowGraph::new(Box::new(mock), Arc::new(ToolRegistry::standard()), false);
        let output = graph
            .invoke(obs(), constraints(), None, vec![], vec![], 6, Duration::from_millis(500), None, None, None, true)
            .await
            .unwrap();
        assert!(!output.violations.is_empty());
        assert_eq!(output.candidate.target_speed_rpm, 1700.0);
    }
}
