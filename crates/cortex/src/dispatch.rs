//! Engine dispatch (C11): selects an inference engine, enforces a
//! per-engine circuit breaker, throttles LLM/graph invocation by a decision
//! period, and applies the staleness gate ahead of any engine call.
//!
//! Engines are sum-typed rather than boxed trait objects — the set of
//! engines is closed and each variant carries its own small bit of state
//! (breaker, last candidate). The one place dynamic dispatch earns its
//! keep is the provider abstraction (C7), which this module drives for the
//! `llm`/`llm-provider` single-shot path and hands to the workflow graph
//! for `llm-agent`/`langgraph`.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::{AppConfig, Engine};
use crate::learner::AdaptiveLearner;
use crate::model::{Action, Candidate, Constraints, Observation, ToolTrace};
use crate::provider::Provider;
use crate::store::DecisionStore;
use crate::tools::ToolRegistry;
use crate::twin::TwinAdapter;
use crate::workflow::{CriticFeedback, WorkflowGraph};
use std::sync::Arc;

/// Open/closed failure-count gate guarding calls to one engine family.
pub struct EngineBreaker {
    failures: u32,
    last_failure_at: Option<Instant>,
    threshold: u32,
    cooldown: Duration,
}

impl EngineBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        EngineBreaker { failures: 0, last_failure_at: None, threshold, cooldown }
    }

    /// True iff `failures >= threshold` and the cooldown since the last
    /// failure has not yet elapsed.
    pub fn is_open(&self) -> bool {
        match self.last_failure_at {
            Some(at) => self.failures >= self.threshold && at.elapsed() < self.cooldown,
            None => false,
        }
    }

    pub fn on_success(&mut self) {
        self.failures = 0;
        self.last_failure_at = None;
    }

    pub fn on_failure(&mut self) {
        self.failures += 1;
        self.last_failure_at = Some(Instant::now());
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Opaque feature-based predictor contract for the ML engine. Model
/// training and weight loading are external collaborators; this crate only
/// owns the invocation-plus-safety-wrapper half of the ML path.
pub trait Predictor: Send + Sync {
    /// `features = [speed, temp, pressure, jitter_us]` → `(target, confidence)`.
    fn predict(&self, features: &[f64; 4]) -> (f64, f64);
}

/// Stand-in used when no model path is configured: proposes holding the
/// current speed with a fixed mid confidence. A real predictor loaded from
/// `model_path` would implement `Predictor` and be swapped in at startup.
pub struct HeuristicPredictor;

impl Predictor for HeuristicPredictor {
    fn predict(&self, features: &[f64; 4]) -> (f64, f64) {
        (features[0], 0.5)
    }
}

/// The outcome of one dispatch call, ready to feed the safety validator and
/// the decision store.
pub struct DispatchOutcome {
    pub candidate: Candidate,
    pub engine: &'static str,
    pub model: Option<String>,
    pub llm_latency_ms: Option<u64>,
    pub llm_output_hash: Option<String>,
    pub tool_traces: Vec<ToolTrace>,
    pub critic: Option<CriticFeedback>,
}

struct Throttle {
    last_invoked_at: Option<Instant>,
    last_candidate: Option<Candidate>,
}

/// Rule-table baseline engine (always available, never breaker-gated):
/// hold the current speed unless temperature is approaching the interlock,
/// in which case propose a modest downshift.
fn baseline_candidate(observation: &Observation, constraints: &Constraints) -> Candidate {
    let warn_temp = constraints.max_temp_c * 0.9;
    if observation.motor_temp_c > warn_temp {
        let target = (observation.motor_speed_rpm - constraints.max_rate_rpm * 0.5)
            .clamp(constraints.min_speed_rpm, constraints.max_speed_rpm);
        Candidate {
            action: Action::AdjustSetpoint,
            target_speed_rpm: target,
            confidence: 0.6,
            reasoning: format!(
                "baseline: temperature {:.1} approaching interlock {:.1}, downshifting",
                observation.motor_temp_c, constraints.max_temp_c
            ),
        }
    } else {
        Candidate::hold(observation.motor_speed_rpm, "baseline: nominal conditions, holding setpoint")
    }
}

/// Selects and invokes the configured engine, applying circuit breaker
/// protection, decision-period throttling, and the staleness gate.
pub struct EngineDispatch {
    provider: Option<Box<dyn Provider>>,
    predictor: Box<dyn Predictor>,
    tools: Arc<ToolRegistry>,
    workflow: Option<WorkflowGraph>,
    breaker: Mutex<EngineBreaker>,
    throttle: Mutex<Throttle>,
    cycle_count: Mutex<u64>,
}

impl EngineDispatch {
    pub fn new(
        cfg: &AppConfig,
        provider: Option<Box<dyn Provider>>,
        workflow_provider: Option<Box<dyn Provider>>,
        predictor: Box<dyn Predictor>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        let workflow = workflow_provider
            .map(|p| WorkflowGraph::new(p, Arc::clone(&tools), matches!(cfg.engine, Engine::Langgraph)));
        EngineDispatch {
            provider,
            predictor,
            tools,
            workflow,
            breaker: Mutex::new(EngineBreaker::new(cfg.failure_threshold, Duration::from_secs_f64(cfg.cooldown_s))),
            throttle: Mutex::new(Throttle { last_invoked_at: None, last_candidate: None }),
            cycle_count: Mutex::new(0),
        }
    }

    pub fn breaker_is_open(&self) -> bool {
        self.breaker.lock().expect("breaker lock poisoned").is_open()
    }

    pub fn breaker_failures(&self) -> u32 {
        self.breaker.lock().expect("breaker lock poisoned").failures()
    }

    /// Dispatch one cycle. `now_unix_us` gates staleness; `now_monotonic`
    /// feeds the decision-period throttle and circuit breaker cooldown,
    /// both of which are wall-clock-independent.
    #[allow(clippy::too_many_arguments)]
    pub async fn dispatch(
        &self,
        cfg: &AppConfig,
        observation: &Observation,
        constraints: &Constraints,
        last_recommendation: Option<&crate::model::Recommendation>,
        speed_history: Vec<f64>,
        temp_history: Vec<f64>,
        now_unix_us: Option<u64>,
        twin: Option<&TwinAdapter>,
        store: Option<&DecisionStore>,
        learner: Option<&AdaptiveLearner>,
    ) -> DispatchOutcome {
        let cycle = {
            let mut c = self.cycle_count.lock().expect("cycle counter lock poisoned");
            *c += 1;
            *c
        };

        // Staleness gate: short-circuit to fallback before touching any engine.
        if let Some(now) = now_unix_us {
            if let Some(age_us) = observation.age_us(now) {
                if age_us > constraints.staleness_us {
                    return DispatchOutcome {
                        candidate: Candidate {
                            action: Action::Fallback,
                            target_speed_rpm: observation.motor_speed_rpm,
                            confidence: 0.0,
                            reasoning: format!("stale observation: age {age_us}us exceeds budget {}us", constraints.staleness_us),
                        },
                        engine: "staleness-gate",
                        model: None,
                        llm_latency_ms: None,
                        llm_output_hash: None,
                        tool_traces: Vec::new(),
                        critic: None,
                    };
                }
            }
        }

        if !observation.is_usable() {
            return DispatchOutcome {
                candidate: Candidate::fallback(observation.motor_speed_rpm, "non-finite observation"),
                engine: "fallback",
                model: None,
                llm_latency_ms: None,
                llm_output_hash: None,
                tool_traces: Vec::new(),
                critic: None,
            };
        }

        if cycle <= cfg.warmup_cycles as u64 {
            return DispatchOutcome {
                candidate: Candidate::hold(observation.motor_speed_rpm, "warmup: holding for initial cycles"),
                engine: "warmup",
                model: None,
                llm_latency_ms: None,
                llm_output_hash: None,
                tool_traces: Vec::new(),
                critic: None,
            };
        }

        if cfg.attack_mode && cycle % 7 == 0 {
            return DispatchOutcome {
                candidate: Candidate {
                    action: Action::AdjustSetpoint,
                    target_speed_rpm: constraints.max_speed_rpm * 10.0,
                    confidence: 0.99,
                    reasoning: "attack-mode: injecting unsafe setpoint to test downstream enforcement".to_string(),
                },
                engine: "attack-mode",
                model: None,
                llm_latency_ms: None,
                llm_output_hash: None,
                tool_traces: Vec::new(),
                critic: None,
            };
        }

        let mut outcome = match cfg.engine {
            Engine::Baseline => DispatchOutcome {
                candidate: baseline_candidate(observation, constraints),
                engine: "baseline",
                model: None,
                llm_latency_ms: None,
                llm_output_hash: None,
                tool_traces: Vec::new(),
                critic: None,
            },
            Engine::Llm | Engine::LlmProvider => {
                self.dispatch_llm_single_shot(observation, constraints, cfg).await
            }
            Engine::LlmAgent | Engine::Langgraph => {
                self.dispatch_graph(
                    cfg,
                    observation,
                    constraints,
                    last_recommendation,
                    speed_history,
                    temp_history,
                    twin,
                    store,
                    learner,
                )
                .await
            }
        };

        // §4.8: fold the bucketed spine-acceptance rate into the agentic
        // engines' confidence before the safety validator sees it. Baseline
        // has no learned history to adjust against, so it's left untouched.
        if matches!(cfg.engine, Engine::Llm | Engine::LlmProvider | Engine::LlmAgent | Engine::Langgraph) {
            if let (Some(store), Some(learner)) = (store, learner) {
                outcome.candidate.confidence =
                    learner.compute_adjusted_confidence(outcome.candidate.confidence, observation, store);
            }
        }

        outcome
    }

    /// ML engine path (invoked explicitly by callers that opt into it via
    /// tooling outside the `Engine` enum's LLM family, e.g. a future
    /// `ml` engine value): feeds the opaque predictor a fixed feature
    /// vector and wraps its `(target, confidence)` in a candidate.
    pub fn dispatch_ml(&self, observation: &Observation) -> DispatchOutcome {
        let features = [
            observation.motor_speed_rpm,
            observation.motor_temp_c,
            observation.pressure_bar,
            observation.cycle_jitter_us as f64,
        ];
        let (target, confidence) = self.predictor.predict(&features);
        DispatchOutcome {
            candidate: Candidate {
                action: Action::AdjustSetpoint,
                target_speed_rpm: target,
                confidence,
                reasoning: "ml: opaque predictor output".to_string(),
            },
            engine: "ml",
            model: Some("opaque-predictor".to_string()),
            llm_latency_ms: None,
            llm_output_hash: None,
            tool_traces: Vec::new(),
            critic: None,
        }
    }

    async fn dispatch_llm_single_shot(
        &self,
        observation: &Observation,
        constraints: &Constraints,
        cfg: &AppConfig,
    ) -> DispatchOutcome {
        if self.breaker_is_open() {
            return DispatchOutcome {
                candidate: baseline_candidate(observation, constraints),
                engine: "baseline",
                model: None,
                llm_latency_ms: None,
                llm_output_hash: None,
                tool_traces: Vec::new(),
                critic: None,
            };
        }

        {
            let throttle = self.throttle.lock().expect("throttle lock poisoned");
            if let (Some(last), Some(candidate)) = (throttle.last_invoked_at, throttle.last_candidate.clone()) {
                if last.elapsed() < Duration::from_millis(cfg.decision_period_ms) {
                    return DispatchOutcome {
                        candidate,
                        engine: "llm-throttled",
                        model: None,
                        llm_latency_ms: None,
                        llm_output_hash: None,
                        tool_traces: Vec::new(),
                        critic: None,
                    };
                }
            }
        }

        let Some(provider) = &self.provider else {
            self.breaker.lock().expect("breaker lock poisoned").on_failure();
            return DispatchOutcome {
                candidate: baseline_candidate(observation, constraints),
                engine: "baseline",
                model: None,
                llm_latency_ms: None,
                llm_output_hash: None,
                tool_traces: Vec::new(),
                critic: None,
            };
        };

        let schema = serde_json::json!({
            "type": "object",
            "properties": {
                "action": {"type": "string", "enum": ["adjust_setpoint", "hold", "fallback", "review"]},
                "target_speed_rpm": {"type": "number"},
                "confidence": {"type": "number"},
                "reasoning": {"type": "string"}
            },
            "required": ["action", "target_speed_rpm", "confidence", "reasoning"]
        });
        let prompt = serde_json::json!({ "observation": observation, "constraints": constraints });
        let messages = vec![
            crate::provider::Message::system(
                "You recommend a motor speed setpoint. Respond only with JSON matching the given schema.",
            ),
            crate::provider::Message::user(prompt.to_string()),
        ];

        let started = Instant::now();
        let result = provider.chat(&messages, None, Some(&schema), 0.2, Duration::from_millis(cfg.timeout_ms)).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => match response.content.as_deref().and_then(|t| serde_json::from_str::<Candidate>(t).ok()) {
                Some(candidate) => {
                    self.breaker.lock().expect("breaker lock poisoned").on_success();
                    let output_hash = crate::audit::hash_envelope(&candidate);
                    let mut throttle = self.throttle.lock().expect("throttle lock poisoned");
                    throttle.last_invoked_at = Some(Instant::now());
                    throttle.last_candidate = Some(candidate.clone());
                    DispatchOutcome {
                        candidate,
                        engine: "llm",
                        model: Some(provider.model().to_string()),
                        llm_latency_ms: Some(latency_ms),
                        llm_output_hash: Some(output_hash),
                        tool_traces: Vec::new(),
                        critic: None,
                    }
                }
                None => {
                    self.breaker.lock().expect("breaker lock poisoned").on_failure();
                    DispatchOutcome {
                        candidate: baseline_candidate(observation, constraints),
                        engine: "baseline",
                        model: None,
                        llm_latency_ms: Some(latency_ms),
                        llm_output_hash: None,
                        tool_traces: Vec::new(),
                        critic: None,
                    }
                }
            },
            Err(_) => {
                self.breaker.lock().expect("breaker lock poisoned").on_failure();
                DispatchOutcome {
                    candidate: baseline_candidate(observation, constraints),
                    engine: "baseline",
                    model: None,
                    llm_latency_ms: Some(latency_ms),
                    llm_output_hash: None,
                    tool_traces: Vec::new(),
                    critic: None,
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn dispatch_graph(
        &self,
        cfg: &AppConfig,
        observation: &Observation,
        constraints: &Constraints,
        last_recommendation: Option<&crate::model::Recommendation>,
        speed_history: Vec<f64>,
        temp_history: Vec<f64>,
        twin: Option<&TwinAdapter>,
        store: Option<&DecisionStore>,
        learner: Option<&AdaptiveLearner>,
    ) -> DispatchOutcome {
        if self.breaker_is_open() {
            return DispatchOutcome {
                candidate: baseline_candidate(observation, constraints),
                engine: "baseline",
                model: None,
                llm_latency_ms: None,
                llm_output_hash: None,
                tool_traces: Vec::new(),
                critic: None,
            };
        }

        {
            let throttle = self.throttle.lock().expect("throttle lock poisoned");
            if let (Some(last), Some(candidate)) = (throttle.last_invoked_at, throttle.last_candidate.clone()) {
                if last.elapsed() < Duration::from_millis(cfg.decision_period_ms) {
                    return DispatchOutcome {
                        candidate,
                        engine: "graph-throttled",
                        model: None,
                        llm_latency_ms: None,
                        llm_output_hash: None,
                        tool_traces: Vec::new(),
                        critic: None,
                    };
                }
            }
        }

        let Some(workflow) = &self.workflow else {
            self.breaker.lock().expect("breaker lock poisoned").on_failure();
            return DispatchOutcome {
                candidate: baseline_candidate(observation, constraints),
                engine: "baseline",
                model: None,
                llm_latency_ms: None,
                llm_output_hash: None,
                tool_traces: Vec::new(),
                critic: None,
            };
        };

        let result = workflow
            .invoke(
                observation.clone(),
                *constraints,
                last_recommendation.cloned(),
                speed_history,
                temp_history,
                cfg.max_steps,
                Duration::from_millis(cfg.timeout_ms),
                twin,
                store,
                learner,
                cfg.rate_limit_is_violation,
            )
            .await;

        match result {
            Ok(output) => {
                self.breaker.lock().expect("breaker lock poisoned").on_success();
                let mut throttle = self.throttle.lock().expect("throttle lock poisoned");
                throttle.last_invoked_at = Some(Instant::now());
                throttle.last_candidate = Some(output.candidate.clone());
                let engine_tag = if matches!(cfg.engine, Engine::Langgraph) { "langgraph" } else { "llm-agent" };
                DispatchOutcome {
                    candidate: output.candidate,
                    engine: engine_tag,
                    model: None,
                    llm_latency_ms: Some(output.latency_ms),
                    llm_output_hash: None,
                    tool_traces: output.tool_traces,
                    critic: output.critic,
                }
            }
            Err(_) => {
                self.breaker.lock().expect("breaker lock poisoned").on_failure();
                DispatchOutcome {
                    candidate: baseline_candidate(observation, constraints),
                    engine: "baseline",
                    model: None,
                    llm_latency_ms: None,
                    llm_output_hash: None,
                    tool_traces: Vec::new(),
                    critic: None,
                }
            }
        }
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold_failures() {
        let mut breaker = EngineBreaker::new(3, Duration::from_secs(30));
        assert!(!breaker.is_open());
        breaker.on_failure();
        breaker.on_failure();
        assert!(!breaker.is_open());
        breaker.on_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn breaker_closes_on_success() {
        let mut breaker = EngineBreaker::new(1, Duration::from_secs(30));
        breaker.on_failure();
        assert!(breaker.is_open());
        breaker.on_success();
        assert!(!breaker.is_open());
        assert_eq!(breaker.failures(), 0);
    }

    #[test]
    fn breaker_closes_after_cooldown_elapses() {
        let mut breaker = EngineBreaker::new(1, Duration::from_millis(1));
        breaker.on_failure();
        assert!(breaker.is_open());
        std::thread::sleep(Duration::from_millis(5));
        assert!(!breaker.is_open());
    }

    fn obs(speed: f64, temp: f64, age_us: Option<u64>) -> Observation {
        Observation {
            timestamp_us: 0,
            unix_us: age_us.map(|_| 0),
            cycle_count: 0,
            safety_state: "nominal".into(),
            motor_speed_rpm: speed,
            motor_temp_c: temp,
            pressure_bar: 5.0,
            cycle_jitter_us: 0,
        }
    }

    fn constraints() -> Constraints {
        Constraints { min_speed_rpm: 0.0, max_speed_rpm: 3000.0, max_rate_rpm: 200.0, max_temp_c: 80.0, staleness_us: 1000 }
    }

    #[test]
    fn baseline_holds_under_nominal_temp() {
        let c = baseline_candidate(&obs(1500.0, 55.0, None), &constraints());
        assert_eq!(c.action, Action::Hold);
        assert_eq!(c.target_speed_rpm, 1500.0);
    }

    #[test]
    fn baseline_downshifts_near_interlock() {
        let c = baseline_candidate(&obs(1500.0, 75.0, None), &constraints());
        assert_eq!(c.action, Action::AdjustSetpoint);
        assert!(c.target_speed_rpm < 1500.0);
    }

    #[tokio::test]
    async fn stale_observation_short_circuits_to_fallback() {
        let cfg = AppConfig::from_env(Some("127.0.0.1".into()), Some(0), false, None).unwrap();
        let dispatch = EngineDispatch::new(
            &cfg,
            None,
            None,
            Box::new(HeuristicPredictor),
            Arc::new(ToolRegistry::standard()),
        );
        let mut stale_obs = obs(1500.0, 55.0, Some(0));
        stale_obs.unix_us = Some(0);
        let outcome = dispatch
            .dispatch(&cfg, &stale_obs, &constraints(), None, vec![], vec![], Some(1_000_000), None, None, None)
            .await;
        assert_eq!(outcome.candidate.action, Action::Fallback);
        assert_eq!(outcome.candidate.confidence, 0.0);
    }

    /// §4.8: an LLM-family engine's raw confidence is folded through the
    /// learner's success-rate adjustment before it reaches the caller — with
    /// no decision history yet, that's the conservative flat `* 0.8`.
    #[tokio::test]
    async fn llm_engine_applies_learned_confidence_adjustment() {
        use crate::learner::AdaptiveLearner;
        use crate::provider::MockProvider;
        use crate::store::DecisionStore;

        let mut cfg = AppConfig::from_env(Some("127.0.0.1".into()), Some(0), false, None).unwrap();
        cfg.engine = Engine::Llm;

        let reply = MockProvider::text_reply(
            serde_json::json!({
                "action": "adjust_setpoint",
                "target_speed_rpm": 1530.0,
                "confidence": 1.0,
                "reasoning": "within envelope"
            })
            .to_string(),
        );
        let provider = MockProvider::with_queue("mock", vec![reply]);
        let dispatch =
            EngineDispatch::new(&cfg, Some(Box::new(provider)), None, Box::new(HeuristicPredictor), Arc::new(ToolRegistry::standard()));

        let store = DecisionStore::open_in_memory(1000).unwrap();
        let learner = AdaptiveLearner::new(cfg.learning.clone());

        let outcome = dispatch
            .dispatch(&cfg, &obs(1500.0, 55.0, None), &constraints(), None, vec![], vec![], None, None, Some(&store), Some(&learner))
            .await;

        assert_eq!(outcome.engine, "llm");
        assert!((outcome.candidate.confidence - 0.8).abs() < 1e-9);
    }
}
