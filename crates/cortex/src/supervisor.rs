//! Supervisor loop (C12): dials the spine's state socket, runs one
//! per-cycle pass through dispatch → safety validator → persistence →
//! outbound envelope, and reconnects with bounded backoff on socket loss.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{info, info_span, warn, Instrument};

use crate::audit::{canonical_json, sha256_hex};
use crate::auth;
use crate::buffer::ObservationBuffer;
use crate::cache::SemanticCache;
use crate::config::AppConfig;
use crate::dispatch::EngineDispatch;
use crate::learner::AdaptiveLearner;
use crate::model::{Constraints, DecisionRecord, Observation, Recommendation};
use crate::safety;
use crate::store::DecisionStore;
use crate::twin::TwinAdapter;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Minimal shape of the spine's `state` frame; unknown fields are ignored by
/// virtue of `serde`'s default behaviour (extra keys are simply unmatched).
#[derive(Debug, Deserialize)]
struct StateFrame {
    #[serde(rename = "type")]
    frame_type: String,
    timestamp_us: u64,
    unix_us: Option<u64>,
    #[serde(default)]
    cycle_count: u64,
    safety_state: String,
    motor_speed_rpm: f64,
    motor_temp_c: f64,
    pressure_bar: f64,
    #[serde(default)]
    cycle_jitter_us: u64,
}

impl From<StateFrame> for Observation {
    fn from(f: StateFrame) -> Self {
        Observation {
            timestamp_us: f.timestamp_us,
            unix_us: f.unix_us,
            cycle_count: f.cycle_count,
            safety_state: f.safety_state,
            motor_speed_rpm: f.motor_speed_rpm,
            motor_temp_c: f.motor_temp_c,
            pressure_bar: f.pressure_bar,
            cycle_jitter_us: f.cycle_jitter_us,
        }
    }
}

#[derive(Debug, Serialize)]
struct ProtocolVersion {
    major: u32,
    minor: u32,
}

/// The exact envelope `reasoning_hash` is computed over; every field here
/// is also what gets persisted, so a verifier can reconstruct the hash from
/// a `DecisionRecord` alone.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    observation_hash: &'a str,
    constraints_hash: &'a str,
    candidate: &'a crate::model::Candidate,
    trace_id: &'a str,
    approved: bool,
    violations: &'a [String],
    warnings: &'a [String],
    engine: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    llm_latency_ms: &'a Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    llm_output_hash: &'a Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    critic: &'a Option<crate::workflow::CriticFeedback>,
}

#[derive(Debug, Serialize)]
struct OutboundFrame {
    #[serde(rename = "type")]
    frame_type: &'static str,
    protocol_version: ProtocolVersion,
    sequence: u64,
    issued_at_unix_us: u64,
    ttl_ms: u64,
    target_speed_rpm: Option<f64>,
    confidence: f64,
    reasoning_hash: String,
    client_unix_us: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,
}

/// Owns every subsystem the supervisor loop drives. Constructed once at
/// startup and shared (by reference) across the lifetime of the process.
pub struct Supervisor {
    cfg: Arc<AppConfig>,
    store: DecisionStore,
    buffer: ObservationBuffer,
    cache: SemanticCache,
    learner: AdaptiveLearner,
    dispatch: EngineDispatch,
    twin: Option<TwinAdapter>,
}

impl Supervisor {
    pub fn new(
        cfg: Arc<AppConfig>,
        store: DecisionStore,
        buffer: ObservationBuffer,
        cache: SemanticCache,
        learner: AdaptiveLearner,
        dispatch: EngineDispatch,
        twin: Option<TwinAdapter>,
    ) -> Self {
        Supervisor { cfg, store, buffer, cache, learner, dispatch, twin }
    }

    /// Dial the spine, run cycles until the connection drops, then retry
    /// with exponential backoff capped at `MAX_BACKOFF`. Never returns
    /// under normal operation; only a fatal startup error upstream prevents
    /// this from being called at all.
    pub async fn run(&self) -> ! {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            match TcpStream::connect((self.cfg.host.as_str(), self.cfg.port)).await {
                Ok(stream) => {
                    backoff = INITIAL_BACKOFF;
                    info!(host = %self.cfg.host, port = self.cfg.port, "connected to spine");
                    if let Err(e) = self.run_session(stream).await {
                        warn!(error = %e, "session ended, reconnecting");
                    }
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "connect failed, backing off");
                }
            }
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// One connection's worth of cycles. `sequence` restarts at 1 for every
    /// new session, per the session-scoped ordering guarantee.
    async fn run_session(&self, stream: TcpStream) -> std::io::Result<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        let mut sequence: u64 = 0;
        let mut last_recommendation: Option<Recommendation> = None;
        let mut last_twin_push: Option<Instant> = None;

        while let Some(line) = lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(trimmed) else {
                continue;
            };
            if value.get("type").and_then(Value::as_str) != Some("state") {
                continue;
            }
            let Ok(frame) = serde_json::from_value::<StateFrame>(value) else {
                continue;
            };
            if frame.frame_type != "state" {
                continue;
            }

            sequence += 1;
            let trace_id = random_trace_id();
            let observation: Observation = frame.into();
            let constraints = self.cfg.constraints();

            let span = info_span!("cycle", trace_id = %trace_id, sequence, engine = %self.cfg.engine.as_str());
            let outbound = self
                .process_cycle(&observation, &constraints, trace_id, sequence, &mut last_recommendation)
                .instrument(span)
                .await;

            write_half.write_all(outbound.as_bytes()).await?;
            write_half.write_all(b"\n").await?;
            write_half.flush().await?;

            if let Some(twin) = &self.twin {
                let due = last_twin_push
                    .map(|at| at.elapsed() >= Duration::from_secs_f64(self.cfg.twin.update_interval_s.max(0.0)))
                    .unwrap_or(true);
                if due {
                    let _ = twin.ensure_models().await;
                    let _ = twin
                        .update_operational(&observation.safety_state, observation.cycle_count, true)
                        .await;
                    last_twin_push = Some(Instant::now());
                }
            }
        }
        Ok(())
    }

    /// Steps 2-9 of the per-cycle contract: materialise + hash + dispatch +
    /// validate + persist + compose the outbound frame text.
    async fn process_cycle(
        &self,
        observation: &Observation,
        constraints: &Constraints,
        trace_id: String,
        sequence: u64,
        last_recommendation: &mut Option<Recommendation>,
    ) -> String {
        let now_unix_us = observation.unix_us;

        let observation_hash = sha256_hex(&canonical_json(&serde_json::json!({ "observation": observation })));
        let constraints_hash = sha256_hex(&canonical_json(&serde_json::json!({ "constraints": constraints })));

        let now_s = now_unix_us.map(|t| t as f64 / 1_000_000.0).unwrap_or(0.0);
        let cached = self.cache.lookup(observation, constraints, now_s);

        let (speed_history, temp_history) = self.buffer.get_window(20);

        let outcome = match cached {
            Some(candidate) => crate::dispatch::DispatchOutcome {
                candidate,
                engine: "cache",
                model: None,
                llm_latency_ms: None,
                llm_output_hash: None,
                tool_traces: Vec::new(),
                critic: None,
            },
            None => {
                self.dispatch
                    .dispatch(
                        &self.cfg,
                        observation,
                        constraints,
                        last_recommendation.as_ref(),
                        speed_history,
                        temp_history,
                        now_unix_us,
                        self.twin.as_ref(),
                        Some(&self.store),
                        Some(&self.learner),
                    )
                    .await
            }
        };

        if outcome.engine != "cache" {
            self.cache.store(observation, constraints, &outcome.candidate, now_s);
        }

        let validation =
            safety::validate(&outcome.candidate, observation, constraints, self.cfg.rate_limit_is_violation);
        let mut clamped_candidate = outcome.candidate.clone();
        clamped_candidate.target_speed_rpm = validation.target_speed_rpm;

        let observation_hash_ref = observation_hash.as_str();
        let constraints_hash_ref = constraints_hash.as_str();
        let envelope = Envelope {
            observation_hash: observation_hash_ref,
            constraints_hash: constraints_hash_ref,
            candidate: &clamped_candidate,
            trace_id: &trace_id,
            approved: validation.approved,
            violations: &validation.violations,
            warnings: &validation.warnings,
            engine: outcome.engine,
            model: &outcome.model,
            llm_latency_ms: &outcome.llm_latency_ms,
            llm_output_hash: &outcome.llm_output_hash,
            critic: &outcome.critic,
        };
        let reasoning_hash = sha256_hex(&canonical_json(&envelope));

        let timestamp_unix_us = now_unix_us.unwrap_or(observation.timestamp_us);
        self.buffer.add(observation, timestamp_unix_us, Some(&self.store));

        let record = DecisionRecord {
            trace_id: trace_id.clone(),
            timestamp_unix_us,
            observation: observation.clone(),
            candidate: clamped_candidate.clone(),
            constraints: *constraints,
            engine: outcome.engine.to_string(),
            model: outcome.model.clone(),
            llm_latency_ms: outcome.llm_latency_ms,
            llm_output_hash: outcome.llm_output_hash.clone(),
            approved: validation.approved,
            violations: validation.violations.clone(),
            warnings: validation.warnings.clone(),
            tool_traces: outcome.tool_traces,
            spine_accepted: None,
            actual_speed_rpm: None,
            outcome_timestamp_us: None,
            outcome_notes: None,
        };
        if let Err(e) = self.store.record_decision(&record) {
            warn!(error = %e, trace_id = %trace_id, "failed to persist decision");
        }
        info!(trace_id = %trace_id, engine = outcome.engine, approved = validation.approved, "cycle complete");

        *last_recommendation = Some(Recommendation {
            candidate: clamped_candidate.clone(),
            approved: validation.approved,
            violations: validation.violations.clone(),
            warnings: validation.warnings.clone(),
            trace_id: trace_id.clone(),
        });

        let auth_token = self.cfg.auth_secret.as_ref().map(|secret| {
            let iat = timestamp_unix_us / 1_000_000;
            let claims = auth::Claims {
                iss: "cortex".to_string(),
                sub: "cortex-supervisor".to_string(),
                aud: "spine".to_string(),
                scope: vec!["recommendation.write".to_string()],
                iat,
                exp: iat + 60,
                nonce: trace_id.clone(),
            };
            auth::sign(&claims, secret.as_bytes())
        });

        let outbound = OutboundFrame {
            frame_type: "recommendation",
            protocol_version: ProtocolVersion { major: 1, minor: 0 },
            sequence,
            issued_at_unix_us: timestamp_unix_us,
            ttl_ms: self.cfg.decision_period_ms,
            target_speed_rpm: if validation.approved { Some(clamped_candidate.target_speed_rpm) } else { None },
            confidence: if validation.approved { clamped_candidate.confidence } else { 0.0 },
            reasoning_hash,
            client_unix_us: timestamp_unix_us,
            auth_token,
        };
        serde_json::to_string(&outbound).unwrap_or_else(|_| "{}".to_string())
    }
}

fn random_trace_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
