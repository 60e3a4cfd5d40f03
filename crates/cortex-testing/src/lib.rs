//! Shared fixtures and an in-process "fake spine" harness for the
//! integration tests in `tests/`. Not a test module itself — the crate's
//! only consumer is its own `tests/*.rs` files, each compiled as a
//! separate integration-test binary against the `cortex` library.

use std::sync::Arc;

use cortex::buffer::{BufferConfig, ObservationBuffer};
use cortex::cache::{CacheConfig, SemanticCache};
use cortex::config::AppConfig;
use cortex::dispatch::{EngineDispatch, HeuristicPredictor};
use cortex::learner::AdaptiveLearner;
use cortex::model::{Constraints, Observation};
use cortex::provider::Provider;
use cortex::store::DecisionStore;
use cortex::supervisor::Supervisor;
use cortex::tools::ToolRegistry;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// A plausible in-bounds observation: motor nominal, nothing stale or
/// out-of-range. Tests mutate individual fields from here.
pub fn sample_observation() -> Observation {
    Observation {
        timestamp_us: 1_000_000,
        unix_us: Some(1_000_000),
        cycle_count: 1,
        safety_state: "nominal".to_string(),
        motor_speed_rpm: 1500.0,
        motor_temp_c: 55.0,
        pressure_bar: 5.0,
        cycle_jitter_us: 0,
    }
}

/// Constraints matching scenarios (a)/(b) in the decision pipeline's
/// testable-properties list.
pub fn sample_constraints() -> Constraints {
    Constraints {
        min_speed_rpm: 0.0,
        max_speed_rpm: 3000.0,
        max_rate_rpm: 50.0,
        max_temp_c: 80.0,
        staleness_us: 250_000,
    }
}

/// Build a `Supervisor` wired with an in-memory decision store and a
/// baseline engine (no LLM provider configured), ready to `run()` against
/// `host:port`.
pub fn supervisor_with_baseline(host: &str, port: u16) -> Supervisor {
    let mut resolved = AppConfig::from_env(Some(host.to_string()), Some(port), false, None)
        .expect("default config must resolve");
    // Skip the warmup-hold cycles so a single test cycle exercises the
    // baseline rule table instead of the warmup gate.
    resolved.warmup_cycles = 0;
    let cfg = Arc::new(resolved);
    let store = DecisionStore::open_in_memory(cfg.memory.max_decisions).expect("in-memory store");
    let buffer = ObservationBuffer::new(BufferConfig::default(), None);
    let cache = SemanticCache::new(CacheConfig::default());
    let learner = AdaptiveLearner::new(cfg.learning.clone());
    let dispatch = EngineDispatch::new(
        &cfg,
        None,
        None,
        Box::new(HeuristicPredictor),
        Arc::new(ToolRegistry::standard()),
    );
    Supervisor::new(cfg, store, buffer, cache, learner, dispatch, None)
}

/// Same as [`supervisor_with_baseline`] but with a provider plugged into
/// both the single-shot and workflow-graph engine slots, for exercising the
/// `llm-agent` path end to end over a real socket.
pub fn supervisor_with_provider(host: &str, port: u16, provider: Box<dyn Provider>, workflow_provider: Box<dyn Provider>) -> Supervisor {
    // Mutate the resolved `engine` field directly rather than setting
    // `CORTEX_ENGINE` in the process environment: tests run concurrently in
    // one process, and `std::env::set_var` would race with any other test
    // resolving `AppConfig::from_env` at the same moment.
    let mut resolved = AppConfig::from_env(Some(host.to_string()), Some(port), false, None)
        .expect("default config must resolve");
    resolved.engine = cortex::config::Engine::LlmAgent;
    resolved.warmup_cycles = 0;
    let cfg = Arc::new(resolved);
    let store = DecisionStore::open_in_memory(cfg.memory.max_decisions).expect("in-memory store");
    let buffer = ObservationBuffer::new(BufferConfig::default(), None);
    let cache = SemanticCache::new(CacheConfig::default());
    let learner = AdaptiveLearner::new(cfg.learning.clone());
    let dispatch = EngineDispatch::new(
        &cfg,
        Some(provider),
        Some(workflow_provider),
        Box::new(HeuristicPredictor),
        Arc::new(ToolRegistry::standard()),
    );
    Supervisor::new(cfg, store, buffer, cache, learner, dispatch, None)
}

/// The "fake spine" side of a socket pair: binds a loopback listener,
/// spawns `supervisor.run()` against it in the background, and accepts the
/// one connection the supervisor dials in.
pub struct FakeSpine {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
    _supervisor_task: tokio::task::JoinHandle<()>,
}

impl FakeSpine {
    /// Reserve a loopback port up front so the caller can build a
    /// `Supervisor` pointed at it (the supervisor dials out; it never binds
    /// a listener of its own) before the listener exists.
    pub async fn reserve_port() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
        let port = listener.local_addr().expect("listener has a local addr").port();
        (listener, port)
    }

    pub async fn accept(listener: TcpListener, supervisor: Supervisor) -> Self {
        let supervisor_task = tokio::spawn(async move {
            supervisor.run().await;
        });
        let (stream, _) = listener.accept().await.expect("supervisor dials in");
        let (read_half, write_half) = stream.into_split();
        FakeSpine {
            reader: BufReader::new(read_half),
            writer: write_half,
            _supervisor_task: supervisor_task,
        }
    }

    pub async fn send_state(&mut self, obs: &Observation) {
        let frame = json!({
            "type": "state",
            "timestamp_us": obs.timestamp_us,
            "unix_us": obs.unix_us,
            "cycle_count": obs.cycle_count,
            "safety_state": obs.safety_state,
            "motor_speed_rpm": obs.motor_speed_rpm,
            "motor_temp_c": obs.motor_temp_c,
            "pressure_bar": obs.pressure_bar,
            "cycle_jitter_us": obs.cycle_jitter_us,
        });
        let mut line = frame.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.expect("write state frame");
        self.writer.flush().await.expect("flush state frame");
    }

    pub async fn recv_recommendation(&mut self) -> Value {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.expect("read recommendation frame");
        serde_json::from_str(line.trim()).expect("recommendation frame must be valid JSON")
    }

    /// Send a raw line verbatim, for exercising malformed/unknown-type
    /// frame handling.
    pub async fn send_raw(&mut self, line: &str) {
        let mut buf = line.to_string();
        buf.push('\n');
        self.writer.write_all(buf.as_bytes()).await.expect("write raw line");
        self.writer.flush().await.expect("flush raw line");
    }
}
