//! cortexd: the advisory decision supervisor binary.
//!
//! Dials the spine's state socket and runs the per-cycle dispatch/validate/
//! persist/emit pipeline until killed. See `cortex::supervisor` for the loop
//! itself; this file only wires up configuration, logging, and the concrete
//! subsystems the supervisor owns.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cortex::buffer::{BufferConfig, ObservationBuffer};
use cortex::cache::{CacheConfig, SemanticCache};
use cortex::config::{AppConfig, Engine, LogFormat};
use cortex::dispatch::{EngineDispatch, HeuristicPredictor};
use cortex::learner::AdaptiveLearner;
use cortex::provider::{MockProvider, Provider, RemoteChatProvider, RemoteMessagesProvider};
use cortex::store::DecisionStore;
use cortex::supervisor::Supervisor;
use cortex::tools::ToolRegistry;
use cortex::twin::TwinAdapter;

struct Cli {
    host: Option<String>,
    port: Option<u16>,
    attack_mode: bool,
    model: Option<String>,
}

fn parse_args() -> Cli {
    let mut cli = Cli { host: None, port: None, attack_mode: false, model: None };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--host" => cli.host = args.next(),
            "--port" => cli.port = args.next().and_then(|v| v.parse().ok()),
            "--attack-mode" => cli.attack_mode = true,
            "--model" => cli.model = args.next(),
            other => eprintln!("ignoring unrecognized argument: {other}"),
        }
    }
    cli
}

fn init_tracing(cfg: &AppConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cfg.log_level));
    match cfg.log_format {
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_target(true))
                .with(filter)
                .init();
        }
    }
}

/// Build the provider used for `llm`/`llm-provider` (single-shot) and
/// `llm-agent`/`langgraph` (workflow) engines. Both paths share one provider
/// instance per process; `CORTEX_PROVIDER` selects the wire convention and
/// falls back to a canned mock so the supervisor is runnable with no network
/// access configured.
fn build_provider(model: &str) -> Box<dyn Provider> {
    match std::env::var("CORTEX_PROVIDER").as_deref() {
        Ok("anthropic") => {
            let base_url = std::env::var("CORTEX_PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://api.anthropic.com/v1".to_string());
            let api_key = std::env::var("CORTEX_PROVIDER_API_KEY").unwrap_or_default();
            Box::new(RemoteMessagesProvider::new(base_url, api_key, model))
        }
        Ok("openai") => {
            let base_url =
                std::env::var("CORTEX_PROVIDER_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
            let api_key = std::env::var("CORTEX_PROVIDER_API_KEY").unwrap_or_default();
            Box::new(RemoteChatProvider::new(base_url, api_key, model))
        }
        _ => Box::new(MockProvider::new(model)),
    }
}

// Pinned explicitly (not just the macro's own default) because
// `tools::QueryDigitalTwinTool` calls `block_in_place` to bridge the twin
// adapter's async HTTP call into the tool registry's synchronous `execute`
// — that call panics outright on a current-thread runtime.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = parse_args();
    let cfg = AppConfig::from_env(cli.host, cli.port, cli.attack_mode, cli.model).context("loading configuration")?;
    let cfg = Arc::new(cfg);

    init_tracing(&cfg);
    info!(host = %cfg.host, port = cfg.port, engine = cfg.engine.as_str(), "starting cortex supervisor");
    info!(version = env!("CARGO_PKG_VERSION"), "cortexd");

    let store = if cfg.memory.enabled {
        DecisionStore::open(&cfg.memory.decision_db_path, cfg.memory.max_decisions)
            .with_context(|| format!("opening decision store at {}", cfg.memory.decision_db_path))?
    } else {
        DecisionStore::open_in_memory(cfg.memory.max_decisions).context("opening in-memory decision store")?
    };

    let buffer_cfg = BufferConfig {
        max_size: cfg.memory.history_buffer_size,
        persist_interval: cfg.memory.persist_interval,
        preload_on_start: cfg.memory.preload_on_start,
    };
    let buffer = ObservationBuffer::new(buffer_cfg, Some(&store));

    let cache = SemanticCache::new(CacheConfig {
        capacity: cfg.cache_capacity,
        ttl_s: cfg.cache_ttl_s,
        threshold: cfg.cache_threshold,
    });

    let learner = AdaptiveLearner::new(cfg.learning.clone());

    let tools = Arc::new(ToolRegistry::standard());

    let model_name = cfg.model_path.clone().unwrap_or_else(|| "default".to_string());
    let (single_shot_provider, workflow_provider) = match cfg.engine {
        Engine::Llm | Engine::LlmProvider => (Some(build_provider(&model_name)), None),
        Engine::LlmAgent | Engine::Langgraph => (None, Some(build_provider(&model_name))),
        Engine::Baseline => (None, None),
    };

    let dispatch = EngineDispatch::new(
        &cfg,
        single_shot_provider,
        workflow_provider,
        Box::new(HeuristicPredictor),
        Arc::clone(&tools),
    );

    let twin = if cfg.twin.base_url.is_some() {
        Some(TwinAdapter::new(cfg.twin.clone()).context("initializing digital-twin adapter")?)
    } else {
        None
    };

    let supervisor = Supervisor::new(Arc::clone(&cfg), store, buffer, cache, learner, dispatch, twin);

    info!("entering supervisor loop");
    supervisor.run().await;
    Ok(())
}
