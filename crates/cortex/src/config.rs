//! Configuration resolved once at startup from the environment, with CLI
//! flags overriding the corresponding env var.

use crate::error::{CortexError, CortexResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Engine {
    Baseline,
    Llm,
    LlmAgent,
    LlmProvider,
    Langgraph,
}

impl Engine {
    pub fn parse(s: &str) -> CortexResult<Self> {
        match s {
            "baseline" => Ok(Engine::Baseline),
            "llm" => Ok(Engine::Llm),
            "llm-agent" => Ok(Engine::LlmAgent),
            "llm-provider" => Ok(Engine::LlmProvider),
            "langgraph" => Ok(Engine::Langgraph),
            other => Err(CortexError::ConfigError(format!(
                "unknown engine '{other}': expected baseline|llm|llm-agent|llm-provider|langgraph"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Baseline => "baseline",
            Engine::Llm => "llm",
            Engine::LlmAgent => "llm-agent",
            Engine::LlmProvider => "llm-provider",
            Engine::Langgraph => "langgraph",
        }
    }

    /// Engines that drive the cooperative workflow graph (C9) rather than a
    /// single-shot provider call.
    pub fn is_graph(&self) -> bool {
        matches!(self, Engine::LlmAgent | Engine::Langgraph)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub enabled: bool,
    pub decision_db_path: String,
    pub history_buffer_size: usize,
    pub persist_interval: usize,
    pub preload_on_start: bool,
    pub max_decisions: usize,
}

#[derive(Debug, Clone)]
pub struct LearningConfig {
    pub enabled: bool,
    pub success_weight: f64,
    pub few_shot_count: usize,
    pub min_confidence: f64,
    pub cache_ttl_s: f64,
}

#[derive(Debug, Clone)]
pub struct TwinConfig {
    pub base_url: Option<String>,
    pub aas_id: String,
    pub asset_id: String,
    pub update_interval_s: f64,
    pub property_cache_ttl_s: f64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub attack_mode: bool,
    pub model_path: Option<String>,

    pub engine: Engine,
    pub decision_period_ms: u64,
    pub max_steps: u32,
    pub timeout_ms: u64,
    pub failure_threshold: u32,
    pub cooldown_s: f64,
    pub cache_threshold: f64,
    pub cache_ttl_s: f64,
    pub cache_capacity: usize,
    pub warmup_cycles: u32,
    pub rate_limit_is_violation: bool,

    pub min_speed_rpm: f64,
    pub max_speed_rpm: f64,
    pub max_rate_rpm: f64,
    pub max_temp_c: f64,
    pub staleness_us: u64,

    pub memory: MemoryConfig,
    pub learning: LearningConfig,
    pub twin: TwinConfig,

    pub log_level: String,
    pub log_format: LogFormat,

    pub auth_secret: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_num<T: std::str::FromStr>(key: &str, default: T) -> CortexResult<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Err(_) => Ok(default),
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| CortexError::ConfigError(format!("{key}={raw:?}: {e}"))),
    }
}

impl AppConfig {
    /// Build configuration from environment variables, then apply the given
    /// CLI overrides. Returns `ConfigError` on any malformed numeric knob so
    /// startup fails fast rather than silently defaulting an operator's
    /// explicit (but invalid) setting.
    pub fn from_env(
        cli_host: Option<String>,
        cli_port: Option<u16>,
        cli_attack_mode: bool,
        cli_model: Option<String>,
    ) -> CortexResult<Self> {
        let engine = Engine::parse(&env_or("CORTEX_ENGINE", "baseline"))?;

        let log_format = match env_or("CORTEX_LOG_FORMAT", "pretty").as_str() {
            "json" => LogFormat::Json,
            "pretty" => LogFormat::Pretty,
            other => {
                return Err(CortexError::ConfigError(format!(
                    "unknown log format '{other}': expected pretty|json"
                )))
            }
        };

        let cfg = AppConfig {
            host: cli_host.unwrap_or_else(|| env_or("CORTEX_HOST", "127.0.0.1")),
            port: match cli_port {
                Some(p) => p,
                None => parse_num("CORTEX_PORT", 7000u16)?,
            },
            attack_mode: cli_attack_mode || env_or("CORTEX_ATTACK_MODE", "0") == "1",
            model_path: cli_model.or_else(|| std::env::var("CORTEX_MODEL_PATH").ok()),

            engine,
            decision_period_ms: parse_num("CORTEX_DECISION_PERIOD_MS", 1000u64)?,
            max_steps: parse_num("CORTEX_MAX_STEPS", 6u32)?,
            timeout_ms: parse_num("CORTEX_TIMEOUT_MS", 800u64)?,
            failure_threshold: parse_num("CORTEX_FAILURE_THRESHOLD", 5u32)?,
            cooldown_s: parse_num("CORTEX_COOLDOWN_S", 30.0f64)?,
            cache_threshold: parse_num("CORTEX_CACHE_THRESHOLD", 0.95f64)?,
            cache_ttl_s: parse_num("CORTEX_CACHE_TTL_S", 60.0f64)?,
            cache_capacity: parse_num("CORTEX_CACHE_CAPACITY", 100usize)?,
            warmup_cycles: parse_num("CORTEX_WARMUP_CYCLES", 5u32)?,
            rate_limit_is_violation: env_or("CORTEX_RATE_LIMIT_IS_VIOLATION", "1") != "0",

            min_speed_rpm: parse_num("CORTEX_MIN_SPEED_RPM", 0.0f64)?,
            max_speed_rpm: parse_num("CORTEX_MAX_SPEED_RPM", 3000.0f64)?,
            max_rate_rpm: parse_num("CORTEX_MAX_RATE_RPM", 200.0f64)?,
            max_temp_c: parse_num("CORTEX_MAX_TEMP_C", 80.0f64)?,
            staleness_us: parse_num("CORTEX_STALENESS_US", 250_000u64)?,

            memory: MemoryConfig {
                enabled: env_or("CORTEX_MEMORY_ENABLED", "1") == "1",
                decision_db_path: env_or("CORTEX_DECISION_DB_PATH", "cortex_decisions.db"),
                history_buffer_size: parse_num("CORTEX_HISTORY_BUFFER_SIZE", 500usize)?,
                persist_interval: parse_num("CORTEX_HISTORY_PERSIST_INTERVAL", 10usize)?,
                preload_on_start: env_or("CORTEX_HISTORY_PRELOAD", "1") == "1",
                max_decisions: parse_num("CORTEX_MAX_DECISIONS", 50_000usize)?,
            },

            learning: LearningConfig {
                enabled: env_or("CORTEX_LEARNING_ENABLED", "1") == "1",
                success_weight: parse_num("CORTEX_LEARNING_SUCCESS_WEIGHT", 0.3f64)?,
                few_shot_count: parse_num("CORTEX_LEARNING_FEW_SHOT_COUNT", 5usize)?,
                min_confidence: parse_num("CORTEX_LEARNING_MIN_CONFIDENCE", 0.7f64)?,
                cache_ttl_s: parse_num("CORTEX_LEARNING_CACHE_TTL_S", 60.0f64)?,
            },

            twin: TwinConfig {
                base_url: std::env::var("CORTEX_TWIN_URL").ok(),
                aas_id: env_or("CORTEX_TWIN_AAS_ID", "urn:cortex:aas:motor:001"),
                asset_id: env_or("CORTEX_TWIN_ASSET_ID", "urn:cortex:asset:motor:001"),
                update_interval_s: parse_num("CORTEX_TWIN_UPDATE_INTERVAL_S", 1.0f64)?,
                property_cache_ttl_s: parse_num("CORTEX_TWIN_PROPERTY_CACHE_TTL_S", 300.0f64)?,
            },

            log_level: env_or("CORTEX_LOG_LEVEL", "info"),
            log_format,

            auth_secret: std::env::var("CORTEX_AUTH_SECRET").ok(),
        };

        if cfg.min_speed_rpm > cfg.max_speed_rpm {
            return Err(CortexError::ConfigError(
                "CORTEX_MIN_SPEED_RPM must be <= CORTEX_MAX_SPEED_RPM".into(),
            ));
        }
        if cfg.max_rate_rpm < 0.0 {
            return Err(CortexError::ConfigError(
                "CORTEX_MAX_RATE_RPM must be >= 0".into(),
            ));
        }
        if cfg.max_temp_c <= 0.0 {
            return Err(CortexError::ConfigError(
                "CORTEX_MAX_TEMP_C must be > 0".into(),
            ));
        }

        Ok(cfg)
    }

    pub fn constraints(&self) -> crate::model::Constraints {
        crate::model::Constraints {
            min_speed_rpm: self.min_speed_rpm,
            max_speed_rpm: self.max_speed_rpm,
            max_rate_rpm: self.max_rate_rpm,
            max_temp_c: self.max_temp_c,
            staleness_us: self.staleness_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_round_trips_through_str() {
        for e in [
            Engine::Baseline,
            Engine::Llm,
            Engine::LlmAgent,
            Engine::LlmProvider,
            Engine::Langgraph,
        ] {
            assert_eq!(Engine::parse(e.as_str()).unwrap(), e);
        }
    }

    #[test]
    fn unknown_engine_is_config_error() {
        assert!(Engine::parse("quantum").is_err());
    }

    #[test]
    fn graph_engines_are_flagged() {
        assert!(Engine::LlmAgent.is_graph());
        assert!(Engine::Langgraph.is_graph());
        assert!(!Engine::Baseline.is_graph());
        assert!(!Engine::Llm.is_graph());
    }
}
