//! Error taxonomy for the decision pipeline.
//!
//! Library code returns `Result<_, CortexError>` so callers can match on
//! failure class (the circuit breaker only cares whether a call was
//! `TransientEngine`, for instance). The binary boundary widens this into
//! `anyhow::Result` with added context.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CortexError {
    #[error("transient engine failure: {0}")]
    TransientEngine(String),

    #[error("schema violation: {0}")]
    SchemaViolation(String),

    #[error("safety violation: {0:?}")]
    SafetyViolation(Vec<String>),

    #[error("observation is stale: age {age_us}us exceeds staleness budget {staleness_us}us")]
    Staleness { age_us: u64, staleness_us: u64 },

    #[error("persistence failure: {0}")]
    PersistenceFailure(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("workflow exhausted after {steps} steps without a final candidate")]
    WorkflowExhaustion { steps: u32 },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type CortexResult<T> = Result<T, CortexError>;
