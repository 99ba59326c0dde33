//! Error types for the orchestration core.

use thiserror::Error;

/// Errors produced by the orchestration core.
#[derive(Debug, Error)]
pub enum Error {
    /// Probe subprocess invocation failed or timed out.
    #[error("probe error: {0}")]
    Probe(String),

    /// Mutation-server HTTP call failed.
    #[error("bridge error: {0}")]
    Bridge(String),

    /// Evaluator could not classify an observation.
    #[error("evaluate error: {0}")]
    Evaluate(String),

    /// Efficacy scorer could not compute a score.
    #[error("score error: {0}")]
    Score(String),

    /// Experimenter error (block assignment, conclusion, planning).
    #[error("experiment error: {0}")]
    Experiment(String),

    /// Knowledge-base error (lookup, decay, promotion).
    #[error("knowledge error: {0}")]
    Knowledge(String),

    /// Run-state error (missing monitor, malformed persisted state).
    #[error("state error: {0}")]
    State(String),

    /// Intent file loading or validation error.
    #[error("intent error: {0}")]
    Intent(String),

    /// I/O failure (persistence, subprocess spawn).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// TOML parse failure for an intent file.
    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    /// Anything else, wrapped for convenience.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the core.
pub type Result<T> = std::result::Result<T, Error>;
