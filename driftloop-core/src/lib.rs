//! Closed-loop learning engine for discovering and maintaining optimal
//! web-change-detection monitor configurations.
//!
//! A cycle runner drives each monitor through observe -> evaluate ->
//! score -> experiment, while an append-only knowledge base accumulates
//! the creation rules that the experiments' conclusions produce.

pub mod bridge;
pub mod config;
pub mod cycle;
pub mod error;
pub mod evaluator;
pub mod experimenter;
pub mod intents;
pub mod knowledge;
pub mod logging;
pub mod probe;
pub mod report;
pub mod scorer;
pub mod state;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    AgentCorrectness, Classification, CreationRule, EfficacyScore, Evaluation, Experiment,
    IntentDefinition, IntentType, Mode, MonitorState, Observation, RunState,
};
