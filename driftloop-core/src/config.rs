//! Weight profiles, SLA map, thresholds, and the other constants that
//! define the learning algorithm rather than deployment configuration.

use std::time::Duration;

use crate::types::{IntentType, RuleType};

/// How orchestrator-level knobs (not the algorithm constants below) are
/// configured. Built directly from CLI flags; see `driftloop-cli`.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub intents_path: std::path::PathBuf,
    pub duration: Duration,
    pub state_dir: std::path::PathBuf,
    pub resume: bool,
    pub dry_run: bool,
    pub verbose: bool,
    pub e2e_server: String,
    pub live_validate: bool,
    pub probe_binary: String,
    pub probe_timeout: Duration,
    pub bridge_timeout: Duration,
    pub log_max_bytes: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            intents_path: std::path::PathBuf::from("intents.toml"),
            duration: Duration::from_secs_f64(12.0 * 3600.0),
            state_dir: std::path::PathBuf::from("/tmp/driftloop-orchestrate"),
            resume: false,
            dry_run: false,
            verbose: false,
            e2e_server: "http://127.0.0.1:8787".to_string(),
            live_validate: false,
            probe_binary: "kto".to_string(),
            probe_timeout: Duration::from_secs(120),
            bridge_timeout: Duration::from_secs(10),
            log_max_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Fixed-size block length (in cycles) for an A/B experiment.
pub const EXPERIMENT_BLOCK_SIZE: u64 = 3;
/// Default total cycle budget an experiment is planned for.
pub const EXPERIMENT_DEFAULT_CYCLES: u64 = 20;
/// Minimum positive (TP) events required per variant to conclude.
pub const MIN_POSITIVE_EVENTS_PER_VARIANT: u64 = 5;
/// Minimum contributing blocks required per variant to conclude.
pub const MIN_BLOCKS_PER_VARIANT: usize = 4;
/// Minimum |mean_a - mean_b| to declare a winner rather than a no-op conclusion.
pub const EXPERIMENT_DELTA_THRESHOLD: f64 = 0.10;
/// Multiplier mapping effect size to confidence.
pub const CONFIDENCE_DELTA_MULTIPLIER: f64 = 2.5;
/// Ceiling on experiment-derived confidence.
pub const MAX_EXPERIMENT_CONFIDENCE: f64 = 0.90;

/// Current on-disk schema version for `knowledge.json`.
pub const KNOWLEDGE_SCHEMA_VERSION: u32 = 1;
/// Rules below this confidence are evicted by `apply_decay`.
pub const MIN_RULE_CONFIDENCE: f64 = 0.1;
/// Minimum distinct source domains for a domain-scoped rule to promote.
pub const MIN_DOMAINS_FOR_PROMOTION: usize = 2;
/// Minimum positive events observed for a domain-scoped rule to promote.
pub const MIN_POSITIVE_EVENTS_FOR_PROMOTION: u64 = 5;
/// Confidence discount applied to a promoted rule.
pub const PROMOTION_CONFIDENCE_DISCOUNT: f64 = 0.8;

/// Describes, for report consumers, how conflicting creation decisions
/// should be resolved. The core never interprets this itself.
pub const RULE_PRECEDENCE: &[&str] = &[
    "user_override",
    "intent_domain_scoped",
    "intent_scoped",
    "global_default",
];

/// Decay rate (confidence lost per elapsed day) by rule provenance.
pub fn decay_rate(rule_type: RuleType) -> f64 {
    match rule_type {
        RuleType::Structural => 0.05,
        RuleType::Heuristic => 0.02,
        RuleType::Domain => 0.01,
    }
}

/// Per-intent SLA, in cycles, used to normalize the latency sub-score.
pub fn sla_cycles(intent_type: IntentType) -> f64 {
    match intent_type {
        IntentType::Price => 1.0,
        IntentType::Stock => 2.0,
        IntentType::Release => 3.0,
        IntentType::News => 5.0,
        IntentType::Generic => 3.0,
    }
}

/// Stability sub-score standard-deviation threshold: volatile intents
/// (price, stock) tolerate more variance before being penalized.
pub fn stability_threshold(intent_type: IntentType) -> f64 {
    if intent_type.is_volatile() {
        0.3
    } else {
        0.2
    }
}

/// The four sub-score weights for one intent type under one mode.
#[derive(Debug, Clone, Copy)]
pub struct WeightProfile {
    pub f1: f64,
    pub agent: f64,
    pub latency: f64,
    pub stability: f64,
}

/// E2E weight profile: agent accuracy is observable, so it gets its own
/// weight slice.
pub fn e2e_weights(intent_type: IntentType) -> WeightProfile {
    match intent_type {
        IntentType::Price => WeightProfile { f1: 0.35, agent: 0.20, latency: 0.30, stability: 0.15 },
        IntentType::Stock => WeightProfile { f1: 0.40, agent: 0.25, latency: 0.20, stability: 0.15 },
        IntentType::Release => WeightProfile { f1: 0.50, agent: 0.20, latency: 0.10, stability: 0.20 },
        IntentType::News => WeightProfile { f1: 0.40, agent: 0.25, latency: 0.15, stability: 0.20 },
        IntentType::Generic => WeightProfile { f1: 0.45, agent: 0.20, latency: 0.15, stability: 0.20 },
    }
}

/// Live weight profile: there is no agent ground truth, so the e2e
/// profile's agent weight is folded back into F1.
pub fn live_weights(intent_type: IntentType) -> WeightProfile {
    let e2e = e2e_weights(intent_type);
    WeightProfile {
        f1: e2e.f1 + e2e.agent,
        agent: 0.0,
        latency: e2e.latency,
        stability: e2e.stability,
    }
}
