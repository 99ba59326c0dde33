//! Core data model: intents, monitors, observations, evaluations,
//! experiments, and creation rules.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bound on a monitor's observation/evaluation/score history.
pub const HISTORY_LIMIT: usize = 100;
/// Bound on a monitor's recorded detection latencies.
pub const LATENCY_LIMIT: usize = 50;

/// What kind of target an intent is watching, which drives SLA and weight
/// profile selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    Price,
    Stock,
    Release,
    News,
    Generic,
}

impl IntentType {
    /// Whether this intent type is considered volatile (affects stability
    /// threshold and interval halving in the experimenter).
    pub fn is_volatile(self) -> bool {
        matches!(self, IntentType::Price | IntentType::Stock)
    }
}

impl std::fmt::Display for IntentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IntentType::Price => "price",
            IntentType::Stock => "stock",
            IntentType::Release => "release",
            IntentType::News => "news",
            IntentType::Generic => "generic",
        };
        write!(f, "{s}")
    }
}

/// Run mode: controlled mutation server (e2e) or a real site (live).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    E2e,
    Live,
}

/// One scheduled mutation applied to the mutation server at a given cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationStep {
    pub cycle: u64,
    pub field: String,
    pub value: String,
    #[serde(default)]
    pub expect_detection: bool,
}

/// Static input describing what to monitor and how to judge it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentDefinition {
    pub name: String,
    pub url: String,
    pub intent_type: IntentType,
    #[serde(default)]
    pub domain_class: Option<String>,
    pub mode: Mode,
    pub engine: String,
    pub extraction: String,
    #[serde(default)]
    pub selector: Option<String>,
    pub interval_secs: u64,
    #[serde(default)]
    pub agent_instructions: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub mutations: Vec<MutationStep>,
    /// How many detections this intent expects over a run. Modeled as `u64`
    /// rather than a signed type with a runtime non-negativity check.
    #[serde(default)]
    pub expected_detections: u64,
}

/// The configuration surface an experiment can vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentField {
    Extraction,
    Engine,
    IntervalSecs,
    Instructions,
}

impl ExperimentField {
    /// Fixed priority order the planner walks.
    pub const PRIORITY: [ExperimentField; 4] = [
        ExperimentField::Extraction,
        ExperimentField::Engine,
        ExperimentField::IntervalSecs,
        ExperimentField::Instructions,
    ];
}

/// The live-mutable configuration of a monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub engine: String,
    pub extraction: String,
    pub interval_secs: u64,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub agent_instructions: Option<String>,
}

/// Per-probe result of one cycle's check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    Ok {
        cycle: u64,
        timestamp: DateTime<Utc>,
        changed: bool,
        #[serde(default)]
        content_hash: Option<String>,
        #[serde(default)]
        diff_snippet: Option<String>,
        #[serde(default)]
        agent_notified: Option<bool>,
        #[serde(default)]
        agent_title: Option<String>,
        #[serde(default)]
        agent_summary: Option<String>,
    },
    Error {
        cycle: u64,
        timestamp: DateTime<Utc>,
        error: String,
    },
}

impl Observation {
    pub fn cycle(&self) -> u64 {
        match self {
            Observation::Ok { cycle, .. } | Observation::Error { cycle, .. } => *cycle,
        }
    }

    /// Actual change per §4.3: `observation.changed and observation.error is None`.
    pub fn actual_change(&self) -> bool {
        matches!(self, Observation::Ok { changed: true, .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Observation::Error { .. })
    }
}

/// Confusion-matrix class assigned to one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Tp,
    Tn,
    Fp,
    Fn_,
}

/// Three-valued logic for whether the agent's notification decision was
/// correct: the reference data never lets us say "correct"/"incorrect"
/// when there is no ground truth (live mode, or an FN with no notification
/// to judge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCorrectness {
    Correct,
    Incorrect,
    Unknown,
}

/// Classification of one observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub cycle: u64,
    pub class: Classification,
    pub expected_change: bool,
    pub actual_change: bool,
    pub agent_correct: AgentCorrectness,
    pub reason: String,
}

/// Status of an A/B experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperimentStatus {
    Running,
    Concluded,
    InsufficientData,
}

/// Which variant ("a" or "b") is in force for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    A,
    B,
}

/// A contiguous range of cycles during which one experiment variant was
/// active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentBlock {
    pub variant: Variant,
    pub start_cycle: u64,
    pub end_cycle: u64,
    pub scores: Vec<f64>,
    pub positive_events: u64,
    pub negative_events: u64,
}

impl ExperimentBlock {
    pub fn contains(&self, cycle: u64) -> bool {
        cycle >= self.start_cycle && cycle < self.end_cycle
    }
}

/// An A/B test on a single configuration field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experiment {
    pub id: Uuid,
    pub monitor_name: String,
    pub field: ExperimentField,
    pub variant_a: String,
    pub variant_b: String,
    pub blocks: Vec<ExperimentBlock>,
    pub status: ExperimentStatus,
    #[serde(default)]
    pub winner: Option<Variant>,
    pub evidence: String,
}

/// Breadth at which a creation rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    IntentDomain,
    Intent,
}

/// Provenance class of a creation rule, used to pick its decay rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Structural,
    Heuristic,
    Domain,
}

/// The subset of monitor configuration a creation rule recommends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreationRecommendation {
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub extraction: Option<String>,
    #[serde(default)]
    pub interval_secs: Option<u64>,
    #[serde(default)]
    pub instruction_template: Option<String>,
    #[serde(default)]
    pub selector: Option<String>,
}

/// A learned recommendation persisted to the knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreationRule {
    pub id: Uuid,
    pub intent_type: IntentType,
    #[serde(default)]
    pub domain_class: Option<String>,
    pub scope: RuleScope,
    pub rule: String,
    pub evidence: String,
    pub confidence: f64,
    pub positive_events_observed: u64,
    pub recommendation: CreationRecommendation,
    #[serde(default)]
    pub source_domains: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_validated: DateTime<Utc>,
    pub rule_type: RuleType,
}

/// Per-intent, live-mutable monitor state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorState {
    pub name: String,
    pub watch_name: String,
    pub intent_type: IntentType,
    #[serde(default)]
    pub domain_class: Option<String>,
    pub mode: Mode,
    pub interval_secs: u64,
    pub current_config: MonitorConfig,

    pub cycle_count: u64,
    pub tp: u64,
    pub tn: u64,
    pub fp: u64,
    pub fn_: u64,

    pub agent_correct: u64,
    pub agent_total: u64,

    pub observations: VecDeque<Observation>,
    pub evaluations: VecDeque<Evaluation>,
    pub scores: VecDeque<f64>,
    pub detection_latencies: VecDeque<u64>,

    /// Cycle of the most recently recorded TN, used to compute detection
    /// latency without scanning history (see Open Question (a)).
    #[serde(default)]
    pub cycle_of_last_tn: Option<u64>,

    #[serde(default)]
    pub active_experiment_id: Option<Uuid>,
    /// The intent's full static mutation schedule, never mutated after
    /// creation. `apply_scheduled_mutations` reads this to know what's due
    /// on a given cycle.
    #[serde(default)]
    pub mutation_schedule: Vec<MutationStep>,
    /// The subset of `mutation_schedule` that has actually been applied to
    /// the mutation server so far, consulted by `evaluate_e2e` as ground
    /// truth.
    #[serde(default)]
    pub applied_mutations: Vec<MutationStep>,
    #[serde(default)]
    pub terminal_experiment_fields: Vec<ExperimentField>,
}

impl MonitorState {
    pub fn new(intent: &IntentDefinition, watch_name: String) -> Self {
        Self {
            name: intent.name.clone(),
            watch_name,
            intent_type: intent.intent_type,
            domain_class: intent.domain_class.clone(),
            mode: intent.mode,
            interval_secs: intent.interval_secs,
            current_config: MonitorConfig {
                engine: intent.engine.clone(),
                extraction: intent.extraction.clone(),
                interval_secs: intent.interval_secs,
                selector: intent.selector.clone(),
                agent_instructions: intent.agent_instructions.clone(),
            },
            cycle_count: 0,
            tp: 0,
            tn: 0,
            fp: 0,
            fn_: 0,
            agent_correct: 0,
            agent_total: 0,
            observations: VecDeque::new(),
            evaluations: VecDeque::new(),
            scores: VecDeque::new(),
            detection_latencies: VecDeque::new(),
            cycle_of_last_tn: None,
            active_experiment_id: None,
            mutation_schedule: intent.mutations.clone(),
            applied_mutations: Vec::new(),
            terminal_experiment_fields: Vec::new(),
        }
    }

    pub fn total_evaluations(&self) -> u64 {
        self.tp + self.tn + self.fp + self.fn_
    }

    pub fn push_observation(&mut self, obs: Observation) {
        self.observations.push_back(obs);
        while self.observations.len() > HISTORY_LIMIT {
            self.observations.pop_front();
        }
    }

    pub fn push_evaluation(&mut self, eval: Evaluation) {
        self.evaluations.push_back(eval);
        while self.evaluations.len() > HISTORY_LIMIT {
            self.evaluations.pop_front();
        }
    }

    pub fn push_score(&mut self, score: f64) {
        self.scores.push_back(score);
        while self.scores.len() > HISTORY_LIMIT {
            self.scores.pop_front();
        }
    }

    pub fn push_latency(&mut self, latency: u64) {
        self.detection_latencies.push_back(latency);
        while self.detection_latencies.len() > LATENCY_LIMIT {
            self.detection_latencies.pop_front();
        }
    }
}

/// Top-level aggregate persisted as `state.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub mode: Mode,
    pub monitors: std::collections::BTreeMap<String, MonitorState>,
    pub experiments: std::collections::BTreeMap<Uuid, Experiment>,
    pub total_cycles: u64,
}

impl RunState {
    pub fn new(mode: Mode) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            mode,
            monitors: std::collections::BTreeMap::new(),
            experiments: std::collections::BTreeMap::new(),
            total_cycles: 0,
        }
    }
}

/// The composite per-cycle efficacy score and its components.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EfficacyScore {
    pub f1: f64,
    pub latency: f64,
    pub stability: f64,
    pub agent: f64,
    pub total: f64,
}
