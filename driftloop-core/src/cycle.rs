//! Per-cycle orchestration: mutate, observe, evaluate, score, record into
//! any active experiment, and keep the experiment pipeline moving.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::bridge::ServerBridge;
use crate::config::OrchestratorConfig;
use crate::evaluator::{evaluate_e2e, evaluate_live, update_monitor_stats};
use crate::experimenter::{conclude_experiment, current_variant, plan_next_experiment, record_observation};
use crate::knowledge::KnowledgeBase;
use crate::probe::ProbeAdapter;
use crate::scorer::compute_efficacy;
use crate::types::{EfficacyScore, ExperimentStatus, Mode, MonitorConfig, RunState};

/// Orchestrates the cycle sequence against the configured probe and (in
/// e2e mode) mutation-server bridge, mutating `RunState` and
/// `KnowledgeBase` in place.
pub struct CycleRunner {
    probe: Arc<dyn ProbeAdapter>,
    bridge: Option<ServerBridge>,
    db_path: String,
}

impl CycleRunner {
    pub fn new(probe: Arc<dyn ProbeAdapter>, bridge: Option<ServerBridge>, db_path: impl Into<String>) -> Self {
        Self { probe, bridge, db_path: db_path.into() }
    }

    /// Apply the active experiment's variant (if any) to a monitor's live
    /// configuration before the cycle's observation is taken.
    fn apply_experiment_variant(&self, state: &mut RunState, monitor_name: &str) {
        let Some(monitor) = state.monitors.get(monitor_name) else { return };
        let Some(exp_id) = monitor.active_experiment_id else { return };
        let Some(experiment) = state.experiments.get(&exp_id) else { return };

        let cycle = monitor.cycle_count;
        let Some(value) = current_variant(experiment, cycle) else { return };
        let field = experiment.field;
        let value = value.to_string();

        if let Some(monitor) = state.monitors.get_mut(monitor_name) {
            apply_field(&mut monitor.current_config, field, &value);
        }
    }

    /// Apply any mutations scheduled for the monitor's current cycle
    /// (e2e mode only), recording each successfully-applied one into
    /// `applied_mutations` so `evaluate_e2e` can see it as ground truth.
    async fn apply_scheduled_mutations(&self, state: &mut RunState, monitor_name: &str) {
        let Some(bridge) = &self.bridge else { return };
        let Some(monitor) = state.monitors.get(monitor_name) else { return };
        if !matches!(monitor.mode, Mode::E2e) {
            return;
        }

        let cycle = monitor.cycle_count;
        let due: Vec<_> = monitor
            .mutation_schedule
            .iter()
            .filter(|m| m.cycle == cycle)
            .cloned()
            .collect();

        for mutation in due {
            if bridge.apply_mutation(&mutation).await {
                if let Some(monitor) = state.monitors.get_mut(monitor_name) {
                    monitor.applied_mutations.push(mutation);
                }
            } else {
                warn!(monitor = monitor_name, field = mutation.field, "mutation failed to apply");
            }
        }
    }

    /// Run one cycle for `monitor_name`. Returns `None` if the monitor is
    /// unknown.
    pub async fn run_cycle(&self, state: &mut RunState, knowledge: &mut KnowledgeBase, monitor_name: &str) -> Option<EfficacyScore> {
        self.apply_experiment_variant(state, monitor_name);
        self.apply_scheduled_mutations(state, monitor_name).await;

        let cycle = state.monitors.get(monitor_name)?.cycle_count;
        let watch_name = state.monitors.get(monitor_name)?.watch_name.clone();
        let observation = self.probe.run_check(&watch_name, cycle, &self.db_path).await;

        let monitor = state.monitors.get_mut(monitor_name)?;
        let mode = monitor.mode;
        let evaluation = match mode {
            Mode::E2e => evaluate_e2e(&observation, &monitor.applied_mutations),
            Mode::Live => evaluate_live(&observation),
        };

        update_monitor_stats(monitor, &evaluation);
        monitor.push_observation(observation);
        monitor.push_evaluation(evaluation.clone());

        let score = compute_efficacy(monitor, mode);
        monitor.push_score(score.total);

        if let Some(exp_id) = monitor.active_experiment_id {
            let intent_type = state.monitors[monitor_name].intent_type;
            let domain_class = state.monitors[monitor_name].domain_class.clone();

            if let Some(experiment) = state.experiments.get_mut(&exp_id) {
                let recorded = record_observation(experiment, cycle, score.total, evaluation.class);
                if !recorded {
                    warn!(monitor = monitor_name, cycle, "cycle fell outside every experiment block, observation dropped");
                }

                let rule = if matches!(experiment.status, ExperimentStatus::Running) {
                    conclude_experiment(experiment, cycle, intent_type, domain_class.as_deref())
                } else {
                    None
                };

                if !matches!(experiment.status, ExperimentStatus::Running) {
                    if let Some(rule) = rule {
                        info!(monitor = monitor_name, rule = %rule.rule, confidence = rule.confidence, "experiment concluded with a winner");
                        knowledge.add_rule(rule);
                    } else {
                        info!(monitor = monitor_name, status = ?experiment.status, "experiment concluded without a winner");
                    }

                    let field = experiment.field;
                    if let Some(monitor) = state.monitors.get_mut(monitor_name) {
                        monitor.active_experiment_id = None;
                        monitor.terminal_experiment_fields.push(field);
                    }
                }
            }
        } else if let Some(monitor) = state.monitors.get_mut(monitor_name) {
            if let Some(experiment) = plan_next_experiment(monitor) {
                monitor.active_experiment_id = Some(experiment.id);
                state.experiments.insert(experiment.id, experiment);
            }
        }

        if let Some(monitor) = state.monitors.get_mut(monitor_name) {
            monitor.cycle_count += 1;
        }
        state.total_cycles += 1;

        Some(score)
    }

    /// Run a cycle for every monitor that is due: either it has no prior
    /// observation, or its last recorded cycle is at least one interval
    /// in the past (cycle-counted, not wall-clock; the caller's scheduler
    /// sleeps between calls at the configured minimum interval).
    pub async fn run_all_due(&self, state: &mut RunState, knowledge: &mut KnowledgeBase) -> HashMap<String, EfficacyScore> {
        let due: Vec<String> = state.monitors.keys().cloned().collect();
        let mut results = HashMap::new();
        for name in due {
            if let Some(score) = self.run_cycle(state, knowledge, &name).await {
                results.insert(name, score);
            }
        }
        results
    }
}

fn apply_field(config: &mut MonitorConfig, field: crate::types::ExperimentField, value: &str) {
    use crate::types::ExperimentField::*;
    match field {
        Extraction => config.extraction = value.to_string(),
        Engine => config.engine = value.to_string(),
        IntervalSecs => {
            if let Ok(secs) = value.parse() {
                config.interval_secs = secs;
            }
        }
        Instructions => config.agent_instructions = Some(value.to_string()),
    }
}

/// Build the mutation-server bridge for e2e mode, or `None` for live mode
/// (or when the bridge is unreachable, in which case the caller should
/// fall back to live semantics for that monitor).
pub async fn maybe_bridge(config: &OrchestratorConfig, any_e2e: bool) -> Option<ServerBridge> {
    if !any_e2e {
        return None;
    }
    let bridge = ServerBridge::new(&config.e2e_server, config.bridge_timeout);
    if bridge.is_available().await {
        Some(bridge)
    } else {
        warn!(server = %config.e2e_server, "mutation server unreachable, e2e monitors will run without ground truth");
        None
    }
}
