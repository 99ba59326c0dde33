//! Human- and machine-readable run reports: monitor summaries, learned
//! rules, and experiment outcomes including why an inconclusive
//! experiment hasn't concluded yet.

use serde::Serialize;
use serde_json::json;

use crate::config::{MIN_BLOCKS_PER_VARIANT, MIN_POSITIVE_EVENTS_PER_VARIANT};
use crate::knowledge::KnowledgeBase;
use crate::types::{Experiment, ExperimentStatus, RunState, Variant};

#[derive(Debug, Clone, Serialize)]
pub struct MonitorSummary {
    pub name: String,
    pub intent_type: String,
    pub mode: String,
    pub cycles: u64,
    pub tp: u64,
    pub tn: u64,
    pub fp: u64,
    pub fn_: u64,
    pub agent_correct: u64,
    pub agent_total: u64,
    pub latest_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentSummary {
    pub monitor_name: String,
    pub field: String,
    pub status: String,
    pub winner: Option<String>,
    pub evidence: String,
    pub blocker: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub run_id: String,
    pub mode: String,
    pub total_cycles: u64,
    pub monitors: Vec<MonitorSummary>,
    pub experiments: Vec<ExperimentSummary>,
    pub learned_rules: serde_json::Value,
    pub recommendations: Vec<String>,
}

fn monitor_summary(name: &str, monitor: &crate::types::MonitorState) -> MonitorSummary {
    MonitorSummary {
        name: name.to_string(),
        intent_type: monitor.intent_type.to_string(),
        mode: format!("{:?}", monitor.mode).to_lowercase(),
        cycles: monitor.cycle_count,
        tp: monitor.tp,
        tn: monitor.tn,
        fp: monitor.fp,
        fn_: monitor.fn_,
        agent_correct: monitor.agent_correct,
        agent_total: monitor.agent_total,
        latest_score: monitor.scores.back().copied(),
    }
}

/// Describe the unmet conclusion criterion for an inconclusive
/// experiment, and what evidence is still needed.
fn blocker_for(experiment: &Experiment) -> Option<String> {
    if !matches!(experiment.status, ExperimentStatus::InsufficientData) {
        return None;
    }

    let count = |variant: Variant| -> (usize, u64) {
        let blocks: Vec<_> = experiment.blocks.iter().filter(|b| b.variant == variant && !b.scores.is_empty()).collect();
        (blocks.len(), blocks.iter().map(|b| b.positive_events).sum())
    };
    let (blocks_a, positives_a) = count(Variant::A);
    let (blocks_b, positives_b) = count(Variant::B);

    let mut needs = Vec::new();
    if positives_a < MIN_POSITIVE_EVENTS_PER_VARIANT {
        needs.push(format!("variant a needs {} more positive events (has {positives_a})", MIN_POSITIVE_EVENTS_PER_VARIANT - positives_a));
    }
    if positives_b < MIN_POSITIVE_EVENTS_PER_VARIANT {
        needs.push(format!("variant b needs {} more positive events (has {positives_b})", MIN_POSITIVE_EVENTS_PER_VARIANT - positives_b));
    }
    if blocks_a < MIN_BLOCKS_PER_VARIANT {
        needs.push(format!("variant a needs {} more contributing blocks (has {blocks_a})", MIN_BLOCKS_PER_VARIANT - blocks_a));
    }
    if blocks_b < MIN_BLOCKS_PER_VARIANT {
        needs.push(format!("variant b needs {} more contributing blocks (has {blocks_b})", MIN_BLOCKS_PER_VARIANT - blocks_b));
    }

    Some(needs.join("; "))
}

fn experiment_summary(experiment: &Experiment) -> ExperimentSummary {
    ExperimentSummary {
        monitor_name: experiment.monitor_name.clone(),
        field: format!("{:?}", experiment.field),
        status: format!("{:?}", experiment.status).to_lowercase(),
        winner: experiment.winner.map(|w| match w {
            Variant::A => experiment.variant_a.clone(),
            Variant::B => experiment.variant_b.clone(),
        }),
        evidence: experiment.evidence.clone(),
        blocker: blocker_for(experiment),
    }
}

fn recommendations_for(state: &RunState, experiments: &[ExperimentSummary]) -> Vec<String> {
    let mut out = Vec::new();
    for monitor in state.monitors.values() {
        if monitor.total_evaluations() > 0 && monitor.fp > monitor.tp {
            out.push(format!(
                "monitor '{}' has more false positives than true positives; consider narrowing its extraction selector",
                monitor.name
            ));
        }
    }
    for exp in experiments {
        if exp.status == "running" && exp.blocker.is_none() {
            out.push(format!(
                "experiment on '{}' field {} is still running; let it complete before starting another on the same monitor",
                exp.monitor_name, exp.field
            ));
        }
    }
    out
}

/// Build the full report from the current run state and knowledge base.
pub fn generate_report(state: &RunState, knowledge: &KnowledgeBase) -> Report {
    let monitors: Vec<MonitorSummary> = state.monitors.iter().map(|(name, m)| monitor_summary(name, m)).collect();
    let experiments: Vec<ExperimentSummary> = state.experiments.values().map(experiment_summary).collect();
    let recommendations = recommendations_for(state, &experiments);

    Report {
        run_id: state.run_id.clone(),
        mode: format!("{:?}", state.mode).to_lowercase(),
        total_cycles: state.total_cycles,
        monitors,
        experiments,
        learned_rules: knowledge.export(),
        recommendations,
    }
}

/// Render the report as a human-readable text block for `report.txt`.
pub fn render_text(report: &Report) -> String {
    let mut out = String::new();
    out.push_str(&format!("run {} ({} mode, {} cycles)\n\n", report.run_id, report.mode, report.total_cycles));

    out.push_str("monitors:\n");
    for m in &report.monitors {
        out.push_str(&format!(
            "  {} [{}] cycles={} tp={} tn={} fp={} fn={} agent={}/{} score={}\n",
            m.name,
            m.intent_type,
            m.cycles,
            m.tp,
            m.tn,
            m.fp,
            m.fn_,
            m.agent_correct,
            m.agent_total,
            m.latest_score.map(|s| format!("{s:.3}")).unwrap_or_else(|| "n/a".to_string())
        ));
    }

    out.push_str("\nexperiments:\n");
    for e in &report.experiments {
        out.push_str(&format!("  {} / {} -> {}\n", e.monitor_name, e.field, e.status));
        if let Some(winner) = &e.winner {
            out.push_str(&format!("    winner: {winner}\n"));
        }
        if let Some(blocker) = &e.blocker {
            out.push_str(&format!("    blocked on: {blocker}\n"));
        }
        out.push_str(&format!("    evidence: {}\n", e.evidence));
    }

    out.push_str("\nrecommendations:\n");
    if report.recommendations.is_empty() {
        out.push_str("  none\n");
    }
    for r in &report.recommendations {
        out.push_str(&format!("  - {r}\n"));
    }

    out
}

/// Render the report as the `report.json` document.
pub fn render_json(report: &Report) -> serde_json::Value {
    json!(report)
}
