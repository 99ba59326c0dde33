//! Time-blocked A/B experimenter: plans experiments, assigns alternating
//! blocks, records per-cycle outcomes, and concludes with a winner and
//! confidence once enough evidence has accumulated.

use chrono::Utc;
use rand::Rng;
use uuid::Uuid;

use crate::config::{
    CONFIDENCE_DELTA_MULTIPLIER, EXPERIMENT_BLOCK_SIZE, EXPERIMENT_DEFAULT_CYCLES,
    EXPERIMENT_DELTA_THRESHOLD, MAX_EXPERIMENT_CONFIDENCE, MIN_BLOCKS_PER_VARIANT,
    MIN_POSITIVE_EVENTS_PER_VARIANT,
};
use crate::types::{
    Classification, CreationRecommendation, CreationRule, Experiment, ExperimentBlock,
    ExperimentField, ExperimentStatus, MonitorState, RuleScope, RuleType, Variant,
};

/// Partition `[0, total_cycles)` into fixed-size blocks, strictly
/// alternating variants starting from a uniformly random choice.
pub fn assign_blocks(total_cycles: u64, block_size: u64) -> Vec<ExperimentBlock> {
    let mut blocks = Vec::new();
    let mut start = 0u64;
    let mut variant = if rand::thread_rng().gen_bool(0.5) { Variant::A } else { Variant::B };

    while start < total_cycles {
        let end = (start + block_size).min(total_cycles);
        blocks.push(ExperimentBlock {
            variant,
            start_cycle: start,
            end_cycle: end,
            scores: Vec::new(),
            positive_events: 0,
            negative_events: 0,
        });
        start = end;
        variant = match variant {
            Variant::A => Variant::B,
            Variant::B => Variant::A,
        };
    }

    blocks
}

/// Create a new experiment on `field`, varying between `variant_a` (the
/// monitor's current value) and `variant_b` (the candidate).
pub fn create_experiment(monitor_name: &str, field: ExperimentField, variant_a: String, variant_b: String) -> Experiment {
    Experiment {
        id: Uuid::new_v4(),
        monitor_name: monitor_name.to_string(),
        field,
        variant_a,
        variant_b,
        blocks: assign_blocks(EXPERIMENT_DEFAULT_CYCLES, EXPERIMENT_BLOCK_SIZE),
        status: ExperimentStatus::Running,
        winner: None,
        evidence: String::new(),
    }
}

/// The variant string in force for `cycle`, or `None` if `cycle` falls
/// outside every block (should not happen for a well-formed experiment).
pub fn current_variant<'a>(experiment: &'a Experiment, cycle: u64) -> Option<&'a str> {
    experiment
        .blocks
        .iter()
        .find(|b| b.contains(cycle))
        .map(|b| match b.variant {
            Variant::A => experiment.variant_a.as_str(),
            Variant::B => experiment.variant_b.as_str(),
        })
}

/// Append one cycle's score into the block containing it, updating the
/// block's positive/negative event counts. Cycles outside any block are
/// dropped (logged by the caller).
pub fn record_observation(experiment: &mut Experiment, cycle: u64, score: f64, class: Classification) -> bool {
    let Some(block) = experiment.blocks.iter_mut().find(|b| b.contains(cycle)) else {
        return false;
    };
    block.scores.push(score);
    match class {
        Classification::Tp => block.positive_events += 1,
        Classification::Tn => block.negative_events += 1,
        _ => {}
    }
    true
}

struct VariantTotals {
    block_count: usize,
    positive_events: u64,
    mean_score: f64,
}

fn totals_for(experiment: &Experiment, variant: Variant) -> VariantTotals {
    let contributing: Vec<&ExperimentBlock> = experiment
        .blocks
        .iter()
        .filter(|b| b.variant == variant && !b.scores.is_empty())
        .collect();

    let positive_events = contributing.iter().map(|b| b.positive_events).sum();
    let all_scores: Vec<f64> = contributing.iter().flat_map(|b| b.scores.iter().copied()).collect();
    let mean_score = if all_scores.is_empty() {
        0.0
    } else {
        all_scores.iter().sum::<f64>() / all_scores.len() as f64
    };

    VariantTotals { block_count: contributing.len(), positive_events, mean_score }
}

/// Attempt to conclude `experiment` given the cycle just recorded and the
/// `intent_type`/`domain_class` (read from the owning monitor's state, not
/// re-derived from its name). Safe to call after every recorded
/// observation: while the conclusion thresholds aren't yet met, the
/// experiment simply keeps running (`status` is left `Running`) unless its
/// assigned block range is exhausted, in which case it's marked
/// `InsufficientData` — terminal, per its own documentation. Returns
/// `Some(rule)` when conclusion finds a winner.
pub fn conclude_experiment(
    experiment: &mut Experiment,
    cycle: u64,
    intent_type: crate::types::IntentType,
    domain_class: Option<&str>,
) -> Option<CreationRule> {
    if !matches!(experiment.status, ExperimentStatus::Running) {
        return None;
    }

    let a = totals_for(experiment, Variant::A);
    let b = totals_for(experiment, Variant::B);

    if a.positive_events < MIN_POSITIVE_EVENTS_PER_VARIANT
        || b.positive_events < MIN_POSITIVE_EVENTS_PER_VARIANT
        || a.block_count < MIN_BLOCKS_PER_VARIANT
        || b.block_count < MIN_BLOCKS_PER_VARIANT
    {
        let exhausted = experiment.blocks.iter().all(|b| b.end_cycle <= cycle + 1);
        if exhausted {
            experiment.status = ExperimentStatus::InsufficientData;
        }
        return None;
    }

    let delta = a.mean_score - b.mean_score;
    if delta.abs() < EXPERIMENT_DELTA_THRESHOLD {
        experiment.status = ExperimentStatus::Concluded;
        experiment.winner = None;
        experiment.evidence = format!(
            "no meaningful difference: mean_a={:.3} mean_b={:.3} (|delta|={:.3} < {EXPERIMENT_DELTA_THRESHOLD})",
            a.mean_score, b.mean_score, delta.abs()
        );
        return None;
    }

    let (winner, winning_value, confidence) = if delta > 0.0 {
        (Variant::A, experiment.variant_a.clone(), (delta * CONFIDENCE_DELTA_MULTIPLIER).min(MAX_EXPERIMENT_CONFIDENCE))
    } else {
        (
            Variant::B,
            experiment.variant_b.clone(),
            (delta.abs() * CONFIDENCE_DELTA_MULTIPLIER).min(MAX_EXPERIMENT_CONFIDENCE),
        )
    };

    experiment.status = ExperimentStatus::Concluded;
    experiment.winner = Some(winner);
    experiment.evidence = format!(
        "mean_a={:.3} (n={}) mean_b={:.3} (n={}) pos_a={} pos_b={} confidence={:.3}",
        a.mean_score, a.block_count, b.mean_score, b.block_count, a.positive_events, b.positive_events, confidence
    );

    let mut recommendation = CreationRecommendation::default();
    set_recommendation_field(&mut recommendation, experiment.field, &winning_value);

    let now = Utc::now();
    Some(CreationRule {
        id: Uuid::new_v4(),
        intent_type,
        domain_class: domain_class.map(str::to_string),
        scope: if domain_class.is_some() { RuleScope::IntentDomain } else { RuleScope::Intent },
        rule: format!("{:?} = {}", experiment.field, winning_value),
        evidence: experiment.evidence.clone(),
        confidence,
        positive_events_observed: a.positive_events.max(b.positive_events),
        recommendation,
        source_domains: domain_class.map(|d| vec![d.to_string()]).unwrap_or_default(),
        created_at: now,
        last_validated: now,
        rule_type: RuleType::Heuristic,
    })
}

fn set_recommendation_field(recommendation: &mut CreationRecommendation, field: ExperimentField, value: &str) {
    match field {
        ExperimentField::Extraction => recommendation.extraction = Some(value.to_string()),
        ExperimentField::Engine => recommendation.engine = Some(value.to_string()),
        ExperimentField::IntervalSecs => recommendation.interval_secs = value.parse().ok(),
        ExperimentField::Instructions => recommendation.instruction_template = Some(value.to_string()),
    }
}

/// Pick the alternative value for `field` given the monitor's current
/// configuration. Returns `None` when no generic alternative exists
/// (instructions) or the alternative coincides with the current value.
fn alternative_for(field: ExperimentField, monitor: &MonitorState) -> Option<(String, String)> {
    let current = match field {
        ExperimentField::Extraction => monitor.current_config.extraction.clone(),
        ExperimentField::Engine => monitor.current_config.engine.clone(),
        ExperimentField::IntervalSecs => monitor.current_config.interval_secs.to_string(),
        ExperimentField::Instructions => return None,
    };

    let alternative = match field {
        ExperimentField::Extraction => {
            if current == "auto" {
                "selector".to_string()
            } else if current == "selector" {
                "auto".to_string()
            } else {
                "auto".to_string()
            }
        }
        ExperimentField::Engine => {
            if current == "http" {
                "playwright".to_string()
            } else if current == "playwright" {
                "http".to_string()
            } else {
                "http".to_string()
            }
        }
        ExperimentField::IntervalSecs => {
            let secs: u64 = current.parse().unwrap_or(monitor.current_config.interval_secs);
            let candidate = if monitor.intent_type.is_volatile() {
                (secs / 2).max(60)
            } else {
                secs * 2
            };
            candidate.to_string()
        }
        ExperimentField::Instructions => return None,
    };

    if alternative == current {
        None
    } else {
        Some((current, alternative))
    }
}

/// Plan the next experiment for a monitor with none active, walking
/// candidate fields in fixed priority and skipping any field already
/// tested to a terminal conclusion on this monitor.
pub fn plan_next_experiment(monitor: &MonitorState) -> Option<Experiment> {
    for &field in ExperimentField::PRIORITY.iter() {
        if monitor.terminal_experiment_fields.contains(&field) {
            continue;
        }
        if let Some((current, alternative)) = alternative_for(field, monitor) {
            return Some(create_experiment(&monitor.name, field, current, alternative));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntentDefinition, IntentType, Mode};

    fn mk_monitor(intent_type: IntentType, extraction: &str) -> MonitorState {
        let intent = IntentDefinition {
            name: "watch".to_string(),
            url: "https://example.com".to_string(),
            intent_type,
            domain_class: Some("retail".to_string()),
            mode: Mode::E2e,
            engine: "http".to_string(),
            extraction: extraction.to_string(),
            selector: None,
            interval_secs: 300,
            agent_instructions: None,
            tags: vec![],
            mutations: vec![],
            expected_detections: 0,
        };
        MonitorState::new(&intent, "watch".to_string())
    }

    #[test]
    fn blocks_tile_range_contiguously_and_alternate() {
        let blocks = assign_blocks(20, 3);
        assert_eq!(blocks.first().unwrap().start_cycle, 0);
        assert_eq!(blocks.last().unwrap().end_cycle, 20);
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].end_cycle, pair[1].start_cycle);
            assert_ne!(pair[0].variant, pair[1].variant);
        }
    }

    #[test]
    fn insufficient_data_when_not_enough_positive_events() {
        let mut exp = create_experiment("watch", ExperimentField::Extraction, "auto".to_string(), "selector".to_string());
        // 6 cycles => 2 blocks of size 3 each alternating, one TP per block.
        exp.blocks.truncate(2);
        exp.blocks[0].end_cycle = 3;
        exp.blocks[1].start_cycle = 3;
        exp.blocks[1].end_cycle = 6;
        record_observation(&mut exp, 0, 0.5, Classification::Tp);
        record_observation(&mut exp, 3, 0.5, Classification::Tp);

        // Not exhausted yet: thresholds unmet but blocks remain, so the
        // experiment must keep running rather than going terminal early.
        let rule = conclude_experiment(&mut exp, 3, IntentType::Generic, None);
        assert!(rule.is_none());
        assert_eq!(exp.status, ExperimentStatus::Running);

        // Last cycle of the last block: now it's exhausted.
        let rule = conclude_experiment(&mut exp, 5, IntentType::Generic, None);
        assert!(rule.is_none());
        assert_eq!(exp.status, ExperimentStatus::InsufficientData);
    }

    #[test]
    fn concludes_as_soon_as_thresholds_are_met_without_waiting_for_exhaustion() {
        let mut exp = create_experiment("watch", ExperimentField::Extraction, "auto".to_string(), "selector".to_string());
        exp.blocks = assign_blocks(30, 3);
        for (i, block) in exp.blocks.iter_mut().enumerate() {
            block.variant = if i % 2 == 0 { Variant::A } else { Variant::B };
        }

        // Only the first 8 (of 10) blocks have scored, 4 per variant --
        // enough to satisfy both thresholds -- while 2 assigned blocks
        // remain unscored. Conclusion must not wait for them.
        for block in exp.blocks.iter_mut().take(8) {
            let (score, positives) = match block.variant {
                Variant::A => (0.50, 2),
                Variant::B => (0.70, 2),
            };
            for _ in 0..positives {
                block.scores.push(score);
                block.positive_events += 1;
            }
        }

        let current_cycle = exp.blocks[7].end_cycle - 1;
        let rule = conclude_experiment(&mut exp, current_cycle, IntentType::Price, None).expect("should conclude early");
        assert_eq!(exp.status, ExperimentStatus::Concluded);
        assert_eq!(exp.winner, Some(Variant::B));
        assert_eq!(rule.recommendation.extraction.as_deref(), Some("selector"));
    }

    #[test]
    fn winning_experiment_emits_rule_with_expected_confidence() {
        let mut exp = create_experiment("watch", ExperimentField::Extraction, "auto".to_string(), "selector".to_string());
        exp.blocks = assign_blocks(20, 3);
        // Force a known alternation so we can script scores/positives
        // deterministically regardless of the random starting variant.
        for (i, block) in exp.blocks.iter_mut().enumerate() {
            block.variant = if i % 2 == 0 { Variant::A } else { Variant::B };
        }

        for block in exp.blocks.iter_mut() {
            let (score, positives) = match block.variant {
                Variant::A => (0.50, 2),
                Variant::B => (0.70, 2),
            };
            for _ in 0..positives {
                block.scores.push(score);
                block.positive_events += 1;
            }
        }

        let rule = conclude_experiment(&mut exp, 19, IntentType::Price, Some("retail")).expect("expected a rule");
        assert_eq!(exp.status, ExperimentStatus::Concluded);
        assert_eq!(exp.winner, Some(Variant::B));
        assert!((rule.confidence - 0.50).abs() < 1e-9);
        assert_eq!(rule.recommendation.extraction.as_deref(), Some("selector"));
    }

    #[test]
    fn planner_skips_terminal_fields_and_falls_through_priority() {
        let mut monitor = mk_monitor(IntentType::Generic, "auto");
        monitor.terminal_experiment_fields.push(ExperimentField::Extraction);
        let experiment = plan_next_experiment(&monitor).expect("should plan engine experiment next");
        assert_eq!(experiment.field, ExperimentField::Engine);
    }

    #[test]
    fn planner_halves_interval_for_volatile_intents() {
        let monitor = mk_monitor(IntentType::Price, "full");
        let mut monitor = monitor;
        monitor.terminal_experiment_fields.push(ExperimentField::Extraction);
        monitor.terminal_experiment_fields.push(ExperimentField::Engine);
        let experiment = plan_next_experiment(&monitor).expect("should plan interval experiment");
        assert_eq!(experiment.field, ExperimentField::IntervalSecs);
        assert_eq!(experiment.variant_b, "150");
    }
}
