//! Classification of observations into the confusion-matrix classes, and
//! the monitor-statistics update that follows from a classification.

use crate::types::{AgentCorrectness, Classification, Evaluation, MonitorState, MutationStep, Observation};

/// Pure classification law: TP iff both true, TN iff both false, FP iff
/// change happened unexpectedly, FN iff expected change was missed.
pub fn classify(expected_change: bool, actual_change: bool) -> Classification {
    match (expected_change, actual_change) {
        (true, true) => Classification::Tp,
        (false, false) => Classification::Tn,
        (false, true) => Classification::Fp,
        (true, false) => Classification::Fn_,
    }
}

/// Deterministic evaluator for E2E mode, where the schedule of applied
/// mutations gives ground truth for "expected change".
///
/// A change is expected at cycle `c` iff the most recent mutation with
/// `expect_detection = true` and `cycle <= c` was applied at `c` or `c-1`
/// (a one-cycle detection window).
pub fn evaluate_e2e(observation: &Observation, applied_mutations: &[MutationStep]) -> Evaluation {
    let cycle = observation.cycle();

    let expected_change = applied_mutations
        .iter()
        .filter(|m| m.expect_detection && m.cycle <= cycle)
        .max_by_key(|m| m.cycle)
        .map(|m| cycle.saturating_sub(m.cycle) <= 1)
        .unwrap_or(false);

    let actual_change = observation.actual_change() && !observation.is_error();
    let class = classify(expected_change, actual_change);

    let notified = matches!(observation, Observation::Ok { agent_notified: Some(true), .. });
    let agent_correct = match class {
        Classification::Tp => {
            if notified {
                AgentCorrectness::Correct
            } else {
                AgentCorrectness::Incorrect
            }
        }
        Classification::Tn | Classification::Fp => {
            if !notified {
                AgentCorrectness::Correct
            } else {
                AgentCorrectness::Incorrect
            }
        }
        Classification::Fn_ => AgentCorrectness::Unknown,
    };

    Evaluation {
        cycle,
        class,
        expected_change,
        actual_change,
        agent_correct,
        reason: format!("e2e: expected={expected_change} actual={actual_change}"),
    }
}

/// Heuristic evaluator for live mode, where there is no ground truth:
/// errors and "no change" both count as TN, any detected change counts as
/// TP. Expectation and agent correctness are unknowable.
pub fn evaluate_live(observation: &Observation) -> Evaluation {
    let cycle = observation.cycle();

    if let Observation::Error { error, .. } = observation {
        return Evaluation {
            cycle,
            class: Classification::Tn,
            expected_change: false,
            actual_change: false,
            agent_correct: AgentCorrectness::Unknown,
            reason: format!("live: probe error treated as no-change: {error}"),
        };
    }

    let actual_change = observation.actual_change();
    let class = if actual_change { Classification::Tp } else { Classification::Tn };

    Evaluation {
        cycle,
        class,
        expected_change: false,
        actual_change,
        agent_correct: AgentCorrectness::Unknown,
        reason: "live: no ground truth, heuristic classification".to_string(),
    }
}

/// Apply an evaluation's class to a monitor's confusion-matrix
/// accumulators, agent-decision counts, and detection-latency history.
pub fn update_monitor_stats(monitor: &mut MonitorState, evaluation: &Evaluation) {
    match evaluation.class {
        Classification::Tp => {
            monitor.tp += 1;
            let latency = monitor
                .cycle_of_last_tn
                .map(|last_tn| evaluation.cycle.saturating_sub(last_tn))
                .filter(|&l| l > 0)
                .unwrap_or(1);
            monitor.push_latency(latency);
        }
        Classification::Tn => {
            monitor.tn += 1;
            monitor.cycle_of_last_tn = Some(evaluation.cycle);
        }
        Classification::Fp => monitor.fp += 1,
        Classification::Fn_ => monitor.fn_ += 1,
    }

    match evaluation.agent_correct {
        AgentCorrectness::Correct => {
            monitor.agent_correct += 1;
            monitor.agent_total += 1;
        }
        AgentCorrectness::Incorrect => monitor.agent_total += 1,
        AgentCorrectness::Unknown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntentDefinition, IntentType, Mode};
    use chrono::Utc;

    fn mk_monitor() -> MonitorState {
        let intent = IntentDefinition {
            name: "watch".to_string(),
            url: "https://example.com".to_string(),
            intent_type: IntentType::Price,
            domain_class: None,
            mode: Mode::E2e,
            engine: "http".to_string(),
            extraction: "auto".to_string(),
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
    fn classify_matches_truth_table() {
        assert_eq!(classify(true, true), Classification::Tp);
        assert_eq!(classify(false, false), Classification::Tn);
        assert_eq!(classify(false, true), Classification::Fp);
        assert_eq!(classify(true, false), Classification::Fn_);
    }

    #[test]
    fn e2e_detects_change_in_window() {
        let obs = Observation::Ok {
            cycle: 2,
            timestamp: Utc::now(),
            changed: true,
            content_hash: None,
            diff_snippet: None,
            agent_notified: Some(true),
            agent_title: None,
            agent_summary: None,
        };
        let mutations = vec![MutationStep {
            cycle: 2,
            field: "product_price".to_string(),
            value: "$79.99".to_string(),
            expect_detection: true,
        }];
        let eval = evaluate_e2e(&obs, &mutations);
        assert_eq!(eval.class, Classification::Tp);
        assert_eq!(eval.agent_correct, AgentCorrectness::Correct);
    }

    #[test]
    fn e2e_outside_window_is_fn_when_missed() {
        let obs = Observation::Ok {
            cycle: 5,
            timestamp: Utc::now(),
            changed: false,
            content_hash: None,
            diff_snippet: None,
            agent_notified: None,
            agent_title: None,
            agent_summary: None,
        };
        let mutations = vec![MutationStep {
            cycle: 2,
            field: "product_price".to_string(),
            value: "$79.99".to_string(),
            expect_detection: true,
        }];
        let eval = evaluate_e2e(&obs, &mutations);
        // cycle 5 is outside the one-cycle window after cycle 2, so no
        // change is expected there anymore.
        assert_eq!(eval.class, Classification::Tn);
    }

    #[test]
    fn live_treats_error_as_tn() {
        let obs = Observation::Error {
            cycle: 1,
            timestamp: Utc::now(),
            error: "timeout".to_string(),
        };
        let eval = evaluate_live(&obs);
        assert_eq!(eval.class, Classification::Tn);
        assert_eq!(eval.agent_correct, AgentCorrectness::Unknown);
    }

    #[test]
    fn detection_latency_uses_last_tn_not_history_scan() {
        let mut monitor = mk_monitor();
        let tn_eval = Evaluation {
            cycle: 10,
            class: Classification::Tn,
            expected_change: false,
            actual_change: false,
            agent_correct: AgentCorrectness::Unknown,
            reason: String::new(),
        };
        update_monitor_stats(&mut monitor, &tn_eval);
        assert_eq!(monitor.cycle_of_last_tn, Some(10));

        let tp_eval = Evaluation {
            cycle: 13,
            class: Classification::Tp,
            expected_change: true,
            actual_change: true,
            agent_correct: AgentCorrectness::Correct,
            reason: String::new(),
        };
        update_monitor_stats(&mut monitor, &tp_eval);
        assert_eq!(monitor.detection_latencies.back().copied(), Some(3));
    }

    #[test]
    fn detection_latency_defaults_to_one_with_no_prior_tn() {
        let mut monitor = mk_monitor();
        let tp_eval = Evaluation {
            cycle: 0,
            class: Classification::Tp,
            expected_change: true,
            actual_change: true,
            agent_correct: AgentCorrectness::Correct,
            reason: String::new(),
        };
        update_monitor_stats(&mut monitor, &tp_eval);
        assert_eq!(monitor.detection_latencies.back().copied(), Some(1));
    }
}
