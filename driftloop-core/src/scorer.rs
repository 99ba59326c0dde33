//! Efficacy scoring: combines the confusion matrix, latency history, and
//! recent score variance into one weighted total per cycle.

use crate::config::{e2e_weights, live_weights, sla_cycles, stability_threshold, WeightProfile};
use crate::types::{EfficacyScore, Mode, MonitorState};

fn safe_div(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        numerator / denominator
    }
}

/// F1 from the cumulative confusion matrix. Zero denominators safely
/// yield 0 rather than NaN.
pub fn f1_score(tp: u64, fp: u64, fn_: u64) -> f64 {
    let tp = tp as f64;
    let precision = safe_div(tp, tp + fp as f64);
    let recall = safe_div(tp, tp + fn_ as f64);
    safe_div(2.0 * precision * recall, precision + recall)
}

/// `1 - min(avg_latency, sla) / sla`, where `avg_latency` is the mean of
/// recorded latencies (or `sla` itself when there are none yet).
pub fn latency_score(latencies: &[u64], sla: f64) -> f64 {
    if sla <= 0.0 {
        return 1.0;
    }
    let avg = if latencies.is_empty() {
        sla
    } else {
        latencies.iter().sum::<u64>() as f64 / latencies.len() as f64
    };
    (1.0 - (avg.min(sla) / sla)).clamp(0.0, 1.0)
}

fn stdev(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt()
}

/// `1 - min(stdev(last 10 scores) / threshold, 1)`; fewer than three
/// scores is treated as perfectly stable.
pub fn compute_stability(scores: &[f64], threshold: f64) -> f64 {
    if scores.len() < 3 {
        return 1.0;
    }
    let recent = &scores[scores.len().saturating_sub(10)..];
    let sd = stdev(recent);
    (1.0 - (sd / threshold).min(1.0)).clamp(0.0, 1.0)
}

/// Agent accuracy sub-score: `correct/total` in E2E mode when there is at
/// least one decision, otherwise 0.
pub fn agent_score(mode: Mode, agent_correct: u64, agent_total: u64) -> f64 {
    if matches!(mode, Mode::E2e) && agent_total > 0 {
        agent_correct as f64 / agent_total as f64
    } else {
        0.0
    }
}

/// Compose the four sub-scores into the per-cycle efficacy total using the
/// weight profile for the monitor's intent type and mode.
pub fn compute_efficacy(monitor: &MonitorState, mode: Mode) -> EfficacyScore {
    let f1 = f1_score(monitor.tp, monitor.fp, monitor.fn_);

    let sla = sla_cycles(monitor.intent_type);
    let latencies: Vec<u64> = monitor.detection_latencies.iter().copied().collect();
    let latency = latency_score(&latencies, sla);

    let threshold = stability_threshold(monitor.intent_type);
    let scores: Vec<f64> = monitor.scores.iter().copied().collect();
    let stability = compute_stability(&scores, threshold);

    let agent = agent_score(mode, monitor.agent_correct, monitor.agent_total);

    let weights: WeightProfile = match mode {
        Mode::E2e => e2e_weights(monitor.intent_type),
        Mode::Live => live_weights(monitor.intent_type),
    };

    let total = weights.f1 * f1 + weights.agent * agent + weights.latency * latency + weights.stability * stability;

    EfficacyScore { f1, latency, stability, agent, total }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f1_is_zero_on_zero_denominators() {
        assert_eq!(f1_score(0, 0, 0), 0.0);
    }

    #[test]
    fn f1_is_one_on_perfect_classification() {
        assert_eq!(f1_score(5, 0, 0), 1.0);
    }

    #[test]
    fn stability_is_one_below_three_scores() {
        assert_eq!(compute_stability(&[0.5, 0.6], 0.2), 1.0);
    }

    #[test]
    fn stability_penalizes_high_variance() {
        let noisy = vec![0.1, 0.9, 0.1, 0.9, 0.1];
        let stable = vec![0.5, 0.5, 0.5, 0.5, 0.5];
        assert!(compute_stability(&noisy, 0.2) < compute_stability(&stable, 0.2));
    }

    #[test]
    fn latency_score_uses_sla_when_no_history() {
        assert_eq!(latency_score(&[], 3.0), 0.0);
    }

    #[test]
    fn latency_score_is_one_at_zero_latency() {
        assert_eq!(latency_score(&[0], 3.0), 1.0);
    }

    #[test]
    fn agent_score_zero_in_live_mode_regardless_of_counts() {
        assert_eq!(agent_score(Mode::Live, 10, 10), 0.0);
    }

    #[test]
    fn total_efficacy_stays_within_unit_interval() {
        use crate::types::{IntentDefinition, IntentType, Mode as M};
        let intent = IntentDefinition {
            name: "w".to_string(),
            url: "https://example.com".to_string(),
            intent_type: IntentType::Generic,
            domain_class: None,
            mode: M::E2e,
            engine: "http".to_string(),
            extraction: "auto".to_string(),
            selector: None,
            interval_secs: 60,
            agent_instructions: None,
            tags: vec![],
            mutations: vec![],
            expected_detections: 0,
        };
        let mut monitor = MonitorState::new(&intent, "w".to_string());
        monitor.tp = 7;
        monitor.fp = 2;
        monitor.fn_ = 1;
        monitor.agent_correct = 6;
        monitor.agent_total = 7;
        for l in [1, 2, 1, 3] {
            monitor.push_latency(l);
        }
        for s in [0.4, 0.5, 0.6, 0.55, 0.5] {
            monitor.push_score(s);
        }

        let score = compute_efficacy(&monitor, M::E2e);
        assert!((0.0..=1.0).contains(&score.total));
    }
}
