//! Opaque quality subsystem: turns usage counters into a bounded score and
//! a categorical tag. The exact formula is not part of the wire contract.

use kairos_types::Step;

/// Bounded bonus rewarding well-formed steps (explicit proof, useful tags).
pub(crate) fn implementation_bonus(step: &Step) -> f64 {
    let mut bonus = 0.0;
    if step.proof_of_work.is_some() {
        bonus += 0.2;
    }
    bonus += step.tags.len().min(3) as f64 * 0.1;
    bonus.min(0.5)
}

/// Recompute the step quality score and tag from its counters.
///
/// The score is the success ratio pulled toward the 0.5 prior while few
/// ratings exist, so one lucky run does not mark a step excellent.
pub(crate) fn rescore(step: &Step) -> (f64, String) {
    let metrics = &step.quality_metrics;
    let rated = metrics.success_count + metrics.failure_count;
    let score = if rated == 0 {
        0.5
    } else {
        let ratio = f64::from(metrics.success_count) / f64::from(rated);
        let confidence = f64::from(rated) / (f64::from(rated) + 2.0);
        0.5 * (1.0 - confidence) + ratio * confidence
    };
    let score = score.clamp(0.0, 1.0);

    let label = match score {
        s if s >= 0.8 => "excellent",
        s if s >= 0.6 => "good",
        s if s >= 0.4 => "fair",
        _ => "poor",
    };
    (score, label.to_string())
}
