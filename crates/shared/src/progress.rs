//! Progress scoring for key results and objectives. Values are percentages
//! in `0.0..=100.0`, rounded to one decimal place.

use crate::domain::MetricType;

pub fn key_result_progress(metric: MetricType, start: f64, target: f64, current: f64) -> f64 {
    if metric == MetricType::Boolean {
        return if current >= 1.0 { 100.0 } else { 0.0 };
    }

    let span = target - start;
    if span.abs() < f64::EPSILON {
        let reached = if target >= 0.0 {
            current >= target
        } else {
            current <= target
        };
        return if reached { 100.0 } else { 0.0 };
    }

    round_one_decimal(((current - start) / span * 100.0).clamp(0.0, 100.0))
}

/// Weighted mean of `(progress, weight)` pairs. Non-positive weights are
/// ignored; with no usable weight the plain mean is returned.
pub fn weighted_progress<I>(items: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let items: Vec<(f64, f64)> = items.into_iter().collect();
    if items.is_empty() {
        return 0.0;
    }

    let total_weight: f64 = items
        .iter()
        .filter(|(_, weight)| *weight > 0.0)
        .map(|(_, weight)| weight)
        .sum();
    if total_weight <= 0.0 {
        let sum: f64 = items.iter().map(|(progress, _)| progress).sum();
        return round_one_decimal(sum / items.len() as f64);
    }

    let weighted: f64 = items
        .iter()
        .filter(|(_, weight)| *weight > 0.0)
        .map(|(progress, weight)| progress * weight)
        .sum();
    round_one_decimal(weighted / total_weight)
}

pub fn average_progress<I>(values: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    weighted_progress(values.into_iter().map(|value| (value, 1.0)))
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_progress_is_linear_and_clamped() {
        assert_eq!(key_result_progress(MetricType::Number, 0.0, 200.0, 50.0), 25.0);
        assert_eq!(key_result_progress(MetricType::Number, 0.0, 200.0, 400.0), 100.0);
        assert_eq!(key_result_progress(MetricType::Number, 10.0, 20.0, 5.0), 0.0);
    }

    #[test]
    fn decreasing_targets_score_towards_the_target() {
        // churn from 10% down to 4%
        assert_eq!(key_result_progress(MetricType::Percentage, 10.0, 4.0, 7.0), 50.0);
    }

    #[test]
    fn boolean_and_flat_ranges() {
        assert_eq!(key_result_progress(MetricType::Boolean, 0.0, 1.0, 1.0), 100.0);
        assert_eq!(key_result_progress(MetricType::Boolean, 0.0, 1.0, 0.0), 0.0);
        assert_eq!(key_result_progress(MetricType::Number, 5.0, 5.0, 5.0), 100.0);
        assert_eq!(key_result_progress(MetricType::Number, 5.0, 5.0, 4.0), 0.0);
    }

    #[test]
    fn weighted_mean_respects_weights() {
        assert_eq!(weighted_progress([(100.0, 3.0), (0.0, 1.0)]), 75.0);
        assert_eq!(weighted_progress([(40.0, 0.0), (60.0, 0.0)]), 50.0);
        assert_eq!(weighted_progress(Vec::new()), 0.0);
        assert_eq!(average_progress([10.0, 20.0, 30.0]), 20.0);
    }
}
