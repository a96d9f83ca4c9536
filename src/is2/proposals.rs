//! Clamped count splits and outer-layer proposal generation.

use rand::rngs::StdRng;

use super::mixture::ImportanceMixture;
use crate::utils::sample_binomial;

/// Split `total` into `(first, total - first)` with
/// `first ~ Binomial(total, probability)` clamped to `[2, total - 2]`.
///
/// For `total < 4` the clamp cannot hold on both sides; the first count is
/// then kept within `[0, total]` and favours the upper bound.
pub fn clamped_binomial_split(total: usize, probability: f64, rng: &mut StdRng) -> (usize, usize) {
    let upper = total.saturating_sub(2);
    let lower = 2.min(upper);
    let first = sample_binomial(rng, total, probability).clamp(lower, upper);
    (first, total - first)
}

/// Split `total` across components with the given weights.
///
/// Components are visited in order; component `k` receives
/// `Binomial(remaining, w_k / w_remaining)` clamped so that it and every later
/// component keep at least two, and the last component takes the remainder.
/// With two components this is exactly [`clamped_binomial_split`] on the first
/// weight.
pub fn split_counts(total: usize, weights: &[f64], rng: &mut StdRng) -> Vec<usize> {
    let Some(last) = weights.len().checked_sub(1) else {
        return Vec::new();
    };
    let mut counts = Vec::with_capacity(weights.len());
    let mut remaining = total;
    let mut remaining_weight = weights.iter().sum::<f64>();
    for (k, weight) in weights.iter().enumerate() {
        if k == last {
            counts.push(remaining);
            break;
        }
        let later = last - k;
        let probability = if remaining_weight > 0.0 {
            weight / remaining_weight
        } else {
            0.0
        };
        let upper = remaining.saturating_sub(2 * later);
        let lower = 2.min(upper);
        let count = sample_binomial(rng, remaining, probability).clamp(lower, upper);
        counts.push(count);
        remaining -= count;
        remaining_weight -= weight;
    }
    counts
}

/// `total` group-level proposals, drawn component by component.
///
/// Counts per component come from [`split_counts`] on the mixture weights, so
/// every component contributes at least two proposals when `total >= 2K`.
pub fn generate_proposals(
    mixture: &ImportanceMixture,
    total: usize,
    rng: &mut StdRng,
) -> Vec<Vec<f64>> {
    let counts = split_counts(total, &mixture.weights(), rng);
    log::debug!("proposal counts per mixture component: {counts:?}");
    let mut proposals = Vec::with_capacity(total);
    for (component, count) in mixture.components().iter().zip(counts) {
        for _ in 0..count {
            proposals.push(component.distribution.sample(rng));
        }
    }
    proposals
}
