//! Log-space aggregation of proposal weights and bootstrap uncertainty.

use rand::RngExt;
use rand::rngs::StdRng;

use super::types::Is2Error;
use crate::utils::{boot_index_bounds, log_mean_exp, log_sum_exp, usize_to_f64};

/// Bootstrap distribution of the aggregated estimate.
#[derive(Debug, Clone, Default)]
pub struct BootstrapSummary {
    /// One aggregate per resample, in resample order.
    pub estimates: Vec<f64>,
    pub mean: f64,
    pub variance: f64,
    pub std_error: f64,
    /// 2.5% percentile of the bootstrap estimates.
    pub lower: f64,
    /// 97.5% percentile of the bootstrap estimates.
    pub upper: f64,
    /// Resamples with no finite weight, left out of every statistic above.
    pub dropped_resamples: usize,
}

/// `log(mean(exp(log_weights)))` with max-centering.
///
/// `-inf` weights are allowed as long as at least one weight is finite.
///
/// # Errors
///
/// Returns `Is2Error::EmptyWeights`, `Is2Error::NoFiniteWeights` when every
/// weight is `-inf`, or `Is2Error::NonFiniteEstimate` for `NaN`/`+inf`.
pub fn aggregate_log_weights(log_weights: &[f64]) -> Result<f64, Is2Error> {
    if log_weights.is_empty() {
        return Err(Is2Error::EmptyWeights);
    }
    let estimate = log_mean_exp(log_weights);
    if estimate == f64::NEG_INFINITY {
        return Err(Is2Error::NoFiniteWeights {
            proposals: log_weights.len(),
        });
    }
    if !estimate.is_finite() {
        return Err(Is2Error::NonFiniteEstimate);
    }
    Ok(estimate)
}

/// Resample the weights with replacement `resamples` times and summarise the
/// aggregates.
///
/// Resamples that contain only `-inf` weights are dropped from the summary
/// and counted in [`BootstrapSummary::dropped_resamples`].
///
/// # Errors
///
/// Returns `Is2Error::InvalidBootstrapResamples` for zero resamples, the
/// aggregation errors of [`aggregate_log_weights`] for the full sample, and
/// `Is2Error::NonFiniteEstimate` when no resample has a finite aggregate.
pub fn bootstrap_log_weights(
    log_weights: &[f64],
    resamples: usize,
    rng: &mut StdRng,
) -> Result<BootstrapSummary, Is2Error> {
    if resamples == 0 {
        return Err(Is2Error::InvalidBootstrapResamples);
    }
    aggregate_log_weights(log_weights)?;

    let n = log_weights.len();
    let mut resampled = vec![0.0; n];
    let mut estimates = Vec::with_capacity(resamples);
    let mut dropped = 0;
    for _ in 0..resamples {
        for slot in &mut resampled {
            *slot = log_weights[rng.random_range(0..n)];
        }
        let estimate = log_mean_exp(&resampled);
        if estimate.is_finite() {
            estimates.push(estimate);
        } else {
            dropped += 1;
        }
    }
    if dropped > 0 {
        log::warn!("{dropped} of {resamples} bootstrap resamples had no finite weight");
    }
    summarise(estimates, dropped)
}

fn summarise(estimates: Vec<f64>, dropped: usize) -> Result<BootstrapSummary, Is2Error> {
    if estimates.is_empty() {
        return Err(Is2Error::NonFiniteEstimate);
    }
    let count = usize_to_f64(estimates.len());
    let mean = estimates.iter().sum::<f64>() / count;
    let variance = if estimates.len() > 1 {
        estimates
            .iter()
            .map(|estimate| (estimate - mean).powi(2))
            .sum::<f64>()
            / (count - 1.0)
    } else {
        0.0
    };
    let mut sorted = estimates.clone();
    sorted.sort_by(f64::total_cmp);
    let (lower_idx, upper_idx) = boot_index_bounds(0.05, sorted.len());
    Ok(BootstrapSummary {
        lower: sorted[lower_idx],
        upper: sorted[upper_idx],
        estimates,
        mean,
        variance,
        std_error: variance.sqrt(),
        dropped_resamples: dropped,
    })
}

/// Kish effective sample size `(sum w)^2 / sum w^2`, computed in log space.
///
/// Returns `0.0` when no weight is finite.
#[must_use]
pub fn effective_sample_size(log_weights: &[f64]) -> f64 {
    let log_total = log_sum_exp(log_weights);
    if !log_total.is_finite() {
        return 0.0;
    }
    let doubled: Vec<f64> = log_weights.iter().map(|weight| 2.0 * weight).collect();
    2.0f64.mul_add(log_total, -log_sum_exp(&doubled)).exp()
}
