//! Outer importance weight for one proposal.

/// `log p(y | theta) + log p(theta) - log q(theta)` for a group-level proposal
/// `theta` with mixture density `q`.
///
/// A zero likelihood or zero prior gives `-inf`, as does a proposal whose
/// importance density is not finite (it cannot be weighted). `NaN` inputs
/// propagate so aggregation can report them.
#[must_use]
pub fn combine_log_weight(log_likelihood: f64, log_prior: f64, log_importance: f64) -> f64 {
    if log_likelihood.is_nan() || log_prior.is_nan() || log_importance.is_nan() {
        return f64::NAN;
    }
    if log_likelihood == f64::NEG_INFINITY
        || log_prior == f64::NEG_INFINITY
        || !log_importance.is_finite()
    {
        return f64::NEG_INFINITY;
    }
    log_likelihood + log_prior - log_importance
}
