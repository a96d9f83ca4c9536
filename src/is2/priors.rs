//! Huang-Wand prior and log-density helpers.

use faer::Mat;
use statrs::function::gamma::ln_gamma;

use super::group::HierarchicalPrior;
use super::normal::MultivariateNormal;
use super::types::Is2Error;
use super::unwind::rewind_cholesky;
use crate::utils::{lower_triangular_inverse, usize_to_f64};

/// Multivariate-normal group distribution with a normal prior on the group
/// mean and the Huang-Wand scale-mixture prior on the group covariance:
///
/// - `mu ~ N(m0, S0)`
/// - `Sigma | a ~ IW(v + n - 1, 2 v diag(1 / a))`
/// - `a_k ~ IG(shape, scale_k)`
///
/// Group-level vectors are `[mu, unwind(Sigma), log a]`.
#[derive(Debug, Clone)]
pub struct HuangWandPrior {
    mean_prior: MultivariateNormal,
    v_half: f64,
    scale_shape: f64,
    scale_scale: Vec<f64>,
}

impl HuangWandPrior {
    /// Prior with the given group-mean hyperparameters, `v = 2`, and
    /// `a_k ~ IG(1/2, 1)` (half-t scale `A_k = 1`).
    ///
    /// # Errors
    ///
    /// Returns `Is2Error::InvalidPriorConfig` if the mean prior is not a valid
    /// multivariate normal.
    pub fn new(mean_prior_mean: Vec<f64>, mean_prior_covariance: &Mat<f64>) -> Result<Self, Is2Error> {
        let n = mean_prior_mean.len();
        if n == 0 {
            return Err(Is2Error::InvalidPriorConfig);
        }
        let mean_prior = MultivariateNormal::new(mean_prior_mean, mean_prior_covariance)
            .ok_or(Is2Error::InvalidPriorConfig)?;
        Ok(Self {
            mean_prior,
            v_half: 2.0,
            scale_shape: 0.5,
            scale_scale: vec![1.0; n],
        })
    }

    /// Standard normal mean prior for `n` random effects.
    ///
    /// # Errors
    ///
    /// Returns `Is2Error::InvalidPriorConfig` if `n == 0`.
    pub fn standard(n: usize) -> Result<Self, Is2Error> {
        Self::new(vec![0.0; n], &crate::utils::identity_matrix(n))
    }

    /// # Errors
    ///
    /// Returns `Is2Error::InvalidPriorConfig` unless `v_half > 0`.
    pub fn with_v_half(self, v_half: f64) -> Result<Self, Is2Error> {
        if !(v_half > 0.0 && v_half.is_finite()) {
            return Err(Is2Error::InvalidPriorConfig);
        }
        Ok(Self { v_half, ..self })
    }

    /// Inverse-gamma shape and per-dimension scales (`1 / A_k^2`) for the
    /// scale-mixture weights.
    ///
    /// # Errors
    ///
    /// Returns `Is2Error::InvalidPriorConfig` on non-positive values or a
    /// dimension mismatch.
    pub fn with_scale_hyperparameters(
        self,
        shape: f64,
        scales: Vec<f64>,
    ) -> Result<Self, Is2Error> {
        if !(shape > 0.0 && shape.is_finite())
            || scales.len() != self.mean_prior.dimension()
            || scales.iter().any(|scale| !(*scale > 0.0 && scale.is_finite()))
        {
            return Err(Is2Error::InvalidPriorConfig);
        }
        Ok(Self {
            scale_shape: shape,
            scale_scale: scales,
            ..self
        })
    }

    #[must_use]
    pub const fn v_half(&self) -> f64 {
        self.v_half
    }

    /// Inverse-Wishart degrees of freedom `v + n - 1`.
    #[must_use]
    pub fn wishart_df(&self) -> f64 {
        self.v_half + usize_to_f64(self.mean_prior.dimension()) - 1.0
    }
}

impl HierarchicalPrior for HuangWandPrior {
    type Group = MultivariateNormal;

    fn n_random_effects(&self) -> usize {
        self.mean_prior.dimension()
    }

    fn log_prior(&self, group: &[f64]) -> f64 {
        let layout = self.layout();
        if group.len() != layout.len() {
            return f64::NEG_INFINITY;
        }
        let n = layout.n_random_effects();
        let Some(lower) = rewind_cholesky(&group[layout.covariance()]) else {
            return f64::NEG_INFINITY;
        };
        if !crate::utils::matrix_is_finite(&lower) || (0..n).any(|i| lower[(i, i)] <= 0.0) {
            return f64::NEG_INFINITY;
        }
        let log_scale = &group[layout.log_scale()];
        let scale_mixture: Vec<f64> = log_scale.iter().map(|value| value.exp()).collect();
        if scale_mixture
            .iter()
            .any(|value| !(*value > 0.0 && value.is_finite()))
        {
            return f64::NEG_INFINITY;
        }

        let log_prior_mean = self.mean_prior.log_density(&group[layout.mean()]);
        let wishart_scale: Vec<f64> = scale_mixture
            .iter()
            .map(|value| 2.0 * self.v_half / value)
            .collect();
        let log_prior_covariance =
            log_inverse_wishart_density_diagonal_scale(&lower, self.wishart_df(), &wishart_scale);
        let log_prior_scale = scale_mixture
            .iter()
            .zip(&self.scale_scale)
            .map(|(value, scale)| log_inverse_gamma_density(*value, self.scale_shape, *scale))
            .sum::<f64>();

        let log_jacobian_scale = log_scale.iter().sum::<f64>();
        let log_jacobian_cholesky = log_jacobian_unwound(&lower);

        log_prior_mean
            + log_prior_covariance
            + log_prior_scale
            + log_jacobian_scale
            + log_jacobian_cholesky
    }

    fn group_distribution(&self, group: &[f64]) -> Option<MultivariateNormal> {
        let layout = self.layout();
        if group.len() < layout.conditioning_len() {
            return None;
        }
        let lower = rewind_cholesky(&group[layout.covariance()])?;
        MultivariateNormal::from_cholesky(group[layout.mean()].to_vec(), lower)
    }
}

/// Log-density for an inverse-gamma distribution.
#[must_use]
pub fn log_inverse_gamma_density(value: f64, shape: f64, scale: f64) -> f64 {
    if !(value > 0.0 && shape > 0.0 && scale > 0.0) {
        return f64::NEG_INFINITY;
    }

    shape.mul_add(scale.ln(), -ln_gamma(shape)) - (shape + 1.0).mul_add(value.ln(), scale / value)
}

/// Log of the multivariate gamma function `Gamma_p(x)`.
#[must_use]
pub fn ln_multivariate_gamma(x: f64, p: usize) -> f64 {
    let p_f = usize_to_f64(p);
    let constant = p_f * (p_f - 1.0) / 4.0 * std::f64::consts::PI.ln();
    (0..p)
        .map(|j| ln_gamma(x - 0.5 * usize_to_f64(j)))
        .sum::<f64>()
        + constant
}

/// Inverse-Wishart log density of `Sigma = L L^T` for a diagonal scale matrix.
#[must_use]
pub fn log_inverse_wishart_density_diagonal_scale(
    lower: &Mat<f64>,
    df: f64,
    scale_diagonal: &[f64],
) -> f64 {
    let p = lower.nrows();
    let p_f = usize_to_f64(p);
    if df <= p_f - 1.0 || scale_diagonal.len() != p {
        return f64::NEG_INFINITY;
    }
    let log_det_scale = scale_diagonal.iter().map(|value| value.ln()).sum::<f64>();
    let log_det_sigma = 2.0 * (0..p).map(|i| lower[(i, i)].ln()).sum::<f64>();

    // diag(Sigma^-1)_k = sum_i (L^-1)_{ik}^2
    let lower_inverse = lower_triangular_inverse(lower);
    let trace = (0..p)
        .map(|k| {
            let precision_kk = (k..p)
                .map(|i| lower_inverse[(i, k)] * lower_inverse[(i, k)])
                .sum::<f64>();
            scale_diagonal[k] * precision_kk
        })
        .sum::<f64>();

    0.5 * df * log_det_scale
        - 0.5 * df * p_f * std::f64::consts::LN_2
        - ln_multivariate_gamma(0.5 * df, p)
        - 0.5 * (df + p_f + 1.0) * log_det_sigma
        - 0.5 * trace
}

/// Log Jacobian of `Sigma = L L^T` with respect to the unwound vector of `L`:
/// `n log 2 + sum_i (n - i + 1) log L_ii` for 0-based `i`.
#[must_use]
pub fn log_jacobian_unwound(lower: &Mat<f64>) -> f64 {
    let n = lower.nrows();
    let n_f = usize_to_f64(n);
    n_f * std::f64::consts::LN_2
        + (0..n)
            .map(|i| usize_to_f64(n - i + 1) * lower[(i, i)].ln())
            .sum::<f64>()
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn inverse_gamma_density_requires_positive_inputs() {
        let ll = log_inverse_gamma_density(0.0, 1.0, 1.0);
        assert!(!ll.is_finite());
    }

    #[test]
    fn inverse_wishart_reduces_to_inverse_gamma_in_one_dimension() {
        let sigma_sq: f64 = 1.7;
        let lower = Mat::from_fn(1, 1, |_, _| sigma_sq.sqrt());
        let df = 3.0;
        let psi = 2.5;
        let iw = log_inverse_wishart_density_diagonal_scale(&lower, df, &[psi]);
        let ig = log_inverse_gamma_density(sigma_sq, df / 2.0, psi / 2.0);
        assert_relative_eq!(iw, ig, epsilon = 1.0e-12);
    }

    #[test]
    fn multivariate_gamma_matches_univariate_gamma() {
        assert_relative_eq!(ln_multivariate_gamma(2.5, 1), ln_gamma(2.5), epsilon = 1.0e-12);
    }

    #[test]
    fn one_dimensional_prior_matches_explicit_change_of_variables() {
        let prior = HuangWandPrior::standard(1).expect("valid prior");
        let mu: f64 = 0.3;
        let log_sd: f64 = -0.2;
        let log_a: f64 = 0.4;
        let sigma_sq = (2.0 * log_sd).exp();
        let a = log_a.exp();

        let log_normal = -0.5 * (std::f64::consts::TAU.ln() + mu * mu);
        // IW(v + n - 1 = 2, 2 v / a) in one dimension is IG(1, 2 / a).
        let log_sigma = log_inverse_gamma_density(sigma_sq, 1.0, 2.0 / a);
        let log_scale = log_inverse_gamma_density(a, 0.5, 1.0);
        // d sigma^2 / d log_sd = 2 sigma^2 and d a / d log a = a.
        let jacobian = (2.0 * sigma_sq).ln() + log_a;
        let expected = log_normal + log_sigma + log_scale + jacobian;

        assert_relative_eq!(
            prior.log_prior(&[mu, log_sd, log_a]),
            expected,
            epsilon = 1.0e-12
        );
    }

    #[test]
    fn prior_rejects_wrong_dimension() {
        let prior = HuangWandPrior::standard(2).expect("valid prior");
        assert_eq!(prior.log_prior(&[0.0; 3]), f64::NEG_INFINITY);
        assert!(prior.log_prior(&[0.0; 7]).is_finite());
    }

    #[test]
    fn group_distribution_uses_rewound_covariance() {
        let prior = HuangWandPrior::standard(2).expect("valid prior");
        let group = [1.0, -1.0, 0.0, 0.5, 0.0, 0.0, 0.0];
        let distribution = prior.group_distribution(&group).expect("finite factor");
        let covariance = distribution.covariance();
        assert_relative_eq!(covariance[(0, 0)], 1.0, epsilon = 1.0e-12);
        assert_relative_eq!(covariance[(1, 0)], 0.5, epsilon = 1.0e-12);
        assert_relative_eq!(covariance[(1, 1)], 1.25, epsilon = 1.0e-12);
        assert_eq!(distribution.mean(), &[1.0, -1.0]);
    }

    #[test]
    fn hyperparameter_validation() {
        let prior = HuangWandPrior::standard(2).expect("valid prior");
        assert!(prior.clone().with_v_half(0.0).is_err());
        assert!(prior.clone().with_scale_hyperparameters(0.5, vec![1.0]).is_err());
        let tuned = prior
            .with_scale_hyperparameters(1.0, vec![0.5, 2.0])
            .expect("valid hyperparameters");
        assert_relative_eq!(tuned.wishart_df(), 3.0);
        assert!(HuangWandPrior::standard(0).is_err());
    }
}
