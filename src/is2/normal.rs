//! Multivariate normal distribution held in Cholesky form.

use faer::Mat;
use rand::rngs::StdRng;

use crate::utils::{cholesky_lower, forward_substitute, sample_standard_normal, usize_to_f64};

/// `N(mean, L L^T)` with a cached log-normalising constant.
#[derive(Debug, Clone)]
pub struct MultivariateNormal {
    mean: Vec<f64>,
    lower: Mat<f64>,
    log_normalizer: f64,
}

impl MultivariateNormal {
    /// Build from a mean and covariance matrix.
    ///
    /// Returns `None` if the covariance is not positive-definite or its
    /// dimension does not match the mean.
    #[must_use]
    pub fn new(mean: Vec<f64>, covariance: &Mat<f64>) -> Option<Self> {
        let lower = cholesky_lower(covariance)?;
        Self::from_cholesky(mean, lower)
    }

    /// Build from a mean and a lower Cholesky factor of the covariance.
    ///
    /// Returns `None` if the factor is not square with a positive, finite
    /// diagonal of the mean's dimension.
    #[must_use]
    pub fn from_cholesky(mean: Vec<f64>, lower: Mat<f64>) -> Option<Self> {
        let dim = mean.len();
        if lower.nrows() != dim || lower.ncols() != dim {
            return None;
        }
        let mut log_det_half = 0.0;
        for diag in 0..dim {
            let value = lower[(diag, diag)];
            if !(value > 0.0 && value.is_finite()) {
                return None;
            }
            log_det_half += value.ln();
        }
        if !crate::utils::matrix_is_finite(&lower) || mean.iter().any(|value| !value.is_finite()) {
            return None;
        }
        let log_normalizer = -0.5 * usize_to_f64(dim) * std::f64::consts::TAU.ln() - log_det_half;
        Some(Self {
            mean,
            lower,
            log_normalizer,
        })
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.mean.len()
    }

    #[must_use]
    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    #[must_use]
    pub const fn cholesky(&self) -> &Mat<f64> {
        &self.lower
    }

    #[must_use]
    pub fn covariance(&self) -> Mat<f64> {
        &self.lower * self.lower.transpose()
    }

    /// Log density at `point`.
    #[must_use]
    pub fn log_density(&self, point: &[f64]) -> f64 {
        let centered: Vec<f64> = point
            .iter()
            .zip(&self.mean)
            .map(|(value, mean)| value - mean)
            .collect();
        let whitened = forward_substitute(&self.lower, &centered);
        let quadratic = whitened.iter().map(|value| value * value).sum::<f64>();
        (-0.5f64).mul_add(quadratic, self.log_normalizer)
    }

    /// One draw `mean + L z` with `z ~ N(0, I)`.
    pub fn sample(&self, rng: &mut StdRng) -> Vec<f64> {
        let dim = self.dimension();
        let noise: Vec<f64> = (0..dim).map(|_| sample_standard_normal(rng)).collect();
        (0..dim)
            .map(|row| {
                let shift = (0..=row)
                    .map(|col| self.lower[(row, col)] * noise[col])
                    .sum::<f64>();
                self.mean[row] + shift
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn univariate_density_matches_closed_form() {
        let normal = MultivariateNormal::new(vec![1.0], &Mat::from_fn(1, 1, |_, _| 4.0))
            .expect("positive variance");
        let expected = -0.5 * (std::f64::consts::TAU * 4.0).ln() - 0.5 * (3.0 - 1.0_f64).powi(2) / 4.0;
        assert_relative_eq!(normal.log_density(&[3.0]), expected, epsilon = 1.0e-12);
    }

    #[test]
    fn bivariate_density_matches_closed_form() {
        let covariance = Mat::from_fn(2, 2, |i, j| if i == j { 2.0 } else { 0.5 });
        let normal = MultivariateNormal::new(vec![0.0, 0.0], &covariance).expect("positive-definite");
        let det = 2.0f64.mul_add(2.0, -0.25);
        let point = [1.0, -1.0];
        let inverse = [[2.0 / det, -0.5 / det], [-0.5 / det, 2.0 / det]];
        let quadratic = (0..2)
            .map(|i| (0..2).map(|j| point[i] * inverse[i][j] * point[j]).sum::<f64>())
            .sum::<f64>();
        let expected = -std::f64::consts::TAU.ln() - 0.5 * det.ln() - 0.5 * quadratic;
        assert_relative_eq!(normal.log_density(&point), expected, epsilon = 1.0e-12);
    }

    #[test]
    fn samples_recover_mean_and_covariance() {
        let covariance = Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 0.6 });
        let normal = MultivariateNormal::new(vec![2.0, -1.0], &covariance).expect("positive-definite");
        let mut rng = StdRng::seed_from_u64(5);
        let n = 20_000;
        let draws: Vec<Vec<f64>> = (0..n).map(|_| normal.sample(&mut rng)).collect();
        let mean0 = draws.iter().map(|draw| draw[0]).sum::<f64>() / usize_to_f64(n);
        let mean1 = draws.iter().map(|draw| draw[1]).sum::<f64>() / usize_to_f64(n);
        let cross = draws
            .iter()
            .map(|draw| (draw[0] - mean0) * (draw[1] - mean1))
            .sum::<f64>()
            / usize_to_f64(n);
        assert!((mean0 - 2.0).abs() < 0.05);
        assert!((mean1 + 1.0).abs() < 0.05);
        assert!((cross - 0.6).abs() < 0.05);
    }

    #[test]
    fn non_finite_factor_is_rejected() {
        let lower = Mat::from_fn(1, 1, |_, _| f64::INFINITY);
        assert!(MultivariateNormal::from_cholesky(vec![0.0], lower).is_none());
        let singular = Mat::from_fn(2, 2, |_, _| 1.0);
        assert!(MultivariateNormal::new(vec![0.0, 0.0], &singular).is_none());
    }
}
