/////////////////////////////////////////////////////////////////////////////////////////////\
//
// Shared linear algebra, sampling, and log-space utilities for the IS2 estimator.
//
// Created on: 16 Oct 2026
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Utilities
//!
//! Shared helpers for solving linear systems, Cholesky factorisation,
//! random variate generation, and numerically stable log-space reductions
//! over faer matrices and plain slices.

use faer::Mat;
use faer::prelude::Solve;
use num_traits::ToPrimitive;
use rand::RngExt;
use rand::rngs::StdRng;

/// Solve `a x = b` with a full-pivot LU factorisation.
///
/// Returns `None` if the solve produces non-finite values.
#[must_use]
pub fn solve_linear_system(a: &Mat<f64>, b: &Mat<f64>) -> Option<Mat<f64>> {
    let rhs = b.clone();
    let lu = a.full_piv_lu();
    let solution = lu.solve(rhs);
    if matrix_is_finite(&solution) {
        Some(solution)
    } else {
        None
    }
}

/// Invert a square matrix column by column.
#[must_use]
pub fn matrix_inverse(matrix: &Mat<f64>) -> Option<Mat<f64>> {
    let dim = matrix.ncols();
    if matrix.nrows() != dim {
        return None;
    }
    let identity = identity_matrix(dim);
    solve_linear_system(matrix, &identity)
}

/// Lower-triangular Cholesky factor `L` with `matrix = L L^T`.
///
/// Returns `None` when the matrix is not square or not numerically positive-definite.
#[must_use]
pub fn cholesky_lower(matrix: &Mat<f64>) -> Option<Mat<f64>> {
    let dim = matrix.ncols();
    if matrix.nrows() != dim {
        return None;
    }
    let mut lower = Mat::<f64>::zeros(dim, dim);
    for row in 0..dim {
        for col in 0..=row {
            let mut sum = matrix[(row, col)];
            for k in 0..col {
                sum -= lower[(row, k)] * lower[(col, k)];
            }
            if row == col {
                if !(sum > 0.0 && sum.is_finite()) {
                    return None;
                }
                lower[(row, col)] = sum.sqrt();
            } else {
                let denom = lower[(col, col)];
                if denom <= 0.0 {
                    return None;
                }
                lower[(row, col)] = sum / denom;
            }
        }
    }
    Some(lower)
}

/// Solve `L x = rhs` for lower-triangular `L` by forward substitution.
#[must_use]
pub fn forward_substitute(lower: &Mat<f64>, rhs: &[f64]) -> Vec<f64> {
    let dim = lower.nrows();
    let mut solution = vec![0.0; dim];
    for row in 0..dim {
        let mut sum = rhs[row];
        for col in 0..row {
            sum -= lower[(row, col)] * solution[col];
        }
        solution[row] = sum / lower[(row, row)];
    }
    solution
}

/// Inverse of a lower-triangular matrix (itself lower-triangular).
#[must_use]
pub fn lower_triangular_inverse(lower: &Mat<f64>) -> Mat<f64> {
    let dim = lower.nrows();
    let mut inverse = Mat::<f64>::zeros(dim, dim);
    let mut basis = vec![0.0; dim];
    for col in 0..dim {
        basis.fill(0.0);
        basis[col] = 1.0;
        let solved = forward_substitute(lower, &basis);
        for row in col..dim {
            inverse[(row, col)] = solved[row];
        }
    }
    inverse
}

/// Symmetrise a square matrix in place by averaging mirrored entries.
pub fn symmetrize(matrix: &mut Mat<f64>) {
    let dim = matrix.nrows();
    for row in 0..dim {
        for col in 0..row {
            let symmetric = 0.5 * (matrix[(row, col)] + matrix[(col, row)]);
            matrix[(row, col)] = symmetric;
            matrix[(col, row)] = symmetric;
        }
    }
}

#[must_use]
pub fn matrix_is_finite(matrix: &Mat<f64>) -> bool {
    for i in 0..matrix.nrows() {
        for j in 0..matrix.ncols() {
            if !matrix[(i, j)].is_finite() {
                return false;
            }
        }
    }
    true
}

#[must_use]
pub fn identity_matrix(dim: usize) -> Mat<f64> {
    Mat::from_fn(dim, dim, |row, col| if row == col { 1.0 } else { 0.0 })
}

/// Column means of a row-major sample matrix (`rows = draws`).
#[must_use]
pub fn column_means(samples: &Mat<f64>) -> Vec<f64> {
    let n = usize_to_f64(samples.nrows());
    (0..samples.ncols())
        .map(|col| (0..samples.nrows()).map(|row| samples[(row, col)]).sum::<f64>() / n)
        .collect()
}

/// Unbiased sample covariance of the rows of `samples`.
#[must_use]
pub fn sample_covariance(samples: &Mat<f64>, means: &[f64]) -> Mat<f64> {
    let dim = samples.ncols();
    let denom = usize_to_f64(samples.nrows().saturating_sub(1).max(1));
    let mut covariance = Mat::<f64>::zeros(dim, dim);
    for draw in 0..samples.nrows() {
        for row in 0..dim {
            let centered_row = samples[(draw, row)] - means[row];
            for col in 0..=row {
                covariance[(row, col)] += centered_row * (samples[(draw, col)] - means[col]);
            }
        }
    }
    for row in 0..dim {
        for col in 0..=row {
            let value = covariance[(row, col)] / denom;
            covariance[(row, col)] = value;
            covariance[(col, row)] = value;
        }
    }
    covariance
}

/// `log(exp(a) + exp(b))` without overflow.
#[must_use]
pub fn log_add_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// `log(sum(exp(values)))` with max-centering.
///
/// Returns `-inf` for an empty slice or when every value is `-inf`, and `NaN`
/// if any value is `NaN`.
#[must_use]
pub fn log_sum_exp(values: &[f64]) -> f64 {
    if values.iter().any(|value| value.is_nan()) {
        return f64::NAN;
    }
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum = values.iter().map(|value| (value - max).exp()).sum::<f64>();
    max + sum.ln()
}

/// `log(mean(exp(values)))` with max-centering.
#[must_use]
pub fn log_mean_exp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NEG_INFINITY;
    }
    log_sum_exp(values) - usize_to_f64(values.len()).ln()
}

pub fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1 = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
    let u2 = rng.random::<f64>();
    (-2.0_f64 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos()
}

/// Gamma variate with the given shape and scale (Marsaglia-Tsang).
pub fn sample_gamma(rng: &mut StdRng, shape: f64, scale: f64) -> f64 {
    if !(shape > 0.0 && scale > 0.0) {
        return f64::NAN;
    }

    if shape < 1.0 {
        let u = (1.0_f64 - rng.random::<f64>()).max(f64::MIN_POSITIVE);
        return sample_gamma(rng, shape + 1.0, scale) * u.powf(1.0 / shape);
    }

    let shape_minus_third = shape - (1.0 / 3.0);
    let coeff = (1.0 / (9.0 * shape_minus_third)).sqrt();
    loop {
        let standard_normal = sample_standard_normal(rng);
        let one_plus_coeff_noise = coeff.mul_add(standard_normal, 1.0);
        if one_plus_coeff_noise <= 0.0 {
            continue;
        }
        let cubic_term = one_plus_coeff_noise * one_plus_coeff_noise * one_plus_coeff_noise;
        let uniform = rng.random::<f64>();
        if uniform
            < (0.0331 * standard_normal * standard_normal * standard_normal)
                .mul_add(-standard_normal, 1.0)
        {
            return scale * shape_minus_third * cubic_term;
        }
        if uniform.ln()
            < (0.5 * standard_normal).mul_add(
                standard_normal,
                shape_minus_third * (1.0 - cubic_term + cubic_term.ln()),
            )
        {
            return scale * shape_minus_third * cubic_term;
        }
    }
}

/// Inverse-gamma variate with the given shape and scale.
pub fn sample_inverse_gamma(rng: &mut StdRng, shape: f64, scale: f64) -> f64 {
    1.0 / sample_gamma(rng, shape, 1.0 / scale)
}

/// Binomial variate as a sum of `trials` Bernoulli draws.
pub fn sample_binomial(rng: &mut StdRng, trials: usize, probability: f64) -> usize {
    let probability = probability.clamp(0.0, 1.0);
    (0..trials)
        .filter(|_| rng.random::<f64>() < probability)
        .count()
}

#[must_use]
pub fn boot_index_bounds(alpha: f64, n: usize) -> (usize, usize) {
    let n_f = usize_to_f64(n);
    let lower_idx = ((alpha / 2.0) * n_f).floor().to_usize().unwrap_or(0);
    let upper_idx = ((1.0 - alpha / 2.0) * n_f)
        .ceil()
        .to_usize()
        .unwrap_or(0)
        .saturating_sub(1);
    (lower_idx, upper_idx.min(n.saturating_sub(1)))
}

#[must_use]
pub fn usize_to_f64(value: usize) -> f64 {
    value.to_f64().unwrap_or(f64::MAX)
}
