//! Log-Cholesky bijection between covariance matrices and unconstrained vectors.
//!
//! A symmetric positive-definite `n x n` matrix `M = L L^T` is encoded as the
//! lower triangle of `L`, column by column, with the diagonal replaced by its
//! natural log. Every real vector of length `n (n + 1) / 2` maps back to a
//! valid positive-definite matrix, which lets Euclidean mixtures be fitted
//! over covariance-valued draws.

use faer::Mat;

use crate::utils::cholesky_lower;

/// Length of the unwound vector for an `n x n` matrix.
#[must_use]
pub const fn unwound_dimension(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Matrix dimension `n` for an unwound vector of length `len`, if `len` is triangular.
#[must_use]
pub fn matrix_dimension(len: usize) -> Option<usize> {
    let mut n = 0;
    while unwound_dimension(n) < len {
        n += 1;
    }
    (unwound_dimension(n) == len).then_some(n)
}

/// Encode a positive-definite matrix as its unwound vector.
///
/// Returns `None` if the matrix has no Cholesky factor.
#[must_use]
pub fn unwind(matrix: &Mat<f64>) -> Option<Vec<f64>> {
    let lower = cholesky_lower(matrix)?;
    Some(unwind_cholesky(&lower))
}

/// Encode a lower Cholesky factor with a positive diagonal.
#[must_use]
pub fn unwind_cholesky(lower: &Mat<f64>) -> Vec<f64> {
    let dim = lower.nrows();
    let mut vector = Vec::with_capacity(unwound_dimension(dim));
    for col in 0..dim {
        vector.push(lower[(col, col)].ln());
        for row in (col + 1)..dim {
            vector.push(lower[(row, col)]);
        }
    }
    vector
}

/// Lower Cholesky factor encoded by an unwound vector.
///
/// Returns `None` if the vector length is not a triangular number.
#[must_use]
pub fn rewind_cholesky(vector: &[f64]) -> Option<Mat<f64>> {
    let dim = matrix_dimension(vector.len())?;
    let mut lower = Mat::<f64>::zeros(dim, dim);
    let mut position = 0;
    for col in 0..dim {
        lower[(col, col)] = vector[position].exp();
        position += 1;
        for row in (col + 1)..dim {
            lower[(row, col)] = vector[position];
            position += 1;
        }
    }
    Some(lower)
}

/// Decode an unwound vector into the positive-definite matrix `L L^T`.
///
/// Returns `None` if the vector length is not a triangular number.
#[must_use]
pub fn rewind(vector: &[f64]) -> Option<Mat<f64>> {
    let lower = rewind_cholesky(vector)?;
    Some(&lower * lower.transpose())
}
