//! Random intercept and slope under the two-dimensional Huang-Wand prior:
//!
//! - `y_ij ~ N(intercept_j + slope_j x_ij, 1)`
//! - `(intercept_j, slope_j) ~ N(mu, Sigma)`
//! - `mu ~ N(0, I)`, `Sigma | a ~ IW(3, 4 diag(1 / a))`, `a_k ~ IG(1/2, 1)`

use std::cmp::Ordering;

use faer::Mat;
use is2_evidence::utils::{
    cholesky_lower, identity_matrix, matrix_inverse, sample_gamma, sample_inverse_gamma,
    sample_standard_normal, symmetrize, usize_to_f64,
};
use is2_evidence::{MultivariateNormal, ParameterView, PosteriorDraws, SamplerStage, SubjectData};
use rand::SeedableRng;
use rand::rngs::StdRng;

const EFFECTS: usize = 2;
/// `v + n - 1` with `v = 2` and two random effects.
const PRIOR_DF: f64 = 3.0;

pub struct RegressionDataset {
    pub subject_ids: Vec<u64>,
    /// `(x, y)` rows per subject.
    pub observations: Vec<Vec<(f64, f64)>>,
}

impl RegressionDataset {
    pub fn subject_data(&self) -> SubjectData<Vec<(f64, f64)>> {
        SubjectData::new(self.subject_ids.clone(), self.observations.clone())
            .expect("one slice per subject")
    }
}

pub fn simulate_regression(subjects: usize, per_subject: usize, seed: u64) -> RegressionDataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let subject_ids = (200..).take(subjects).collect();
    let span = usize_to_f64(per_subject.saturating_sub(1).max(1));
    let observations = (0..subjects)
        .map(|_| {
            let intercept = 0.5 + sample_standard_normal(&mut rng);
            let slope = 0.5f64.mul_add(sample_standard_normal(&mut rng), -0.3);
            (0..per_subject)
                .map(|i| {
                    let x = 2.0f64.mul_add(usize_to_f64(i) / span, -1.0);
                    let y = slope.mul_add(x, intercept) + sample_standard_normal(&mut rng);
                    (x, y)
                })
                .collect()
        })
        .collect();
    RegressionDataset {
        subject_ids,
        observations,
    }
}

/// `sum_i log N(y_i | intercept + slope x_i, 1)`.
pub fn regression_log_likelihood(parameters: &ParameterView<'_>, rows: &Vec<(f64, f64)>) -> f64 {
    let intercept = parameters.get("intercept").unwrap_or(f64::NAN);
    let slope = parameters.get("slope").unwrap_or(f64::NAN);
    rows.iter()
        .map(|(x, y)| {
            let residual = y - slope.mul_add(*x, intercept);
            -0.5 * residual.mul_add(residual, std::f64::consts::TAU.ln())
        })
        .sum()
}

fn mat_vec(matrix: &Mat<f64>, vector: &[f64]) -> Vec<f64> {
    (0..matrix.nrows())
        .map(|row| (0..matrix.ncols()).map(|col| matrix[(row, col)] * vector[col]).sum())
        .collect()
}

fn draw_normal(mean: Vec<f64>, covariance: &Mat<f64>, rng: &mut StdRng) -> Vec<f64> {
    let mut covariance = covariance.clone();
    symmetrize(&mut covariance);
    MultivariateNormal::new(mean, &covariance)
        .expect("conditional covariance is positive-definite")
        .sample(rng)
}

/// `IW(df, scale)` as the inverse of a Bartlett-decomposed Wishart draw.
fn sample_inverse_wishart(rng: &mut StdRng, df: f64, scale: &Mat<f64>) -> Mat<f64> {
    let dim = scale.nrows();
    let lower = cholesky_lower(&matrix_inverse(scale).expect("scale is invertible"))
        .expect("scale inverse is positive-definite");
    let bartlett = Mat::from_fn(dim, dim, |row, col| match row.cmp(&col) {
        Ordering::Greater => sample_standard_normal(rng),
        Ordering::Equal => sample_gamma(rng, 0.5 * (df - usize_to_f64(row)), 2.0).sqrt(),
        Ordering::Less => 0.0,
    });
    let factor = &lower * &bartlett;
    let wishart = &factor * factor.transpose();
    let mut draw = matrix_inverse(&wishart).expect("Wishart draw is invertible");
    symmetrize(&mut draw);
    draw
}

/// Gibbs draws labelled `Burn` for the first `burn_in` iterations and
/// `Sample` afterwards.
pub fn regression_gibbs_draws(
    dataset: &RegressionDataset,
    burn_in: usize,
    samples: usize,
    seed: u64,
) -> PosteriorDraws {
    let mut rng = StdRng::seed_from_u64(seed);
    let subjects = dataset.observations.len();
    let subjects_f = usize_to_f64(subjects);
    let moments: Vec<(Mat<f64>, Vec<f64>)> = dataset
        .observations
        .iter()
        .map(|rows| {
            let mut gram = Mat::<f64>::zeros(EFFECTS, EFFECTS);
            let mut cross = vec![0.0; EFFECTS];
            for (x, y) in rows {
                let design = [1.0, *x];
                for i in 0..EFFECTS {
                    cross[i] += design[i] * y;
                    for j in 0..EFFECTS {
                        gram[(i, j)] += design[i] * design[j];
                    }
                }
            }
            (gram, cross)
        })
        .collect();
    let total = burn_in + samples;

    let mut alpha = vec![vec![0.0; EFFECTS]; subjects];
    let mut mu = vec![0.0; EFFECTS];
    let mut sigma = identity_matrix(EFFECTS);
    let mut scale = vec![1.0; EFFECTS];

    let mut effects = vec![Mat::<f64>::zeros(EFFECTS, total); subjects];
    let mut group_mean = Mat::<f64>::zeros(EFFECTS, total);
    let mut covariance = Vec::with_capacity(total);
    let mut scale_mixture = Mat::<f64>::zeros(EFFECTS, total);

    for it in 0..total {
        let sigma_inverse = matrix_inverse(&sigma).expect("Sigma is invertible");
        let prior_shift = mat_vec(&sigma_inverse, &mu);
        for (effect, (gram, cross)) in alpha.iter_mut().zip(&moments) {
            let precision = Mat::from_fn(EFFECTS, EFFECTS, |row, col| {
                gram[(row, col)] + sigma_inverse[(row, col)]
            });
            let conditional = matrix_inverse(&precision).expect("precision is invertible");
            let rhs: Vec<f64> = cross.iter().zip(&prior_shift).map(|(a, b)| a + b).collect();
            *effect = draw_normal(mat_vec(&conditional, &rhs), &conditional, &mut rng);
        }

        let precision = Mat::from_fn(EFFECTS, EFFECTS, |row, col| {
            subjects_f.mul_add(sigma_inverse[(row, col)], if row == col { 1.0 } else { 0.0 })
        });
        let conditional = matrix_inverse(&precision).expect("precision is invertible");
        let summed: Vec<f64> = (0..EFFECTS)
            .map(|k| alpha.iter().map(|effect| effect[k]).sum())
            .collect();
        mu = draw_normal(
            mat_vec(&conditional, &mat_vec(&sigma_inverse, &summed)),
            &conditional,
            &mut rng,
        );

        let posterior_scale = Mat::from_fn(EFFECTS, EFFECTS, |row, col| {
            let scatter = alpha
                .iter()
                .map(|effect| (effect[row] - mu[row]) * (effect[col] - mu[col]))
                .sum::<f64>();
            if row == col {
                scatter + 4.0 / scale[row]
            } else {
                scatter
            }
        });
        sigma = sample_inverse_wishart(&mut rng, PRIOR_DF + subjects_f, &posterior_scale);
        let sigma_inverse = matrix_inverse(&sigma).expect("Sigma is invertible");
        for (k, value) in scale.iter_mut().enumerate() {
            *value = sample_inverse_gamma(&mut rng, 2.0, 2.0f64.mul_add(sigma_inverse[(k, k)], 1.0));
        }

        for (block, effect) in effects.iter_mut().zip(&alpha) {
            for k in 0..EFFECTS {
                block[(k, it)] = effect[k];
            }
        }
        for k in 0..EFFECTS {
            group_mean[(k, it)] = mu[k];
            scale_mixture[(k, it)] = scale[k];
        }
        covariance.push(sigma.clone());
    }

    let stages = (0..total)
        .map(|it| {
            if it < burn_in {
                SamplerStage::Burn
            } else {
                SamplerStage::Sample
            }
        })
        .collect();
    PosteriorDraws::new(
        dataset.subject_ids.clone(),
        effects,
        group_mean,
        covariance,
        scale_mixture,
    )
    .with_stages(stages)
}
