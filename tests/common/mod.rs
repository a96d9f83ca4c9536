//! Normal hierarchy with one random effect under the default Huang-Wand prior:
//!
//! - `y_ij ~ N(alpha_j, 1)`
//! - `alpha_j ~ N(mu, sigma^2)`
//! - `mu ~ N(0, 1)`, `sigma^2 | a ~ IG(1, 2 / a)`, `a ~ IG(1/2, 1)`
//!
//! Provides simulated data, a Gibbs sampler for posterior draws, and the exact
//! log marginal likelihood by one-dimensional quadrature over `log sigma^2`.

#![allow(dead_code)]

pub mod regression;

use faer::Mat;
use is2_evidence::utils::{
    log_sum_exp, sample_inverse_gamma, sample_standard_normal, usize_to_f64,
};
use is2_evidence::{ParameterView, PosteriorDraws, SamplerStage, SubjectData};
use rand::SeedableRng;
use rand::rngs::StdRng;

pub struct Dataset {
    pub subject_ids: Vec<u64>,
    pub observations: Vec<Vec<f64>>,
}

impl Dataset {
    pub fn subject_data(&self) -> SubjectData<Vec<f64>> {
        let mut ids = Vec::new();
        let mut rows = Vec::new();
        for (id, ys) in self.subject_ids.iter().zip(&self.observations) {
            for y in ys {
                ids.push(*id);
                rows.push(*y);
            }
        }
        SubjectData::from_rows(&ids, rows).expect("ids and rows match")
    }
}

pub fn simulate_dataset(
    subjects: usize,
    per_subject: usize,
    group_sd: f64,
    seed: u64,
) -> Dataset {
    let mut rng = StdRng::seed_from_u64(seed);
    let group_mean = 0.4;
    let subject_ids = (100..).take(subjects).collect();
    let observations = (0..subjects)
        .map(|_| {
            let alpha = group_sd.mul_add(sample_standard_normal(&mut rng), group_mean);
            (0..per_subject)
                .map(|_| alpha + sample_standard_normal(&mut rng))
                .collect()
        })
        .collect();
    Dataset {
        subject_ids,
        observations,
    }
}

/// `sum_i log N(y_i | alpha, 1)`.
pub fn normal_log_likelihood(parameters: &ParameterView<'_>, ys: &Vec<f64>) -> f64 {
    let alpha = parameters.get("alpha").unwrap_or(f64::NAN);
    ys.iter()
        .map(|y| -0.5 * (std::f64::consts::TAU.ln() + (y - alpha).powi(2)))
        .sum()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / usize_to_f64(values.len())
}

/// Gibbs draws labelled `Burn` for the first `burn_in` iterations and
/// `Sample` afterwards.
pub fn gibbs_draws(dataset: &Dataset, burn_in: usize, samples: usize, seed: u64) -> PosteriorDraws {
    let mut rng = StdRng::seed_from_u64(seed);
    let subjects = dataset.observations.len();
    let counts: Vec<f64> = dataset
        .observations
        .iter()
        .map(|ys| usize_to_f64(ys.len()))
        .collect();
    let means: Vec<f64> = dataset.observations.iter().map(|ys| mean(ys)).collect();
    let total = burn_in + samples;

    let mut alpha = means.clone();
    let mut mu = mean(&means);
    let mut sigma_sq = 1.0;
    let mut scale = 1.0;

    let mut effects = vec![Mat::<f64>::zeros(1, total); subjects];
    let mut group_mean = Mat::<f64>::zeros(1, total);
    let mut covariance = Vec::with_capacity(total);
    let mut scale_mixture = Mat::<f64>::zeros(1, total);

    for it in 0..total {
        for j in 0..subjects {
            let precision = counts[j] + 1.0 / sigma_sq;
            let centre = counts[j].mul_add(means[j], mu / sigma_sq) / precision;
            alpha[j] = centre + sample_standard_normal(&mut rng) / precision.sqrt();
        }

        let precision = 1.0 + usize_to_f64(subjects) / sigma_sq;
        let centre = (alpha.iter().sum::<f64>() / sigma_sq) / precision;
        mu = centre + sample_standard_normal(&mut rng) / precision.sqrt();

        let spread = alpha.iter().map(|value| (value - mu).powi(2)).sum::<f64>();
        sigma_sq = sample_inverse_gamma(
            &mut rng,
            0.5 * (2.0 + usize_to_f64(subjects)),
            0.5 * (4.0 / scale + spread),
        );
        scale = sample_inverse_gamma(&mut rng, 1.5, 2.0 / sigma_sq + 1.0);

        for j in 0..subjects {
            effects[j][(0, it)] = alpha[j];
        }
        group_mean[(0, it)] = mu;
        covariance.push(Mat::from_fn(1, 1, |_, _| sigma_sq));
        scale_mixture[(0, it)] = scale;
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

/// `log p(y | sigma^2)` with `alpha` and `mu` integrated out.
fn log_likelihood_given_variance(dataset: &Dataset, sigma_sq: f64) -> f64 {
    let mut constant = 0.0;
    let mut ybar = Vec::with_capacity(dataset.observations.len());
    let mut diag = Vec::with_capacity(dataset.observations.len());
    for ys in &dataset.observations {
        let m = usize_to_f64(ys.len());
        let centre = mean(ys);
        let within = ys.iter().map(|y| (y - centre).powi(2)).sum::<f64>();
        constant += -0.5 * (m - 1.0) * std::f64::consts::TAU.ln() - 0.5 * m.ln() - 0.5 * within;
        ybar.push(centre);
        diag.push(sigma_sq + 1.0 / m);
    }
    // ybar ~ N(0, D + 11^T) via Sherman-Morrison.
    let inverse_sum = diag.iter().map(|d| 1.0 / d).sum::<f64>();
    let weighted_sum = ybar.iter().zip(&diag).map(|(y, d)| y / d).sum::<f64>();
    let quadratic = ybar.iter().zip(&diag).map(|(y, d)| y * y / d).sum::<f64>()
        - weighted_sum * weighted_sum / (1.0 + inverse_sum);
    let log_det = diag.iter().map(|d| d.ln()).sum::<f64>() + (1.0 + inverse_sum).ln();
    let k = usize_to_f64(ybar.len());
    constant - 0.5 * (k * std::f64::consts::TAU.ln() + log_det + quadratic)
}

/// Exact log marginal likelihood by trapezoidal quadrature over `log sigma^2`.
///
/// The marginal prior of `sigma^2` after integrating `a` is
/// `(sigma^2)^-2 (1 + 2 / sigma^2)^(-3/2)`.
pub fn exact_log_marginal_likelihood(dataset: &Dataset) -> f64 {
    let step = 1.0e-3;
    let points = 60_001;
    let terms: Vec<f64> = (0..points)
        .map(|i| {
            let t = -30.0 + step * usize_to_f64(i);
            let sigma_sq = t.exp();
            let log_prior = -2.0 * t - 1.5 * (2.0 * (-t).exp()).ln_1p();
            let endpoint = if i == 0 || i == points - 1 { 0.5f64.ln() } else { 0.0 };
            log_prior + t + log_likelihood_given_variance(dataset, sigma_sq) + endpoint
        })
        .collect();
    log_sum_exp(&terms) + step.ln()
}
