//! Posterior sample assembly.
//!
//! Turns validated [`PosteriorDraws`] into the group-level augmented sample
//! matrix the importance mixture is fitted to, plus one conditional-normal
//! approximation per subject built from that subject's joint draws of random
//! effects and group-level parameters.

use faer::Mat;

use super::group::AugmentedLayout;
use super::normal::MultivariateNormal;
use super::types::Is2Error;
use super::unwind::unwind;
use crate::input::PosteriorDraws;
use crate::utils::{cholesky_lower, column_means, sample_covariance, solve_linear_system, symmetrize};

/// Group-level augmented draws, `iterations x layout.len()`.
#[derive(Debug, Clone)]
pub struct AugmentedSample {
    layout: AugmentedLayout,
    samples: Mat<f64>,
}

impl AugmentedSample {
    #[must_use]
    pub const fn layout(&self) -> AugmentedLayout {
        self.layout
    }

    /// Rows are iterations, columns are `[mu, unwind(Sigma), log a]`.
    #[must_use]
    pub const fn samples(&self) -> &Mat<f64> {
        &self.samples
    }

    #[must_use]
    pub fn n_iterations(&self) -> usize {
        self.samples.nrows()
    }

    #[must_use]
    pub fn n_params(&self) -> usize {
        self.samples.ncols()
    }

    #[must_use]
    pub fn row(&self, iteration: usize) -> Vec<f64> {
        (0..self.samples.ncols())
            .map(|col| self.samples[(iteration, col)])
            .collect()
    }
}

/// Empirical mean and covariance of `[alpha_j, mu, unwind(Sigma)]` for one subject.
#[derive(Debug, Clone)]
pub struct SubjectMoments {
    pub mean: Vec<f64>,
    pub covariance: Mat<f64>,
}

/// `alpha_j | (mu, unwind(Sigma))` under the subject's empirical joint normal.
///
/// The gain `S_ax S_xx^-1` and the conditional covariance factor are computed
/// once; only the mean shifts with each proposal.
#[derive(Debug, Clone)]
pub struct ConditionalNormal {
    effect_mean: Vec<f64>,
    conditioning_mean: Vec<f64>,
    gain: Mat<f64>,
    lower: Mat<f64>,
}

impl ConditionalNormal {
    /// Precompute the conditional of the first `n_random_effects` coordinates
    /// of `moments` given the remaining ones.
    ///
    /// Returns `None` if either the conditioning block or the conditional
    /// covariance is not positive-definite.
    #[must_use]
    pub fn from_moments(moments: &SubjectMoments, n_random_effects: usize) -> Option<Self> {
        let total = moments.mean.len();
        if n_random_effects == 0 || n_random_effects >= total {
            return None;
        }
        let n = n_random_effects;
        let c = total - n;
        let s_aa = Mat::from_fn(n, n, |i, j| moments.covariance[(i, j)]);
        let s_xa = Mat::from_fn(c, n, |i, j| moments.covariance[(n + i, j)]);
        let s_xx = Mat::from_fn(c, c, |i, j| moments.covariance[(n + i, n + j)]);

        cholesky_lower(&s_xx)?;
        // S_xx^-1 S_xa, transposed below into the gain S_ax S_xx^-1.
        let projection = solve_linear_system(&s_xx, &s_xa)?;
        let gain = Mat::from_fn(n, c, |i, j| projection[(j, i)]);

        let mut conditional = s_aa - s_xa.transpose() * &projection;
        symmetrize(&mut conditional);
        let lower = cholesky_lower(&conditional)?;

        Some(Self {
            effect_mean: moments.mean[..n].to_vec(),
            conditioning_mean: moments.mean[n..].to_vec(),
            gain,
            lower,
        })
    }

    /// Length of the conditioning vector (`n + n (n + 1) / 2`).
    #[must_use]
    pub fn conditioning_len(&self) -> usize {
        self.conditioning_mean.len()
    }

    /// Conditional distribution of the random effects given the leading
    /// `conditioning_len()` coordinates of a group-level vector.
    #[must_use]
    pub fn given(&self, group: &[f64]) -> Option<MultivariateNormal> {
        if group.len() < self.conditioning_len() {
            return None;
        }
        let mean = self
            .effect_mean
            .iter()
            .enumerate()
            .map(|(row, base)| {
                let shift = self
                    .conditioning_mean
                    .iter()
                    .zip(group)
                    .enumerate()
                    .map(|(col, (centre, value))| self.gain[(row, col)] * (value - centre))
                    .sum::<f64>();
                base + shift
            })
            .collect();
        MultivariateNormal::from_cholesky(mean, self.lower.clone())
    }
}

/// Everything the estimator needs from the posterior draws.
#[derive(Debug, Clone)]
pub struct AssembledPosterior {
    pub group: AugmentedSample,
    pub subject_moments: Vec<SubjectMoments>,
    pub conditionals: Vec<ConditionalNormal>,
}

impl AssembledPosterior {
    #[must_use]
    pub fn n_subjects(&self) -> usize {
        self.conditionals.len()
    }
}

/// Build the group-level augmented sample and per-subject conditionals.
///
/// # Errors
///
/// Returns `Is2Error::InvalidInput` for inconsistent draws,
/// `Is2Error::NonPositiveDefiniteCovariance` for a covariance draw without a
/// Cholesky factor, and `Is2Error::SingularSubjectMoments` when a subject's
/// empirical covariance cannot be conditioned.
pub fn assemble(draws: &PosteriorDraws) -> Result<AssembledPosterior, Is2Error> {
    draws.validate()?;
    let n_re = draws.n_random_effects();
    let iterations = draws.n_iterations();
    let layout = AugmentedLayout::new(n_re);

    let unwound = draws
        .group_covariance
        .iter()
        .enumerate()
        .map(|(iteration, covariance)| {
            unwind(covariance).ok_or(Is2Error::NonPositiveDefiniteCovariance { iteration })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut samples = Mat::<f64>::zeros(iterations, layout.len());
    for (iteration, unwound_row) in unwound.iter().enumerate() {
        for k in 0..n_re {
            samples[(iteration, k)] = draws.group_mean[(k, iteration)];
            samples[(iteration, layout.log_scale().start + k)] =
                draws.scale_mixture[(k, iteration)].ln();
        }
        for (offset, value) in unwound_row.iter().enumerate() {
            samples[(iteration, layout.covariance().start + offset)] = *value;
        }
    }
    log::debug!(
        "assembled {iterations} group-level draws with {} augmented coordinates",
        layout.len()
    );

    let conditioning_len = layout.conditioning_len();
    let mut subject_moments = Vec::with_capacity(draws.n_subjects());
    let mut conditionals = Vec::with_capacity(draws.n_subjects());
    for (subject, effects) in draws.random_effects.iter().enumerate() {
        let joint = Mat::from_fn(iterations, n_re + conditioning_len, |iteration, col| {
            if col < n_re {
                effects[(col, iteration)]
            } else {
                samples[(iteration, col - n_re)]
            }
        });
        let mean = column_means(&joint);
        let covariance = sample_covariance(&joint, &mean);
        let moments = SubjectMoments { mean, covariance };
        let conditional = ConditionalNormal::from_moments(&moments, n_re)
            .ok_or(Is2Error::SingularSubjectMoments { subject })?;
        subject_moments.push(moments);
        conditionals.push(conditional);
    }

    Ok(AssembledPosterior {
        group: AugmentedSample { layout, samples },
        subject_moments,
        conditionals,
    })
}
