//! Group-level prior families and the group distribution of random effects.
//!
//! [`HierarchicalPrior`] is the one model-family-specific seam of the
//! estimator: it evaluates the prior of a group-level vector and turns that
//! vector into the distribution subject random effects are drawn from.
//! [`super::priors::HuangWandPrior`] is the default multivariate-normal
//! implementation.

use std::ops::Range;

use rand::rngs::StdRng;

use super::normal::MultivariateNormal;
use super::unwind::unwound_dimension;

/// Distribution of one subject's random effects given group-level parameters.
pub trait GroupDistribution {
    /// One random-effect vector.
    fn sample(&self, rng: &mut StdRng) -> Vec<f64>;

    /// Log density of a random-effect vector.
    fn log_density(&self, random_effect: &[f64]) -> f64;

    /// `n` independent random-effect vectors.
    fn sample_n(&self, n: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
        (0..n).map(|_| self.sample(rng)).collect()
    }
}

impl GroupDistribution for MultivariateNormal {
    fn sample(&self, rng: &mut StdRng) -> Vec<f64> {
        Self::sample(self, rng)
    }

    fn log_density(&self, random_effect: &[f64]) -> f64 {
        Self::log_density(self, random_effect)
    }
}

/// Prior over group-level vectors laid out as an [`AugmentedLayout`].
pub trait HierarchicalPrior: Sync {
    type Group: GroupDistribution;

    /// Random effects per subject.
    fn n_random_effects(&self) -> usize;

    /// Log prior density of a group-level vector in the unconstrained
    /// parameterisation, including the reparameterisation Jacobians.
    fn log_prior(&self, group: &[f64]) -> f64;

    /// Group distribution implied by a group-level vector, or `None` if the
    /// vector does not describe a usable distribution (e.g. overflow).
    fn group_distribution(&self, group: &[f64]) -> Option<Self::Group>;

    fn layout(&self) -> AugmentedLayout {
        AugmentedLayout::new(self.n_random_effects())
    }
}

/// Positions of the blocks in a group-level augmented vector:
/// group mean, unwound group covariance, log scale-mixture weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AugmentedLayout {
    n_random_effects: usize,
}

impl AugmentedLayout {
    #[must_use]
    pub const fn new(n_random_effects: usize) -> Self {
        Self { n_random_effects }
    }

    #[must_use]
    pub const fn n_random_effects(self) -> usize {
        self.n_random_effects
    }

    #[must_use]
    pub const fn mean(self) -> Range<usize> {
        0..self.n_random_effects
    }

    #[must_use]
    pub const fn covariance(self) -> Range<usize> {
        self.n_random_effects..self.n_random_effects + unwound_dimension(self.n_random_effects)
    }

    #[must_use]
    pub const fn log_scale(self) -> Range<usize> {
        let start = self.n_random_effects + unwound_dimension(self.n_random_effects);
        start..start + self.n_random_effects
    }

    /// Length of the mean and covariance blocks, which the group distribution depends on.
    #[must_use]
    pub const fn conditioning_len(self) -> usize {
        self.n_random_effects + unwound_dimension(self.n_random_effects)
    }

    /// Full augmented length `n + n (n + 1) / 2 + n`.
    #[must_use]
    pub const fn len(self) -> usize {
        self.conditioning_len() + self.n_random_effects
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.n_random_effects == 0
    }
}
