//! Defensive-mixture particle generation for one subject and one proposal.

use rand::rngs::StdRng;

use super::group::GroupDistribution;
use super::normal::MultivariateNormal;
use super::proposals::clamped_binomial_split;

/// Random-effect particles for one (subject, proposal) pair.
#[derive(Debug, Clone)]
pub struct Particles {
    /// Conditional draws first, then group draws.
    pub values: Vec<Vec<f64>>,
    pub from_conditional: usize,
}

impl Particles {
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn from_group(&self) -> usize {
        self.values.len() - self.from_conditional
    }
}

/// Draw `n_particles` particles: a clamped-binomial share (probability
/// `mixing_weight`) from the subject conditional, the rest from the group
/// distribution.
pub fn generate_particles<G: GroupDistribution>(
    conditional: &MultivariateNormal,
    group: &G,
    n_particles: usize,
    mixing_weight: f64,
    rng: &mut StdRng,
) -> Particles {
    let (from_conditional, from_group) = clamped_binomial_split(n_particles, mixing_weight, rng);
    let mut values = Vec::with_capacity(n_particles);
    for _ in 0..from_conditional {
        values.push(conditional.sample(rng));
    }
    values.extend(group.sample_n(from_group, rng));
    Particles {
        values,
        from_conditional,
    }
}
