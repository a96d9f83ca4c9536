//! Parameter schema, the subject-likelihood contract, and the per-proposal
//! likelihood weight engine.

use rand::rngs::StdRng;

use super::assemble::ConditionalNormal;
use super::group::GroupDistribution;
use super::normal::MultivariateNormal;
use super::particles::generate_particles;
use super::types::{Is2Error, OracleFailurePolicy};
use crate::utils::{log_add_exp, log_mean_exp};

/// Ordered names of the per-subject random effects.
///
/// Position `i` in every particle is the parameter named `names()[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterSchema {
    names: Vec<String>,
}

impl ParameterSchema {
    /// # Errors
    ///
    /// Returns `Is2Error::InvalidSchema` for an empty, blank, or duplicated name list.
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Result<Self, Is2Error> {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(Is2Error::InvalidSchema("no parameter names".to_string()));
        }
        for (position, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(Is2Error::InvalidSchema(format!(
                    "blank name at position {position}"
                )));
            }
            if names[..position].contains(name) {
                return Err(Is2Error::InvalidSchema(format!("duplicate name `{name}`")));
            }
        }
        Ok(Self { names })
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|candidate| candidate == name)
    }

    /// Borrow `values` under this schema.
    ///
    /// `values` must have `len()` entries.
    #[must_use]
    pub fn view<'a>(&'a self, values: &'a [f64]) -> ParameterView<'a> {
        debug_assert_eq!(values.len(), self.names.len());
        ParameterView {
            schema: self,
            values,
        }
    }
}

/// One particle's random effects, addressable by name.
#[derive(Debug, Clone, Copy)]
pub struct ParameterView<'a> {
    schema: &'a ParameterSchema,
    values: &'a [f64],
}

impl<'a> ParameterView<'a> {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<f64> {
        self.schema
            .index_of(name)
            .and_then(|index| self.values.get(index).copied())
    }

    #[must_use]
    pub const fn values(&self) -> &'a [f64] {
        self.values
    }

    #[must_use]
    pub const fn schema(&self) -> &'a ParameterSchema {
        self.schema
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, f64)> + 'a {
        self.schema
            .names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

/// Log-likelihood of one subject's data given that subject's random effects.
///
/// The value may itself be an unbiased stochastic estimate. `NaN` and `+inf`
/// are oracle failures; `-inf` is a legitimate zero likelihood.
pub trait SubjectLikelihood<D>: Sync {
    fn log_likelihood(&self, parameters: &ParameterView<'_>, data: &D) -> f64;
}

impl<D, F> SubjectLikelihood<D> for F
where
    F: Fn(&ParameterView<'_>, &D) -> f64 + Sync,
{
    fn log_likelihood(&self, parameters: &ParameterView<'_>, data: &D) -> f64 {
        self(parameters, data)
    }
}

/// Summed subject log-likelihood estimate for one proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProposalLikelihood {
    pub log_likelihood: f64,
    /// Particles whose oracle value was `NaN` or `+inf`.
    pub non_finite: usize,
}

/// Everything the inner importance-sampling layer reads, passed explicitly.
#[derive(Debug)]
pub struct WeightEngine<'a, D, L> {
    pub schema: &'a ParameterSchema,
    pub likelihood: &'a L,
    pub conditionals: &'a [ConditionalNormal],
    /// Subject data aligned with `conditionals`.
    pub data: &'a [&'a D],
    pub n_particles: usize,
    pub mixing_weight: f64,
    pub oracle_failure: OracleFailurePolicy,
}

impl<D, L> WeightEngine<'_, D, L>
where
    L: SubjectLikelihood<D>,
{
    /// Sum over subjects of the particle log-mean-exp likelihood estimate.
    ///
    /// Returns `Ok(None)` when a subject conditional cannot be formed at this
    /// proposal (non-finite conditional mean).
    ///
    /// # Errors
    ///
    /// Returns `Is2Error::OracleFailure` under [`OracleFailurePolicy::Abort`].
    pub fn proposal_log_likelihood<G: GroupDistribution>(
        &self,
        proposal: usize,
        group_vector: &[f64],
        group: &G,
        rng: &mut StdRng,
    ) -> Result<Option<ProposalLikelihood>, Is2Error> {
        let mut total = ProposalLikelihood {
            log_likelihood: 0.0,
            non_finite: 0,
        };
        for (subject, (conditional, data)) in self.conditionals.iter().zip(self.data).enumerate() {
            let Some(conditional) = conditional.given(group_vector) else {
                return Ok(None);
            };
            let (estimate, non_finite) =
                self.subject_log_likelihood(subject, proposal, &conditional, group, *data, rng)?;
            total.log_likelihood += estimate;
            total.non_finite += non_finite;
        }
        Ok(Some(total))
    }

    /// Unbiased log-likelihood estimate for one subject and its count of
    /// failed oracle calls.
    ///
    /// Each particle is weighted by
    /// `loglik + log g(x) - log(w c(x) + (1 - w) g(x))` for the subject
    /// conditional `c` and group distribution `g`.
    ///
    /// # Errors
    ///
    /// Returns `Is2Error::OracleFailure` under [`OracleFailurePolicy::Abort`].
    pub fn subject_log_likelihood<G: GroupDistribution>(
        &self,
        subject: usize,
        proposal: usize,
        conditional: &MultivariateNormal,
        group: &G,
        data: &D,
        rng: &mut StdRng,
    ) -> Result<(f64, usize), Is2Error> {
        let particles =
            generate_particles(conditional, group, self.n_particles, self.mixing_weight, rng);
        let log_mix = self.mixing_weight.ln();
        let log_defensive = (1.0 - self.mixing_weight).ln();
        let mut non_finite = 0;
        let mut weights = Vec::with_capacity(particles.len());
        for particle in &particles.values {
            let mut log_likelihood = self
                .likelihood
                .log_likelihood(&self.schema.view(particle), data);
            if log_likelihood.is_nan() || log_likelihood == f64::INFINITY {
                match self.oracle_failure {
                    OracleFailurePolicy::Abort => {
                        return Err(Is2Error::OracleFailure { subject, proposal });
                    }
                    OracleFailurePolicy::NegativeInfinity => {
                        non_finite += 1;
                        log_likelihood = f64::NEG_INFINITY;
                    }
                }
            }
            let log_group = group.log_density(particle);
            let log_denominator = log_add_exp(
                log_mix + conditional.log_density(particle),
                log_defensive + log_group,
            );
            weights.push(log_likelihood + log_group - log_denominator);
        }
        Ok((log_mean_exp(&weights), non_finite))
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use faer::Mat;
    use rand::SeedableRng;

    use super::*;
    use crate::is2::assemble::SubjectMoments;

    fn schema() -> ParameterSchema {
        ParameterSchema::new(["drift"]).expect("valid schema")
    }

    fn conditional() -> ConditionalNormal {
        let moments = SubjectMoments {
            mean: vec![0.5, 0.0],
            covariance: Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 0.3 }),
        };
        ConditionalNormal::from_moments(&moments, 1).expect("positive-definite")
    }

    #[test]
    fn schema_rejects_duplicates_and_blanks() {
        assert!(ParameterSchema::new(["a", "b", "a"]).is_err());
        assert!(ParameterSchema::new([" "]).is_err());
        assert!(ParameterSchema::new(Vec::<String>::new()).is_err());
        let schema = ParameterSchema::new(["v", "a", "t0"]).expect("valid");
        assert_eq!(schema.index_of("t0"), Some(2));
    }

    #[test]
    fn view_reads_values_by_name() {
        let schema = ParameterSchema::new(["v", "a"]).expect("valid");
        let values = [1.5, -0.2];
        let view = schema.view(&values);
        assert_eq!(view.get("a"), Some(-0.2));
        assert_eq!(view.get("missing"), None);
        let pairs: Vec<(&str, f64)> = view.iter().collect();
        assert_eq!(pairs, vec![("v", 1.5), ("a", -0.2)]);
    }

    #[test]
    fn constant_likelihood_returns_its_value() {
        // With a likelihood that ignores the particle, every weight is
        // loglik + log g - log q; the average of g / q is near one.
        let schema = schema();
        let likelihood = |_: &ParameterView<'_>, value: &f64| *value;
        let conditionals = [conditional()];
        let data = [&-3.0];
        let engine = WeightEngine {
            schema: &schema,
            likelihood: &likelihood,
            conditionals: &conditionals,
            data: &data,
            n_particles: 4_000,
            mixing_weight: 0.5,
            oracle_failure: OracleFailurePolicy::NegativeInfinity,
        };
        let group = MultivariateNormal::new(vec![0.0], &Mat::from_fn(1, 1, |_, _| 1.0)).expect("valid");
        let mut rng = StdRng::seed_from_u64(31);
        let estimate = engine
            .proposal_log_likelihood(0, &[0.0, 0.0], &group, &mut rng)
            .expect("finite oracle")
            .expect("finite conditional");
        assert_relative_eq!(estimate.log_likelihood, -3.0, epsilon = 0.05);
        assert_eq!(estimate.non_finite, 0);
    }

    #[test]
    fn gaussian_likelihood_matches_closed_form_integral() {
        // y ~ N(alpha, 1), alpha ~ N(0, 1)  =>  y ~ N(0, 2).
        let schema = schema();
        let likelihood = |parameters: &ParameterView<'_>, y: &f64| {
            let alpha = parameters.get("drift").unwrap_or(f64::NAN);
            -0.5 * (std::f64::consts::TAU.ln() + (y - alpha).powi(2))
        };
        let conditionals = [conditional()];
        let data = [&0.8];
        let engine = WeightEngine {
            schema: &schema,
            likelihood: &likelihood,
            conditionals: &conditionals,
            data: &data,
            n_particles: 20_000,
            mixing_weight: 0.95,
            oracle_failure: OracleFailurePolicy::NegativeInfinity,
        };
        let group = MultivariateNormal::new(vec![0.0], &Mat::from_fn(1, 1, |_, _| 1.0)).expect("valid");
        let mut rng = StdRng::seed_from_u64(32);
        let estimate = engine
            .proposal_log_likelihood(0, &[0.0, 0.0], &group, &mut rng)
            .expect("finite oracle")
            .expect("finite conditional");
        let expected = -0.5 * ((2.0 * std::f64::consts::TAU).ln() + 0.8 * 0.8 / 2.0);
        assert_relative_eq!(estimate.log_likelihood, expected, epsilon = 0.02);
    }

    #[test]
    fn oracle_failures_follow_the_policy() {
        let schema = schema();
        let likelihood = |parameters: &ParameterView<'_>, _: &()| {
            if parameters.get("drift").unwrap_or(0.0) > 0.0 {
                f64::NAN
            } else {
                0.0
            }
        };
        let conditionals = [conditional()];
        let data = [&()];
        let group = MultivariateNormal::new(vec![0.0], &Mat::from_fn(1, 1, |_, _| 1.0)).expect("valid");
        let mut engine = WeightEngine {
            schema: &schema,
            likelihood: &likelihood,
            conditionals: &conditionals,
            data: &data,
            n_particles: 200,
            mixing_weight: 0.95,
            oracle_failure: OracleFailurePolicy::NegativeInfinity,
        };
        let mut rng = StdRng::seed_from_u64(33);
        let tolerated = engine
            .proposal_log_likelihood(0, &[0.0, 0.0], &group, &mut rng)
            .expect("failures are tolerated")
            .expect("finite conditional");
        assert!(tolerated.non_finite > 0);
        assert!(tolerated.log_likelihood.is_finite());

        engine.oracle_failure = OracleFailurePolicy::Abort;
        let err = engine
            .proposal_log_likelihood(7, &[0.0, 0.0], &group, &mut rng)
            .expect_err("abort policy");
        assert!(matches!(
            err,
            Is2Error::OracleFailure {
                subject: 0,
                proposal: 7
            }
        ));
    }

    #[test]
    fn non_finite_proposal_has_no_conditional() {
        let schema = schema();
        let likelihood = |_: &ParameterView<'_>, _: &()| 0.0;
        let conditionals = [conditional()];
        let data = [&()];
        let engine = WeightEngine {
            schema: &schema,
            likelihood: &likelihood,
            conditionals: &conditionals,
            data: &data,
            n_particles: 10,
            mixing_weight: 0.95,
            oracle_failure: OracleFailurePolicy::NegativeInfinity,
        };
        let group = MultivariateNormal::new(vec![0.0], &Mat::from_fn(1, 1, |_, _| 1.0)).expect("valid");
        let mut rng = StdRng::seed_from_u64(34);
        let outcome = engine
            .proposal_log_likelihood(0, &[f64::NAN, 0.0], &group, &mut rng)
            .expect("no oracle failure");
        assert!(outcome.is_none());
    }
}
