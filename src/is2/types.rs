//! Core public types for the IS2 module.

use thiserror::Error;

use super::aggregate::BootstrapSummary;
use crate::inference::{FanOutSchedule, InferenceError};
use crate::input::InputError;

/// Stage of the estimator pipeline in which an error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Is2Stage {
    Configuration,
    Assembly,
    MixtureFit,
    Evaluation,
    Aggregation,
}

/// Reason a single EM attempt failed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MixtureFitFailure {
    #[error("{samples} samples cannot support the requested mixture (need at least {minimum})")]
    TooFewSamples { samples: usize, minimum: usize },
    #[error("component {component} has a singular covariance")]
    SingularCovariance { component: usize },
    #[error("component {component} lost all responsibility")]
    CollapsedComponent { component: usize },
    #[error("mixture log-likelihood became non-finite")]
    NonFiniteLogLikelihood,
    #[error("EM did not converge within {iterations} iterations")]
    NonConvergence { iterations: usize },
}

/// Errors returned by IS2 configuration, assembly, fitting, and aggregation.
#[derive(Debug, Error)]
pub enum Is2Error {
    #[error(transparent)]
    InvalidInput(#[from] InputError),
    #[error(transparent)]
    InvalidSchedule(#[from] InferenceError),
    #[error("particle count must be at least 4; found {found}")]
    InvalidParticleCount { found: usize },
    #[error("proposal count ({found}) must be at least {minimum} for {components} components")]
    InvalidProposalCount {
        found: usize,
        minimum: usize,
        components: usize,
    },
    #[error("mixture component count must be positive")]
    InvalidComponentCount,
    #[error("mixing weight must lie strictly inside (0, 1); found {0}")]
    InvalidMixingWeight(f64),
    #[error("bootstrap resample count must be positive")]
    InvalidBootstrapResamples,
    #[error("mixture fit attempts must be positive")]
    InvalidFitAttempts,
    #[error("invalid mixture fit options")]
    InvalidMixtureOptions,
    #[error("invalid group-level prior configuration")]
    InvalidPriorConfig,
    #[error("invalid parameter schema: {0}")]
    InvalidSchema(String),
    #[error("parameter schema has {schema} fields but the draws have {random_effects} random effects")]
    SchemaMismatch {
        schema: usize,
        random_effects: usize,
    },
    #[error("group-level prior expects dimension {expected}; found {found}")]
    PriorDimensionMismatch { expected: usize, found: usize },
    #[error("group covariance draw at iteration {iteration} is not positive-definite")]
    NonPositiveDefiniteCovariance { iteration: usize },
    #[error("posterior moments for subject {subject} are singular")]
    SingularSubjectMoments { subject: usize },
    #[error(
        "importance mixture fit failed after {attempts} attempts ({components} components, {samples} samples): {last_failure}"
    )]
    MixtureFitFailed {
        attempts: usize,
        components: usize,
        samples: usize,
        last_failure: MixtureFitFailure,
    },
    #[error("subject likelihood returned a non-finite value for subject {subject} at proposal {proposal}")]
    OracleFailure { subject: usize, proposal: usize },
    #[error("a proposal worker panicked")]
    WorkerPanicked,
    #[error("no log weights to aggregate")]
    EmptyWeights,
    #[error("all {proposals} proposal log weights are -inf")]
    NoFiniteWeights { proposals: usize },
    #[error("log weight aggregation produced a non-finite estimate")]
    NonFiniteEstimate,
}

impl Is2Error {
    /// Pipeline stage that raised this error.
    #[must_use]
    pub const fn stage(&self) -> Is2Stage {
        match self {
            Self::InvalidSchedule(_)
            | Self::InvalidParticleCount { .. }
            | Self::InvalidProposalCount { .. }
            | Self::InvalidComponentCount
            | Self::InvalidMixingWeight(_)
            | Self::InvalidBootstrapResamples
            | Self::InvalidFitAttempts
            | Self::InvalidMixtureOptions
            | Self::InvalidPriorConfig
            | Self::InvalidSchema(_)
            | Self::SchemaMismatch { .. }
            | Self::PriorDimensionMismatch { .. } => Is2Stage::Configuration,
            Self::InvalidInput(_)
            | Self::NonPositiveDefiniteCovariance { .. }
            | Self::SingularSubjectMoments { .. } => Is2Stage::Assembly,
            Self::MixtureFitFailed { .. } => Is2Stage::MixtureFit,
            Self::OracleFailure { .. } | Self::WorkerPanicked => Is2Stage::Evaluation,
            Self::EmptyWeights | Self::NoFiniteWeights { .. } | Self::NonFiniteEstimate => {
                Is2Stage::Aggregation
            }
        }
    }
}

/// What to do when the subject likelihood returns a non-finite value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OracleFailurePolicy {
    /// Treat the particle as having weight zero (log weight `-inf`).
    #[default]
    NegativeInfinity,
    /// Abort the whole run with [`Is2Error::OracleFailure`].
    Abort,
}

/// EM controls for fitting the importance mixture.
#[derive(Debug, Clone, Copy)]
pub struct MixtureFitOptions {
    /// Maximum EM iterations per attempt.
    pub max_iterations: usize,
    /// Relative change in log-likelihood treated as convergence.
    pub tolerance: f64,
    /// Ridge added to every component covariance diagonal.
    pub covariance_ridge: f64,
}

impl Default for MixtureFitOptions {
    fn default() -> Self {
        Self {
            max_iterations: 1_000,
            tolerance: 1.0e-6,
            covariance_ridge: 1.0e-9,
        }
    }
}

impl MixtureFitOptions {
    #[must_use]
    pub fn is_valid(self) -> bool {
        self.max_iterations > 0
            && self.tolerance > 0.0
            && self.tolerance.is_finite()
            && self.covariance_ridge >= 0.0
            && self.covariance_ridge.is_finite()
    }
}

/// Full configuration for an IS2 run.
#[derive(Debug, Clone, Copy)]
pub struct Is2Config {
    /// Number of outer (group-level) importance samples.
    pub is_samples: usize,
    /// Particles per subject and proposal.
    pub n_particles: usize,
    /// Importance mixture components.
    pub components: usize,
    /// Weight of the subject-conditional component in the particle mixture.
    pub mixing_weight: f64,
    /// Bootstrap resamples for the standard error.
    pub bootstrap_resamples: usize,
    /// Bound on mixture fit attempts from fresh initialisations.
    pub max_fit_attempts: usize,
    pub mixture: MixtureFitOptions,
    pub schedule: FanOutSchedule,
    pub oracle_failure: OracleFailurePolicy,
}

impl Default for Is2Config {
    fn default() -> Self {
        Self {
            is_samples: 1_000,
            n_particles: 250,
            components: 2,
            mixing_weight: 0.95,
            bootstrap_resamples: 10_000,
            max_fit_attempts: 20,
            mixture: MixtureFitOptions::default(),
            schedule: FanOutSchedule::default(),
            oracle_failure: OracleFailurePolicy::default(),
        }
    }
}

impl Is2Config {
    /// Smallest proposal count for which every component keeps two draws.
    #[must_use]
    pub const fn minimum_proposals(self) -> usize {
        if self.components <= 1 {
            2
        } else {
            2 * self.components
        }
    }

    /// # Errors
    ///
    /// Returns `Is2Error` if any configuration value is invalid.
    pub fn validate(self) -> Result<(), Is2Error> {
        self.schedule.validate()?;
        if self.components == 0 {
            return Err(Is2Error::InvalidComponentCount);
        }
        if self.n_particles < 4 {
            return Err(Is2Error::InvalidParticleCount {
                found: self.n_particles,
            });
        }
        let minimum = self.minimum_proposals();
        if self.is_samples < minimum {
            return Err(Is2Error::InvalidProposalCount {
                found: self.is_samples,
                minimum,
                components: self.components,
            });
        }
        if !(self.mixing_weight > 0.0 && self.mixing_weight < 1.0) {
            return Err(Is2Error::InvalidMixingWeight(self.mixing_weight));
        }
        if self.bootstrap_resamples == 0 {
            return Err(Is2Error::InvalidBootstrapResamples);
        }
        if self.max_fit_attempts == 0 {
            return Err(Is2Error::InvalidFitAttempts);
        }
        if !self.mixture.is_valid() {
            return Err(Is2Error::InvalidMixtureOptions);
        }
        Ok(())
    }
}

/// Run diagnostics collected alongside the estimate.
#[derive(Debug, Clone, Default)]
pub struct Is2Diagnostics {
    pub subjects: usize,
    pub proposals: usize,
    pub particles_per_subject: usize,
    pub components: usize,
    pub workers: usize,
    /// Mixture fit attempts used, including the successful one.
    pub fit_attempts: usize,
    /// Proposals whose log weight is finite.
    pub finite_weights: usize,
    /// Kish effective sample size of the outer importance weights.
    pub effective_sample_size: f64,
    /// Particles whose subject likelihood was non-finite.
    pub non_finite_likelihoods: usize,
    /// Proposals whose group distribution could not be formed.
    pub degenerate_proposals: usize,
}

/// Output report from an IS2 run.
#[derive(Debug, Clone)]
pub struct Is2Report {
    /// Log marginal-likelihood estimate.
    pub log_marginal_likelihood: f64,
    /// Bootstrap standard deviation of the estimate.
    pub standard_error: f64,
    pub bootstrap: BootstrapSummary,
    /// One log weight per proposal, in proposal order.
    pub log_weights: Vec<f64>,
    pub diagnostics: Is2Diagnostics,
}
