//! # IS2 marginal-likelihood estimation
//!
//! Importance sampling squared for hierarchical models: an outer importance
//! sampler over group-level parameters, fitted to posterior draws, wrapped
//! around an inner particle estimate of each subject's integrated likelihood.
//!
//! The pipeline runs
//! [`assemble`](assemble::assemble) →
//! [`fit_importance_mixture`](mixture::fit_importance_mixture) →
//! [`generate_proposals`](proposals::generate_proposals) →
//! per-proposal [`WeightEngine`](likelihood::WeightEngine) and
//! [`combine_log_weight`](weights::combine_log_weight) →
//! [`aggregate_log_weights`](aggregate::aggregate_log_weights) with a bootstrap.
//! [`estimate_marginal_likelihood`](estimator::estimate_marginal_likelihood)
//! drives the whole run.

pub mod aggregate;
pub mod assemble;
pub mod estimator;
pub mod group;
pub mod likelihood;
pub mod mixture;
pub mod normal;
pub mod particles;
pub mod priors;
pub mod proposals;
pub mod report;
pub mod types;
pub mod unwind;
pub mod weights;

pub use aggregate::{
    BootstrapSummary, aggregate_log_weights, bootstrap_log_weights, effective_sample_size,
};
pub use assemble::{
    AssembledPosterior, AugmentedSample, ConditionalNormal, SubjectMoments, assemble,
};
pub use estimator::estimate_marginal_likelihood;
pub use group::{AugmentedLayout, GroupDistribution, HierarchicalPrior};
pub use likelihood::{
    ParameterSchema, ParameterView, ProposalLikelihood, SubjectLikelihood, WeightEngine,
};
pub use mixture::{ImportanceMixture, MixtureComponent, MixtureFit, fit_importance_mixture};
pub use normal::MultivariateNormal;
pub use particles::{Particles, generate_particles};
pub use priors::HuangWandPrior;
pub use proposals::{clamped_binomial_split, generate_proposals, split_counts};
pub use report::{
    BayesFactor, EvidenceStrength, compare_estimates, render_comparison_table,
    render_report_table,
};
pub use types::{
    Is2Config, Is2Diagnostics, Is2Error, Is2Report, Is2Stage, MixtureFitFailure,
    MixtureFitOptions, OracleFailurePolicy,
};
pub use unwind::{rewind, unwind, unwound_dimension};
pub use weights::combine_log_weight;
