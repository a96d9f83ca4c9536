#![forbid(unsafe_code)]

//! # `is2_evidence`
//!
//! Marginal-likelihood estimation for hierarchical Bayesian models by
//! importance sampling squared (IS2).
//!
//! Given posterior draws of subject random effects and of the group-level
//! mean, covariance, and Huang-Wand scale-mixture weights, the estimator fits
//! a Gaussian-mixture importance distribution to the group level, draws
//! proposals from it, estimates each subject's integrated likelihood with
//! conditional particles, and aggregates the resulting importance weights
//! into a log marginal likelihood with a bootstrap standard error.
//!
//! The subject-level likelihood is supplied by the caller as a
//! [`SubjectLikelihood`] (any `Fn(&ParameterView, &D) -> f64 + Sync`), so the
//! crate works with any cognitive or statistical model whose random effects
//! follow a multivariate-normal group distribution.

pub mod inference;
pub mod input;
pub mod is2;
pub mod utils;

pub use inference::{FanOutSchedule, InferenceError};
pub use input::{InputError, PosteriorDraws, SamplerStage, SubjectData};

pub use is2::{
    BayesFactor, BootstrapSummary, EvidenceStrength, GroupDistribution, HierarchicalPrior,
    HuangWandPrior, ImportanceMixture, Is2Config, Is2Diagnostics, Is2Error, Is2Report, Is2Stage,
    MixtureFitFailure, MixtureFitOptions, MultivariateNormal, OracleFailurePolicy,
    ParameterSchema, ParameterView, SubjectLikelihood, compare_estimates,
    estimate_marginal_likelihood, render_comparison_table, render_report_table, rewind, unwind,
};
