//! End-to-end IS2 estimator: assembly, mixture fit, proposal fan-out,
//! weighting, and aggregation.

use super::aggregate::{
    aggregate_log_weights, bootstrap_log_weights, effective_sample_size,
};
use super::assemble::assemble;
use super::group::HierarchicalPrior;
use super::likelihood::{ParameterSchema, SubjectLikelihood, WeightEngine};
use super::mixture::{ImportanceMixture, fit_importance_mixture};
use super::proposals::generate_proposals;
use super::types::{Is2Config, Is2Diagnostics, Is2Error, Is2Report};
use super::weights::combine_log_weight;
use crate::inference::{FanOutSchedule, chunk_len};
use crate::input::{PosteriorDraws, SubjectData};

/// Tag for the bootstrap random stream.
const BOOTSTRAP_STREAM: u64 = 0xB007;

/// Result of evaluating one proposal.
#[derive(Debug, Clone, Copy)]
struct ProposalOutcome {
    log_weight: f64,
    non_finite: usize,
    degenerate: bool,
}

impl Default for ProposalOutcome {
    fn default() -> Self {
        Self {
            log_weight: f64::NEG_INFINITY,
            non_finite: 0,
            degenerate: false,
        }
    }
}

/// Estimate the log marginal likelihood of a hierarchical model with IS2.
///
/// `draws` are the posterior draws of the fitted model (stage-labelled draws
/// are reduced to their sample stage), `data` holds one slice per subject in
/// `draws.subject_ids`, `schema` names the random effects in particle order,
/// and `likelihood` evaluates one subject's log-likelihood. `prior` is the
/// group-level prior the posterior was sampled under.
///
/// # Errors
///
/// Returns `Is2Error` for invalid configuration, inconsistent inputs, an
/// exhausted mixture fit, an aborting oracle failure, a panicked worker, or a
/// non-finite aggregate. [`Is2Error::stage`] reports where the run stopped.
///
/// # Example
///
/// ```no_run
/// use is2_evidence::{
///     HuangWandPrior, Is2Config, ParameterSchema, ParameterView, PosteriorDraws, SubjectData,
///     estimate_marginal_likelihood,
/// };
///
/// # fn run(draws: &PosteriorDraws, data: &SubjectData<Vec<f64>>) -> Result<(), is2_evidence::Is2Error> {
/// let schema = ParameterSchema::new(["mean"])?;
/// let prior = HuangWandPrior::standard(1)?;
/// let likelihood = |parameters: &ParameterView<'_>, ys: &Vec<f64>| {
///     let mean = parameters.get("mean").unwrap_or(f64::NAN);
///     ys.iter()
///         .map(|y| -0.5 * (std::f64::consts::TAU.ln() + (y - mean).powi(2)))
///         .sum::<f64>()
/// };
/// let report = estimate_marginal_likelihood(
///     draws,
///     data,
///     &schema,
///     &likelihood,
///     &prior,
///     &Is2Config::default(),
/// )?;
/// println!("log ML = {:.3} ({:.3})", report.log_marginal_likelihood, report.standard_error);
/// # Ok(())
/// # }
/// ```
pub fn estimate_marginal_likelihood<D, L, P>(
    draws: &PosteriorDraws,
    data: &SubjectData<D>,
    schema: &ParameterSchema,
    likelihood: &L,
    prior: &P,
    config: &Is2Config,
) -> Result<Is2Report, Is2Error>
where
    D: Sync,
    L: SubjectLikelihood<D>,
    P: HierarchicalPrior,
{
    config.validate()?;
    let draws = draws.sample_stage()?;
    let n_re = draws.n_random_effects();
    if schema.len() != n_re {
        return Err(Is2Error::SchemaMismatch {
            schema: schema.len(),
            random_effects: n_re,
        });
    }
    if prior.n_random_effects() != n_re {
        return Err(Is2Error::PriorDimensionMismatch {
            expected: prior.n_random_effects(),
            found: n_re,
        });
    }
    let slices = data.ordered_by(&draws.subject_ids)?;
    log::info!(
        "IS2 run: {} subjects, {n_re} random effects, {} iterations, {} proposals x {} particles",
        draws.n_subjects(),
        draws.n_iterations(),
        config.is_samples,
        config.n_particles
    );

    let assembled = assemble(&draws)?;

    let schedule = config.schedule;
    let mut rng = schedule.root_rng();
    let fit = fit_importance_mixture(
        assembled.group.samples(),
        config.components,
        config.mixture,
        config.max_fit_attempts,
        &mut rng,
    )?;
    log::debug!(
        "importance mixture weights {:?} after {} attempt(s)",
        fit.mixture.weights(),
        fit.attempts
    );

    let proposals = generate_proposals(&fit.mixture, config.is_samples, &mut rng);
    let engine = WeightEngine {
        schema,
        likelihood,
        conditionals: &assembled.conditionals,
        data: &slices,
        n_particles: config.n_particles,
        mixing_weight: config.mixing_weight,
        oracle_failure: config.oracle_failure,
    };
    let workers = schedule.resolve_workers(proposals.len());
    let outcomes = evaluate_proposals(&proposals, &engine, prior, &fit.mixture, schedule, workers)?;

    let log_weights: Vec<f64> = outcomes.iter().map(|outcome| outcome.log_weight).collect();
    let degenerate_proposals = outcomes.iter().filter(|outcome| outcome.degenerate).count();
    let non_finite_likelihoods = outcomes.iter().map(|outcome| outcome.non_finite).sum();
    if degenerate_proposals > 0 {
        log::warn!("{degenerate_proposals} proposals had no usable group distribution");
    }
    if non_finite_likelihoods > 0 {
        log::warn!(
            "{non_finite_likelihoods} particle likelihoods were non-finite and given zero weight"
        );
    }

    let log_marginal_likelihood = aggregate_log_weights(&log_weights)?;
    let mut bootstrap_rng = schedule.auxiliary_rng(BOOTSTRAP_STREAM);
    let bootstrap =
        bootstrap_log_weights(&log_weights, config.bootstrap_resamples, &mut bootstrap_rng)?;
    log::info!(
        "IS2 log marginal likelihood {log_marginal_likelihood:.4} (bootstrap SE {:.4})",
        bootstrap.std_error
    );

    let diagnostics = Is2Diagnostics {
        subjects: assembled.n_subjects(),
        proposals: log_weights.len(),
        particles_per_subject: config.n_particles,
        components: fit.mixture.n_components(),
        workers,
        fit_attempts: fit.attempts,
        finite_weights: log_weights.iter().filter(|weight| weight.is_finite()).count(),
        effective_sample_size: effective_sample_size(&log_weights),
        non_finite_likelihoods,
        degenerate_proposals,
    };
    Ok(Is2Report {
        log_marginal_likelihood,
        standard_error: bootstrap.std_error,
        bootstrap,
        log_weights,
        diagnostics,
    })
}

/// Evaluate every proposal on `workers` scoped threads, each owning a
/// contiguous block of output slots.
fn evaluate_proposals<D, L, P>(
    proposals: &[Vec<f64>],
    engine: &WeightEngine<'_, D, L>,
    prior: &P,
    mixture: &ImportanceMixture,
    schedule: FanOutSchedule,
    workers: usize,
) -> Result<Vec<ProposalOutcome>, Is2Error>
where
    D: Sync,
    L: SubjectLikelihood<D>,
    P: HierarchicalPrior,
{
    let mut outcomes = vec![ProposalOutcome::default(); proposals.len()];
    let chunk = chunk_len(proposals.len(), workers);
    log::debug!(
        "evaluating {} proposals on {workers} worker(s), {chunk} per worker",
        proposals.len()
    );

    std::thread::scope(|scope| {
        let handles: Vec<_> = outcomes
            .chunks_mut(chunk)
            .zip(proposals.chunks(chunk))
            .enumerate()
            .map(|(block, (slots, block_proposals))| {
                scope.spawn(move || -> Result<(), Is2Error> {
                    for (offset, (slot, proposal)) in
                        slots.iter_mut().zip(block_proposals).enumerate()
                    {
                        let index = block * chunk + offset;
                        *slot = evaluate_proposal(index, proposal, engine, prior, mixture, schedule)?;
                    }
                    Ok(())
                })
            })
            .collect();
        let joined: Vec<_> = handles.into_iter().map(|handle| handle.join()).collect();
        joined
            .into_iter()
            .try_for_each(|result| result.map_err(|_| Is2Error::WorkerPanicked)?)
    })?;

    Ok(outcomes)
}

fn evaluate_proposal<D, L, P>(
    index: usize,
    proposal: &[f64],
    engine: &WeightEngine<'_, D, L>,
    prior: &P,
    mixture: &ImportanceMixture,
    schedule: FanOutSchedule,
) -> Result<ProposalOutcome, Is2Error>
where
    L: SubjectLikelihood<D>,
    P: HierarchicalPrior,
{
    let mut rng = schedule.unit_rng(index);
    let degenerate = ProposalOutcome {
        degenerate: true,
        ..ProposalOutcome::default()
    };
    let Some(group) = prior.group_distribution(proposal) else {
        log::warn!("proposal {index} does not define a usable group distribution");
        return Ok(degenerate);
    };
    let Some(likelihood) = engine.proposal_log_likelihood(index, proposal, &group, &mut rng)? else {
        log::warn!("proposal {index} gives a non-finite subject conditional");
        return Ok(degenerate);
    };
    let log_weight = combine_log_weight(
        likelihood.log_likelihood,
        prior.log_prior(proposal),
        mixture.log_density(proposal),
    );
    Ok(ProposalOutcome {
        log_weight,
        non_finite: likelihood.non_finite,
        degenerate: false,
    })
}
