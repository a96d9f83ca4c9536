use faer::Mat;
use is2_evidence::utils::{sample_inverse_gamma, sample_standard_normal, usize_to_f64};
use is2_evidence::{
    FanOutSchedule, HuangWandPrior, Is2Config, ParameterSchema, ParameterView, PosteriorDraws,
    SamplerStage, SubjectData, compare_estimates, estimate_marginal_likelihood,
    render_comparison_table,
};
use rand::SeedableRng;
use rand::rngs::StdRng;

const SUBJECTS: usize = 12;
const PER_SUBJECT: usize = 8;
const BURN_IN: usize = 500;
const SAMPLES: usize = 3_000;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = StdRng::seed_from_u64(2_026);
    let (ids, observations) = simulate(&mut rng);
    let data = SubjectData::new(ids.clone(), observations.clone())?;
    let draws = gibbs(&ids, &observations, &mut rng);

    let schema = ParameterSchema::new(["mean"])?;
    let prior = HuangWandPrior::standard(1)?;
    let config = Is2Config {
        is_samples: 1_000,
        n_particles: 200,
        schedule: FanOutSchedule {
            seed: 7,
            ..FanOutSchedule::default()
        },
        ..Is2Config::default()
    };

    let unit_noise = |parameters: &ParameterView<'_>, ys: &Vec<f64>| gaussian(parameters, ys, 1.0);
    let wide_noise = |parameters: &ParameterView<'_>, ys: &Vec<f64>| gaussian(parameters, ys, 2.0);

    let unit = estimate_marginal_likelihood(&draws, &data, &schema, &unit_noise, &prior, &config)?;
    let wide = estimate_marginal_likelihood(&draws, &data, &schema, &wide_noise, &prior, &config)?;

    println!(
        "{}",
        render_comparison_table(&[("noise sd 1", &unit), ("noise sd 2", &wide)])
    );
    let factor = compare_estimates(&unit, &wide);
    println!(
        "ln BF = {:.2} ± {:.2} ({:?})",
        factor.log_bayes_factor,
        factor.standard_error,
        factor.evidence()
    );
    Ok(())
}

fn gaussian(parameters: &ParameterView<'_>, ys: &[f64], sd: f64) -> f64 {
    let mean = parameters.get("mean").unwrap_or(f64::NAN);
    let variance = sd * sd;
    ys.iter()
        .map(|y| -0.5 * ((std::f64::consts::TAU * variance).ln() + (y - mean).powi(2) / variance))
        .sum()
}

fn simulate(rng: &mut StdRng) -> (Vec<u64>, Vec<Vec<f64>>) {
    let ids = (1..).take(SUBJECTS).collect();
    let observations = (0..SUBJECTS)
        .map(|_| {
            let mean = 1.2f64.mul_add(sample_standard_normal(rng), 0.5);
            (0..PER_SUBJECT)
                .map(|_| mean + sample_standard_normal(rng))
                .collect()
        })
        .collect();
    (ids, observations)
}

/// Gibbs sampler for `y ~ N(mean_j, 1)`, `mean_j ~ N(mu, sigma^2)` under the
/// one-dimensional Huang-Wand prior.
fn gibbs(ids: &[u64], observations: &[Vec<f64>], rng: &mut StdRng) -> PosteriorDraws {
    let total = BURN_IN + SAMPLES;
    let counts: Vec<f64> = observations.iter().map(|ys| usize_to_f64(ys.len())).collect();
    let means: Vec<f64> = observations
        .iter()
        .map(|ys| ys.iter().sum::<f64>() / usize_to_f64(ys.len()))
        .collect();

    let mut effects = vec![Mat::<f64>::zeros(1, total); SUBJECTS];
    let mut group_mean = Mat::<f64>::zeros(1, total);
    let mut covariance = Vec::with_capacity(total);
    let mut scale_mixture = Mat::<f64>::zeros(1, total);

    let mut alpha = means.clone();
    let (mut mu, mut sigma_sq, mut a) = (0.0, 1.0, 1.0);
    for it in 0..total {
        for j in 0..SUBJECTS {
            let precision = counts[j] + 1.0 / sigma_sq;
            let centre = counts[j].mul_add(means[j], mu / sigma_sq) / precision;
            alpha[j] = centre + sample_standard_normal(rng) / precision.sqrt();
            effects[j][(0, it)] = alpha[j];
        }
        let precision = 1.0 + usize_to_f64(SUBJECTS) / sigma_sq;
        mu = (alpha.iter().sum::<f64>() / sigma_sq) / precision
            + sample_standard_normal(rng) / precision.sqrt();
        let spread = alpha.iter().map(|value| (value - mu).powi(2)).sum::<f64>();
        sigma_sq = sample_inverse_gamma(
            rng,
            0.5 * (2.0 + usize_to_f64(SUBJECTS)),
            0.5 * (4.0 / a + spread),
        );
        a = sample_inverse_gamma(rng, 1.5, 2.0 / sigma_sq + 1.0);

        group_mean[(0, it)] = mu;
        covariance.push(Mat::from_fn(1, 1, |_, _| sigma_sq));
        scale_mixture[(0, it)] = a;
    }

    let stages = (0..total)
        .map(|it| {
            if it < BURN_IN {
                SamplerStage::Burn
            } else {
                SamplerStage::Sample
            }
        })
        .collect();
    PosteriorDraws::new(ids.to_vec(), effects, group_mean, covariance, scale_mixture)
        .with_stages(stages)
}
