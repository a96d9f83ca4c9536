//! Gaussian-mixture importance distribution and its EM fitter.

use faer::Mat;
use rand::RngExt;
use rand::rngs::StdRng;

use super::normal::MultivariateNormal;
use super::types::{Is2Error, MixtureFitFailure, MixtureFitOptions};
use crate::utils::{
    column_means, log_sum_exp, matrix_is_finite, sample_covariance, symmetrize, usize_to_f64,
};

/// Lloyd iterations per k-means run.
const KMEANS_ITERATIONS: usize = 50;
/// Independent k-means runs per EM attempt.
const KMEANS_RESTARTS: usize = 4;

/// One weighted component of an [`ImportanceMixture`].
#[derive(Debug, Clone)]
pub struct MixtureComponent {
    pub weight: f64,
    pub distribution: MultivariateNormal,
}

/// K-component Gaussian mixture over the group-level augmented space.
///
/// Components are ordered by decreasing weight and weights sum to one.
#[derive(Debug, Clone)]
pub struct ImportanceMixture {
    components: Vec<MixtureComponent>,
    log_weights: Vec<f64>,
}

impl ImportanceMixture {
    /// Build a mixture, sorting components by weight and renormalising.
    ///
    /// Returns `None` if there are no components, any weight is not positive
    /// and finite, or the component dimensions differ.
    #[must_use]
    pub fn new(mut components: Vec<MixtureComponent>) -> Option<Self> {
        let first = components.first()?;
        let dimension = first.distribution.dimension();
        if components.iter().any(|component| {
            !(component.weight > 0.0 && component.weight.is_finite())
                || component.distribution.dimension() != dimension
        }) {
            return None;
        }
        components.sort_by(|a, b| b.weight.total_cmp(&a.weight));
        let total = components.iter().map(|component| component.weight).sum::<f64>();
        for component in &mut components {
            component.weight /= total;
        }
        let log_weights = components
            .iter()
            .map(|component| component.weight.ln())
            .collect();
        Some(Self {
            components,
            log_weights,
        })
    }

    #[must_use]
    pub fn components(&self) -> &[MixtureComponent] {
        &self.components
    }

    #[must_use]
    pub fn n_components(&self) -> usize {
        self.components.len()
    }

    #[must_use]
    pub fn dimension(&self) -> usize {
        self.components[0].distribution.dimension()
    }

    #[must_use]
    pub fn weights(&self) -> Vec<f64> {
        self.components
            .iter()
            .map(|component| component.weight)
            .collect()
    }

    /// `log sum_k w_k N(point | m_k, S_k)`.
    #[must_use]
    pub fn log_density(&self, point: &[f64]) -> f64 {
        let terms: Vec<f64> = self
            .components
            .iter()
            .zip(&self.log_weights)
            .map(|(component, log_weight)| log_weight + component.distribution.log_density(point))
            .collect();
        log_sum_exp(&terms)
    }

    /// One draw with the component chosen by weight.
    pub fn sample(&self, rng: &mut StdRng) -> Vec<f64> {
        let u = rng.random::<f64>();
        let mut cumulative = 0.0;
        for component in &self.components {
            cumulative += component.weight;
            if u < cumulative {
                return component.distribution.sample(rng);
            }
        }
        self.components[self.components.len() - 1]
            .distribution
            .sample(rng)
    }
}

/// A fitted mixture and the number of attempts it took.
#[derive(Debug, Clone)]
pub struct MixtureFit {
    pub mixture: ImportanceMixture,
    pub attempts: usize,
    pub iterations: usize,
}

/// Fit a `components`-component mixture to the rows of `samples`, retrying
/// from fresh initialisations up to `max_attempts` times.
///
/// # Errors
///
/// Returns `Is2Error::MixtureFitFailed` carrying the last failure once every
/// attempt has failed.
pub fn fit_importance_mixture(
    samples: &Mat<f64>,
    components: usize,
    options: MixtureFitOptions,
    max_attempts: usize,
    rng: &mut StdRng,
) -> Result<MixtureFit, Is2Error> {
    let mut last_failure = MixtureFitFailure::NonConvergence { iterations: 0 };
    for attempt in 1..=max_attempts {
        match fit_mixture_once(samples, components, options, rng) {
            Ok((mixture, iterations)) => {
                log::debug!(
                    "mixture fit converged on attempt {attempt} after {iterations} EM iterations"
                );
                return Ok(MixtureFit {
                    mixture,
                    attempts: attempt,
                    iterations,
                });
            }
            Err(failure) => {
                log::warn!("mixture fit attempt {attempt}/{max_attempts} failed: {failure}");
                last_failure = failure;
                if matches!(failure, MixtureFitFailure::TooFewSamples { .. }) {
                    return Err(Is2Error::MixtureFitFailed {
                        attempts: attempt,
                        components,
                        samples: samples.nrows(),
                        last_failure,
                    });
                }
            }
        }
    }
    Err(Is2Error::MixtureFitFailed {
        attempts: max_attempts,
        components,
        samples: samples.nrows(),
        last_failure,
    })
}

/// Minimum rows for a K-component fit in `dimension` coordinates.
#[must_use]
pub const fn minimum_fit_samples(components: usize, dimension: usize) -> usize {
    components * (dimension + 1)
}

/// One EM run from a random initialisation.
///
/// The rows are first partitioned by k-means++ in units of the pooled
/// standard deviations. EM then starts from the one-hot responsibilities of
/// that partition.
///
/// # Errors
///
/// Returns the `MixtureFitFailure` that stopped this attempt.
pub fn fit_mixture_once(
    samples: &Mat<f64>,
    components: usize,
    options: MixtureFitOptions,
    rng: &mut StdRng,
) -> Result<(ImportanceMixture, usize), MixtureFitFailure> {
    let n = samples.nrows();
    let dim = samples.ncols();
    let minimum = minimum_fit_samples(components, dim);
    if components == 0 || n < minimum {
        return Err(MixtureFitFailure::TooFewSamples {
            samples: n,
            minimum,
        });
    }

    let pooled_mean = column_means(samples);
    let pooled = sample_covariance(samples, &pooled_mean);
    let scales: Vec<f64> = (0..dim)
        .map(|col| {
            let variance = pooled[(col, col)];
            if variance > 0.0 && variance.is_finite() {
                variance.recip()
            } else {
                1.0
            }
        })
        .collect();

    let mut responsibilities = Mat::<f64>::zeros(n, components);
    for (row, label) in kmeans_labels(samples, components, &scales, rng)
        .into_iter()
        .enumerate()
    {
        responsibilities[(row, label)] = 1.0;
    }
    let mut params = maximization(samples, &responsibilities, options.covariance_ridge)?;

    let mut previous = f64::NEG_INFINITY;
    for iteration in 0..options.max_iterations {
        let log_likelihood = expectation(samples, &params, &mut responsibilities);
        if !log_likelihood.is_finite() {
            return Err(MixtureFitFailure::NonFiniteLogLikelihood);
        }
        if iteration > 0
            && (log_likelihood - previous).abs() < options.tolerance * (1.0 + log_likelihood.abs())
        {
            let mixture = ImportanceMixture::new(params)
                .ok_or(MixtureFitFailure::NonFiniteLogLikelihood)?;
            return Ok((mixture, iteration));
        }
        previous = log_likelihood;
        params = maximization(samples, &responsibilities, options.covariance_ridge)?;
    }

    Err(MixtureFitFailure::NonConvergence {
        iterations: options.max_iterations,
    })
}

/// Fill `responsibilities` and return the mixture log-likelihood.
fn expectation(
    samples: &Mat<f64>,
    params: &[MixtureComponent],
    responsibilities: &mut Mat<f64>,
) -> f64 {
    let dim = samples.ncols();
    let mut row_values = vec![0.0; dim];
    let mut terms = vec![0.0; params.len()];
    let mut total = 0.0;
    for row in 0..samples.nrows() {
        for (col, value) in row_values.iter_mut().enumerate() {
            *value = samples[(row, col)];
        }
        for (term, component) in terms.iter_mut().zip(params) {
            *term = component.weight.ln() + component.distribution.log_density(&row_values);
        }
        let normalizer = log_sum_exp(&terms);
        for (k, term) in terms.iter().enumerate() {
            responsibilities[(row, k)] = (term - normalizer).exp();
        }
        total += normalizer;
    }
    total
}

fn maximization(
    samples: &Mat<f64>,
    responsibilities: &Mat<f64>,
    ridge: f64,
) -> Result<Vec<MixtureComponent>, MixtureFitFailure> {
    let n = samples.nrows();
    let dim = samples.ncols();
    let n_f = usize_to_f64(n);
    (0..responsibilities.ncols())
        .map(|k| {
            let mass = (0..n).map(|row| responsibilities[(row, k)]).sum::<f64>();
            if mass.is_nan() || mass <= 1.0 {
                return Err(MixtureFitFailure::CollapsedComponent { component: k });
            }
            let mean: Vec<f64> = (0..dim)
                .map(|col| {
                    (0..n)
                        .map(|row| responsibilities[(row, k)] * samples[(row, col)])
                        .sum::<f64>()
                        / mass
                })
                .collect();
            let mut covariance = Mat::<f64>::zeros(dim, dim);
            for row in 0..n {
                let r = responsibilities[(row, k)];
                for i in 0..dim {
                    let centered_i = samples[(row, i)] - mean[i];
                    for j in 0..=i {
                        covariance[(i, j)] += r * centered_i * (samples[(row, j)] - mean[j]);
                    }
                }
            }
            for i in 0..dim {
                for j in 0..=i {
                    covariance[(i, j)] /= mass;
                    covariance[(j, i)] = covariance[(i, j)];
                }
            }
            symmetrize(&mut covariance);
            add_ridge(&mut covariance, ridge);
            if !matrix_is_finite(&covariance) {
                return Err(MixtureFitFailure::SingularCovariance { component: k });
            }
            MultivariateNormal::new(mean, &covariance)
                .map(|distribution| MixtureComponent {
                    weight: mass / n_f,
                    distribution,
                })
                .ok_or(MixtureFitFailure::SingularCovariance { component: k })
        })
        .collect()
}

fn add_ridge(matrix: &mut Mat<f64>, ridge: f64) {
    for diag in 0..matrix.nrows() {
        matrix[(diag, diag)] += ridge;
    }
}

/// Best of [`KMEANS_RESTARTS`] k-means runs on the rows of `samples`, by
/// within-cluster sum of squares. Squared distances weight column `c` by
/// `scales[c]`.
fn kmeans_labels(
    samples: &Mat<f64>,
    clusters: usize,
    scales: &[f64],
    rng: &mut StdRng,
) -> Vec<usize> {
    let mut best: Option<(Vec<usize>, f64)> = None;
    for _ in 0..KMEANS_RESTARTS {
        let (labels, inertia) = lloyd(samples, clusters, scales, rng);
        if best.as_ref().is_none_or(|(_, lowest)| inertia < *lowest) {
            best = Some((labels, inertia));
        }
    }
    best.map_or_else(|| vec![0; samples.nrows()], |(labels, _)| labels)
}

fn scaled_distance(samples: &Mat<f64>, row: usize, centroid: &[f64], scales: &[f64]) -> f64 {
    centroid
        .iter()
        .zip(scales)
        .enumerate()
        .map(|(col, (centre, scale))| scale * (samples[(row, col)] - centre).powi(2))
        .sum()
}

/// k-means++ seeding: the first centroid is a uniform row, each further one a
/// row drawn with probability proportional to its squared distance from the
/// nearest centroid so far.
fn seed_centroids(
    samples: &Mat<f64>,
    clusters: usize,
    scales: &[f64],
    rng: &mut StdRng,
) -> Vec<Vec<f64>> {
    let n = samples.nrows();
    let row_of =
        |row: usize| -> Vec<f64> { (0..samples.ncols()).map(|col| samples[(row, col)]).collect() };
    let mut centroids = vec![row_of(rng.random_range(0..n))];
    let mut nearest: Vec<f64> = (0..n)
        .map(|row| scaled_distance(samples, row, &centroids[0], scales))
        .collect();
    while centroids.len() < clusters {
        let total = nearest.iter().sum::<f64>();
        let pick = if total > 0.0 && total.is_finite() {
            let target = rng.random::<f64>() * total;
            let mut cumulative = 0.0;
            nearest
                .iter()
                .position(|distance| {
                    cumulative += distance;
                    target < cumulative
                })
                .unwrap_or(n - 1)
        } else {
            rng.random_range(0..n)
        };
        let centroid = row_of(pick);
        for (row, distance) in nearest.iter_mut().enumerate() {
            *distance = distance.min(scaled_distance(samples, row, &centroid, scales));
        }
        centroids.push(centroid);
    }
    centroids
}

/// Lloyd iterations from k-means++ seeds. An emptied cluster keeps its
/// previous centroid. Returns the labels and their inertia.
fn lloyd(
    samples: &Mat<f64>,
    clusters: usize,
    scales: &[f64],
    rng: &mut StdRng,
) -> (Vec<usize>, f64) {
    let n = samples.nrows();
    let dim = samples.ncols();
    let mut centroids = seed_centroids(samples, clusters, scales, rng);
    let nearest = |row: usize, centroids: &[Vec<f64>]| -> usize {
        centroids
            .iter()
            .map(|centroid| scaled_distance(samples, row, centroid, scales))
            .enumerate()
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map_or(0, |(k, _)| k)
    };

    let mut labels = vec![usize::MAX; n];
    for _ in 0..KMEANS_ITERATIONS {
        let mut changed = false;
        for (row, label) in labels.iter_mut().enumerate() {
            let closest = nearest(row, &centroids);
            if closest != *label {
                *label = closest;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        for (k, centroid) in centroids.iter_mut().enumerate() {
            let mut sum = vec![0.0; dim];
            let mut count = 0usize;
            for (row, _) in labels.iter().enumerate().filter(|(_, label)| **label == k) {
                for (col, total) in sum.iter_mut().enumerate() {
                    *total += samples[(row, col)];
                }
                count += 1;
            }
            if count > 0 {
                let count_f = usize_to_f64(count);
                for (centre, total) in centroid.iter_mut().zip(sum) {
                    *centre = total / count_f;
                }
            }
        }
    }
    let inertia = labels
        .iter()
        .enumerate()
        .map(|(row, label)| scaled_distance(samples, row, &centroids[*label], scales))
        .sum::<f64>();
    (labels, inertia)
}
