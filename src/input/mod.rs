//! # Estimator inputs
//!
//! Light-weight containers for the posterior draws produced by an upstream
//! hierarchical sampler and for the per-subject data slices consumed by the
//! subject-level likelihood.
//!
//! # Examples
//!
//! ```
//! use faer::Mat;
//! use is2_evidence::PosteriorDraws;
//!
//! let iterations = 4;
//! let draws = PosteriorDraws::new(
//!     vec![10, 11],
//!     vec![Mat::from_fn(1, iterations, |_, _| 0.5); 2],
//!     Mat::from_fn(1, iterations, |_, _| 0.0),
//!     vec![Mat::from_fn(1, 1, |_, _| 1.0); iterations],
//!     Mat::from_fn(1, iterations, |_, _| 1.0),
//! );
//!
//! assert!(draws.validate().is_ok());
//! assert_eq!(draws.n_iterations(), 4);
//! ```

use faer::Mat;
use thiserror::Error;

pub mod subjects;

pub use subjects::SubjectData;

/// Errors returned when validating estimator inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("posterior draws must contain at least one subject")]
    EmptySubjects,
    #[error("posterior draws must contain at least one random effect")]
    EmptyRandomEffects,
    #[error("posterior draws must contain at least {minimum} iterations; found {found}")]
    TooFewIterations { minimum: usize, found: usize },
    #[error("{block} has {found} iterations but the group mean has {expected}")]
    IterationMismatch {
        block: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("{block} has dimension {found}; expected {expected}")]
    DimensionMismatch {
        block: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("subject ids ({ids}) must match the number of subject draw blocks ({blocks})")]
    SubjectIdCountMismatch { ids: usize, blocks: usize },
    #[error("subject id {0} appears more than once")]
    DuplicateSubjectId(u64),
    #[error("{block} contains non-finite values")]
    NonFiniteDraws { block: &'static str },
    #[error("scale-mixture draws must be strictly positive")]
    NonPositiveScaleMixture,
    #[error("stage labels ({labels}) must match the iteration count ({iterations})")]
    StageLabelMismatch { labels: usize, iterations: usize },
    #[error("posterior draws contain no sample-stage iterations")]
    NoSampleStage,
    #[error("subject ids ({ids}) must match the number of data rows ({rows})")]
    RowCountMismatch { ids: usize, rows: usize },
    #[error("no data rows were supplied for subject {0}")]
    MissingSubjectData(u64),
    #[error("data was supplied for subject {0}, which has no posterior draws")]
    UnknownSubject(u64),
}

/// Stage of the upstream sampler that produced an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerStage {
    Burn,
    Adapt,
    Sample,
}

/// Posterior draws from a hierarchical sampler with a multivariate-normal
/// group distribution and a Huang-Wand covariance prior.
///
/// Every block is indexed by iteration along its columns (or, for the group
/// covariance, by position in the vector).
#[derive(Debug, Clone)]
pub struct PosteriorDraws {
    /// Subject identifiers, one per entry of `random_effects`.
    pub subject_ids: Vec<u64>,
    /// Per subject: `n_random_effects x iterations`.
    pub random_effects: Vec<Mat<f64>>,
    /// `n_random_effects x iterations`.
    pub group_mean: Mat<f64>,
    /// Per iteration: `n_random_effects x n_random_effects`.
    pub group_covariance: Vec<Mat<f64>>,
    /// Huang-Wand scale-mixture weights, `n_random_effects x iterations`.
    pub scale_mixture: Mat<f64>,
    /// Optional sampler stage for each iteration.
    pub stages: Option<Vec<SamplerStage>>,
}

impl PosteriorDraws {
    #[must_use]
    pub const fn new(
        subject_ids: Vec<u64>,
        random_effects: Vec<Mat<f64>>,
        group_mean: Mat<f64>,
        group_covariance: Vec<Mat<f64>>,
        scale_mixture: Mat<f64>,
    ) -> Self {
        Self {
            subject_ids,
            random_effects,
            group_mean,
            group_covariance,
            scale_mixture,
            stages: None,
        }
    }

    #[must_use]
    pub fn with_stages(self, stages: Vec<SamplerStage>) -> Self {
        Self {
            stages: Some(stages),
            ..self
        }
    }

    #[must_use]
    pub const fn n_subjects(&self) -> usize {
        self.random_effects.len()
    }

    #[must_use]
    pub fn n_random_effects(&self) -> usize {
        self.group_mean.nrows()
    }

    #[must_use]
    pub fn n_iterations(&self) -> usize {
        self.group_mean.ncols()
    }

    /// Check that all blocks agree on subjects, dimensions, and iterations.
    ///
    /// # Errors
    ///
    /// Returns `InputError` describing the first inconsistent block.
    pub fn validate(&self) -> Result<(), InputError> {
        let n_re = self.n_random_effects();
        let iterations = self.n_iterations();

        if self.random_effects.is_empty() {
            return Err(InputError::EmptySubjects);
        }
        if n_re == 0 {
            return Err(InputError::EmptyRandomEffects);
        }
        if iterations < 2 {
            return Err(InputError::TooFewIterations {
                minimum: 2,
                found: iterations,
            });
        }
        if self.subject_ids.len() != self.random_effects.len() {
            return Err(InputError::SubjectIdCountMismatch {
                ids: self.subject_ids.len(),
                blocks: self.random_effects.len(),
            });
        }
        let mut seen = std::collections::BTreeSet::new();
        for id in &self.subject_ids {
            if !seen.insert(*id) {
                return Err(InputError::DuplicateSubjectId(*id));
            }
        }

        for block in &self.random_effects {
            check_block("subject random effects", block, n_re, iterations)?;
        }
        check_block("scale-mixture draws", &self.scale_mixture, n_re, iterations)?;
        if self.group_covariance.len() != iterations {
            return Err(InputError::IterationMismatch {
                block: "group covariance",
                expected: iterations,
                found: self.group_covariance.len(),
            });
        }
        for covariance in &self.group_covariance {
            if covariance.nrows() != n_re || covariance.ncols() != n_re {
                return Err(InputError::DimensionMismatch {
                    block: "group covariance",
                    expected: n_re,
                    found: covariance.nrows().max(covariance.ncols()),
                });
            }
            if !crate::utils::matrix_is_finite(covariance) {
                return Err(InputError::NonFiniteDraws {
                    block: "group covariance",
                });
            }
        }
        if !crate::utils::matrix_is_finite(&self.group_mean) {
            return Err(InputError::NonFiniteDraws { block: "group mean" });
        }
        for iteration in 0..iterations {
            for row in 0..n_re {
                if self.scale_mixture[(row, iteration)] <= 0.0 {
                    return Err(InputError::NonPositiveScaleMixture);
                }
            }
        }
        if let Some(stages) = &self.stages
            && stages.len() != iterations
        {
            return Err(InputError::StageLabelMismatch {
                labels: stages.len(),
                iterations,
            });
        }
        Ok(())
    }

    /// Keep only the iterations labelled [`SamplerStage::Sample`].
    ///
    /// Draws without stage labels are returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if the draws are inconsistent or no sample-stage
    /// iterations remain.
    pub fn sample_stage(&self) -> Result<Self, InputError> {
        self.validate()?;
        let Some(stages) = &self.stages else {
            return Ok(self.clone());
        };
        let keep: Vec<usize> = stages
            .iter()
            .enumerate()
            .filter(|(_, stage)| **stage == SamplerStage::Sample)
            .map(|(iteration, _)| iteration)
            .collect();
        if keep.is_empty() {
            return Err(InputError::NoSampleStage);
        }

        let filtered = Self {
            subject_ids: self.subject_ids.clone(),
            random_effects: self
                .random_effects
                .iter()
                .map(|block| select_columns(block, &keep))
                .collect(),
            group_mean: select_columns(&self.group_mean, &keep),
            group_covariance: keep
                .iter()
                .map(|iteration| self.group_covariance[*iteration].clone())
                .collect(),
            scale_mixture: select_columns(&self.scale_mixture, &keep),
            stages: Some(vec![SamplerStage::Sample; keep.len()]),
        };
        filtered.validate()?;
        Ok(filtered)
    }
}

fn check_block(
    block_name: &'static str,
    block: &Mat<f64>,
    n_re: usize,
    iterations: usize,
) -> Result<(), InputError> {
    if block.nrows() != n_re {
        return Err(InputError::DimensionMismatch {
            block: block_name,
            expected: n_re,
            found: block.nrows(),
        });
    }
    if block.ncols() != iterations {
        return Err(InputError::IterationMismatch {
            block: block_name,
            expected: iterations,
            found: block.ncols(),
        });
    }
    if !crate::utils::matrix_is_finite(block) {
        return Err(InputError::NonFiniteDraws { block: block_name });
    }
    Ok(())
}

fn select_columns(matrix: &Mat<f64>, columns: &[usize]) -> Mat<f64> {
    Mat::from_fn(matrix.nrows(), columns.len(), |row, col| {
        matrix[(row, columns[col])]
    })
}
