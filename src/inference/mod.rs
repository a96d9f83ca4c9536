//! Reusable scheduling and random-stream utilities for fan-out estimators.

use rand::SeedableRng;
use rand::rngs::StdRng;
use thiserror::Error;

/// Errors for generic fan-out scheduling configuration.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum InferenceError {
    #[error("worker count must be positive")]
    InvalidWorkerCount,
    #[error("seed stride must be positive")]
    InvalidSeedStride,
}

/// Seeds and worker count for a fixed-size fan-out/fan-in computation.
///
/// Unit `i` of the workload draws from its own stream seeded with
/// `seed + (i + 1) * seed_stride`, so results do not depend on how units are
/// partitioned across workers.
#[derive(Debug, Clone, Copy)]
pub struct FanOutSchedule {
    pub seed: u64,
    pub seed_stride: u64,
    pub workers: Option<usize>,
}

impl Default for FanOutSchedule {
    fn default() -> Self {
        Self {
            seed: 42,
            seed_stride: 1,
            workers: None,
        }
    }
}

impl FanOutSchedule {
    /// # Errors
    ///
    /// Returns `InferenceError` if schedule values are invalid.
    pub const fn validate(self) -> Result<(), InferenceError> {
        if let Some(0) = self.workers {
            return Err(InferenceError::InvalidWorkerCount);
        }
        if self.seed_stride == 0 {
            return Err(InferenceError::InvalidSeedStride);
        }
        Ok(())
    }

    /// Stream for shared, sequential work (fitting, proposal generation).
    #[must_use]
    pub fn root_rng(self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }

    /// Independent stream for unit `index` of the workload.
    #[must_use]
    pub fn unit_rng(self, index: usize) -> StdRng {
        let index_u64 = u64::try_from(index).unwrap_or(u64::MAX);
        StdRng::seed_from_u64(
            self.seed
                .wrapping_add(index_u64.wrapping_add(1).wrapping_mul(self.seed_stride)),
        )
    }

    /// Stream for post-processing that must not overlap any unit stream.
    #[must_use]
    pub fn auxiliary_rng(self, tag: u64) -> StdRng {
        StdRng::seed_from_u64(self.seed ^ tag.rotate_left(32) ^ 0x9E37_79B9_7F4A_7C15)
    }

    /// Workers to use for `units` units of work, bounded by available CPUs.
    #[must_use]
    pub fn resolve_workers(self, units: usize) -> usize {
        let requested = self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
        });
        requested.clamp(1, units.max(1))
    }
}

/// Contiguous chunk length that spreads `units` over `workers` chunks.
#[must_use]
pub const fn chunk_len(units: usize, workers: usize) -> usize {
    let len = if workers == 0 {
        units
    } else {
        units.div_ceil(workers)
    };
    if len == 0 { 1 } else { len }
}
