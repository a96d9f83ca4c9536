//! Per-subject data partitioning.
//!
//! The estimator never inspects subject data itself; it only hands each
//! subject's slice to the subject-level likelihood. This module groups a flat
//! row set by subject identifier and aligns it with the subject order used by
//! the posterior draws.

use std::collections::BTreeMap;

use super::InputError;

/// Data partitioned by subject, in a fixed subject order.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectData<D> {
    subject_ids: Vec<u64>,
    slices: Vec<D>,
}

impl<D> SubjectData<D> {
    /// Build from already-partitioned slices.
    ///
    /// # Errors
    ///
    /// Returns `InputError` if the id and slice counts differ or an id repeats.
    pub fn new(subject_ids: Vec<u64>, slices: Vec<D>) -> Result<Self, InputError> {
        if subject_ids.len() != slices.len() {
            return Err(InputError::RowCountMismatch {
                ids: subject_ids.len(),
                rows: slices.len(),
            });
        }
        let mut seen = std::collections::BTreeSet::new();
        for id in &subject_ids {
            if !seen.insert(*id) {
                return Err(InputError::DuplicateSubjectId(*id));
            }
        }
        Ok(Self {
            subject_ids,
            slices,
        })
    }

    #[must_use]
    pub fn subject_ids(&self) -> &[u64] {
        &self.subject_ids
    }

    #[must_use]
    pub fn slices(&self) -> &[D] {
        &self.slices
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.slices.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.slices.is_empty()
    }

    /// Slice for a subject identifier, if present.
    #[must_use]
    pub fn get(&self, subject_id: u64) -> Option<&D> {
        self.subject_ids
            .iter()
            .position(|id| *id == subject_id)
            .map(|index| &self.slices[index])
    }

    /// Borrow the slices in the subject order given by `order`.
    ///
    /// # Errors
    ///
    /// Returns `InputError::MissingSubjectData` if a subject in `order` has no
    /// slice and `InputError::UnknownSubject` if a slice has no matching
    /// subject in `order`.
    pub fn ordered_by(&self, order: &[u64]) -> Result<Vec<&D>, InputError> {
        let mut by_id: BTreeMap<u64, &D> = self.subject_ids.iter().copied().zip(&self.slices).collect();
        let mut slices = Vec::with_capacity(order.len());
        for id in order {
            let slice = by_id
                .remove(id)
                .ok_or(InputError::MissingSubjectData(*id))?;
            slices.push(slice);
        }
        if let Some(unknown) = by_id.keys().next() {
            return Err(InputError::UnknownSubject(*unknown));
        }
        Ok(slices)
    }
}

impl<R> SubjectData<Vec<R>> {
    /// Group a flat set of rows by subject id, in order of first appearance.
    ///
    /// # Errors
    ///
    /// Returns `InputError::RowCountMismatch` if `subject_ids` and `rows` differ
    /// in length.
    pub fn from_rows(subject_ids: &[u64], rows: Vec<R>) -> Result<Self, InputError> {
        if subject_ids.len() != rows.len() {
            return Err(InputError::RowCountMismatch {
                ids: subject_ids.len(),
                rows: rows.len(),
            });
        }
        let mut lookup: BTreeMap<u64, usize> = BTreeMap::new();
        let mut ids = Vec::new();
        let mut slices: Vec<Vec<R>> = Vec::new();
        for (subject_id, row) in subject_ids.iter().copied().zip(rows) {
            let index = *lookup.entry(subject_id).or_insert_with(|| {
                ids.push(subject_id);
                slices.push(Vec::new());
                ids.len() - 1
            });
            slices[index].push(row);
        }
        Ok(Self {
            subject_ids: ids,
            slices,
        })
    }
}
