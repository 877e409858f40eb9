//! Distributed index sets and field decomposition.
use crate::comm::{Comm, Communicator};
use crate::error::Error;
use log::trace;
use std::ops::Range;
use std::sync::Arc;

/// An ordered sequence of global indices, partitioned across the processes of a communicator.
///
/// Each process holds a contiguous slice of the *sequence*. There is no requirement that the
/// index *values* held by a process form a contiguous range.
///
/// Equality of distributed index sets is a collective question: two sets can agree on every
/// local slice of one process and still differ on another. For this reason `PartialEq` is not
/// implemented, and [`DistributedIndexSet::equals`] must be called on every process.
#[derive(Debug, Clone)]
pub struct DistributedIndexSet {
    comm: Comm,
    indices: Vec<usize>,
}

impl DistributedIndexSet {
    pub fn new(comm: Comm, indices: Vec<usize>) -> Self {
        Self { comm, indices }
    }

    /// The index set holding the local indices `range` in increasing order.
    pub fn from_range(comm: Comm, range: Range<usize>) -> Self {
        Self::new(comm, range.collect())
    }

    /// Concatenates the local slices of the given sets.
    ///
    /// Panics if `sets` is empty.
    pub fn concatenate<'a>(sets: impl IntoIterator<Item = &'a DistributedIndexSet>) -> Self {
        let mut sets = sets.into_iter().peekable();
        let comm = Arc::clone(
            &sets
                .peek()
                .expect("Cannot concatenate an empty collection of index sets")
                .comm,
        );
        let indices = sets.flat_map(|set| set.indices.iter().copied()).collect();
        Self { comm, indices }
    }

    pub fn comm(&self) -> &Comm {
        &self.comm
    }

    /// The indices held by this process.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn local_len(&self) -> usize {
        self.indices.len()
    }

    /// The length of the whole sequence. Collective.
    pub fn global_len(&self) -> usize {
        self.comm.all_reduce_sum(self.indices.len())
    }

    /// Whether the two sets hold the same sequence on every process. Collective.
    pub fn equals(&self, other: &DistributedIndexSet) -> bool {
        self.comm.all_reduce_and(self.indices == other.indices)
    }
}

/// Determines which concatenation of `candidates` reproduces `target`.
///
/// Returns the positions into `candidates` which, concatenated in the returned order, form
/// exactly the sequence `target`. A candidate is accepted only when its local slice matches
/// the current local prefix of the remaining target on *every* process, so a field that
/// happens to match on some processes but not on others is never accepted.
///
/// The candidates are assumed to be pairwise disjoint. This function is collective: the same
/// candidates must be passed in the same order on every process.
///
/// # Errors
///
/// Returns [`Error::FieldDecompositionNotFound`] if some part of the target remains
/// unmatched once no remaining candidate matches.
pub fn find_sub_block(
    target: &DistributedIndexSet,
    candidates: &[DistributedIndexSet],
) -> Result<Vec<usize>, Error> {
    let comm = target.comm();
    let mut remaining = target.indices();
    let mut unmatched: Vec<(usize, &DistributedIndexSet)> = candidates.iter().enumerate().collect();
    let mut found = Vec::new();

    loop {
        let mut matched_any = false;
        let mut k = 0;
        while k < unmatched.len() {
            let (position, candidate) = unmatched[k];
            let candidate_indices = candidate.indices();
            let local_match = candidate_indices.len() <= remaining.len()
                && remaining[..candidate_indices.len()] == *candidate_indices;
            if comm.all_reduce_and(local_match) {
                trace!("Candidate field {} matches the next part of the target", position);
                remaining = &remaining[candidate_indices.len()..];
                found.push(position);
                unmatched.remove(k);
                matched_any = true;
            } else {
                k += 1;
            }
        }
        if !matched_any {
            break;
        }
    }

    let global_remainder = comm.all_reduce_sum(remaining.len());
    if global_remainder > 0 {
        return Err(Error::FieldDecompositionNotFound {
            unmatched: global_remainder,
            candidates: candidates.len(),
            matched: found,
        });
    }

    Ok(found)
}
