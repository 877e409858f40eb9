use crate::comm::{Comm, Communicator};
use crate::space::{FunctionSpace, Layout};
use nalgebra::DVector;
use std::mem::size_of;
use std::sync::Arc;

/// A vector partitioned across the processes of a communicator.
///
/// Only the locally owned values are stored. Operations that combine values from several
/// processes (`dot`, `norm`, `gather`) are collective.
#[derive(Debug, Clone)]
pub struct DistributedVector {
    comm: Comm,
    layout: Layout,
    values: DVector<f64>,
}

impl DistributedVector {
    pub fn zeros(space: &FunctionSpace) -> Self {
        Self::zeros_with_layout(Arc::clone(space.comm()), space.layout())
    }

    pub fn zeros_with_layout(comm: Comm, layout: Layout) -> Self {
        Self {
            comm,
            layout,
            values: DVector::zeros(layout.local_size),
        }
    }

    /// A vector with the given local values on `space`.
    ///
    /// Panics if the number of values does not match the local size of the space.
    pub fn from_local(space: &FunctionSpace, values: DVector<f64>) -> Self {
        assert_eq!(
            values.len(),
            space.layout().local_size,
            "Local values must match the local size of the space"
        );
        Self {
            comm: Arc::clone(space.comm()),
            layout: space.layout(),
            values,
        }
    }

    /// The vector on `space` whose local values are `f(global_index)`.
    pub fn from_global_fn(space: &FunctionSpace, f: impl Fn(usize) -> f64) -> Self {
        let values = DVector::from_iterator(space.layout().local_size, space.ownership_range().map(f));
        Self::from_local(space, values)
    }

    pub fn comm(&self) -> &Comm {
        &self.comm
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn local(&self) -> &DVector<f64> {
        &self.values
    }

    pub fn local_mut(&mut self) -> &mut DVector<f64> {
        &mut self.values
    }

    pub fn local_len(&self) -> usize {
        self.values.len()
    }

    /// Size in bytes of the locally stored values.
    pub fn nbytes(&self) -> usize {
        self.values.len() * size_of::<f64>()
    }

    pub fn copy_from(&mut self, other: &DistributedVector) {
        assert_eq!(self.local_len(), other.local_len(), "Vectors must have the same local size");
        self.values.copy_from(&other.values);
    }

    pub fn fill(&mut self, value: f64) {
        self.values.fill(value);
    }

    /// `self <- self + alpha * x`
    pub fn axpy(&mut self, alpha: f64, x: &DistributedVector) {
        assert_eq!(self.local_len(), x.local_len(), "Vectors must have the same local size");
        self.values.axpy(alpha, &x.values, 1.0);
    }

    pub fn scale(&mut self, alpha: f64) {
        self.values *= alpha;
    }

    /// Euclidean inner product over all processes. Collective.
    pub fn dot(&self, other: &DistributedVector) -> f64 {
        assert_eq!(self.local_len(), other.local_len(), "Vectors must have the same local size");
        self.comm.all_reduce_sum_f64(self.values.dot(&other.values))
    }

    /// Euclidean norm over all processes. Collective.
    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// All values of the vector in global order. Collective.
    pub fn gather(&self) -> DVector<f64> {
        DVector::from_vec(self.comm.all_gather_varcount_f64(self.values.as_slice()))
    }
}
