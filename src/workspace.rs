use crate::space::FunctionSpace;
use crate::vector::DistributedVector;

/// Scratch vectors owned by a single operator and reused by every action.
///
/// All buffers are overwritten at the start of every action. They are never shared between
/// operators, and an operator never hands them out to its sub-operators.
#[derive(Debug)]
pub(crate) struct ActionWorkspace {
    /// Output of the forward kernel, input of the transpose kernels.
    pub test: DistributedVector,
    /// Input of the forward kernel, output of the transpose kernels.
    pub trial: DistributedVector,
    /// Accumulates the contributions of the transpose kernels.
    pub trial_acc: DistributedVector,
}

impl ActionWorkspace {
    pub fn new(test_space: &FunctionSpace, trial_space: &FunctionSpace) -> Self {
        Self {
            test: DistributedVector::zeros(test_space),
            trial: DistributedVector::zeros(trial_space),
            trial_acc: DistributedVector::zeros(trial_space),
        }
    }

    /// Bytes held by the scratch vectors on this process.
    pub fn nbytes(&self) -> usize {
        self.test.nbytes() + self.trial.nbytes() + self.trial_acc.nbytes()
    }
}
