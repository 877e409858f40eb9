//! The interface to the symbolic form compiler.
//!
//! Forms are opaque to this crate. A [`BilinearForm`] knows its test and trial spaces, can
//! produce its adjoint and its sub-blocks, and can compile its [`Action`] into an
//! [`ActionKernel`] that evaluates the action on a given input vector.
use crate::bcs::BoundaryCondition;
use crate::space::FunctionSpace;
use crate::vector::DistributedVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

mod matrix;

pub use matrix::MatrixForm;

/// Options forwarded verbatim to the form compiler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormCompilerParameters {
    /// Quadrature degree to use for all integrals, or `None` to let the compiler estimate it.
    pub quadrature_degree: Option<u32>,
    /// Compiler specific options.
    pub options: BTreeMap<String, String>,
}

impl FormCompilerParameters {
    pub fn with_quadrature_degree(self, degree: u32) -> Self {
        Self {
            quadrature_degree: Some(degree),
            ..self
        }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// A symbolic two-argument form `a(v, u)` with test function `v` and trial function `u`.
pub trait BilinearForm: fmt::Debug + Send + Sync {
    fn test_space(&self) -> &Arc<FunctionSpace>;

    fn trial_space(&self) -> &Arc<FunctionSpace>;

    /// The form with test and trial arguments swapped.
    fn adjoint(&self) -> Arc<dyn BilinearForm>;

    /// The sub-block coupling the given test fields to the given trial fields.
    ///
    /// The returned form is defined on the spaces obtained by restricting the test and trial
    /// spaces to the given fields. Collective.
    fn split(&self, row_fields: &[usize], col_fields: &[usize]) -> eyre::Result<Arc<dyn BilinearForm>>;

    /// Compiles the action of the form into a kernel.
    ///
    /// Equation conditions among `bcs` must have been action-transformed; the rows they
    /// constrain are evaluated with their own forms. Essential conditions are left to the
    /// caller.
    fn compile_action(
        &self,
        bcs: &[BoundaryCondition],
        parameters: &FormCompilerParameters,
    ) -> eyre::Result<Box<dyn ActionKernel>>;
}

/// A compiled evaluator of the action of a form.
pub trait ActionKernel: fmt::Debug {
    /// Evaluates the action on `input`, overwriting `output`.
    fn apply(&self, input: &DistributedVector, output: &mut DistributedVector) -> eyre::Result<()>;
}

/// The action of a bilinear form: the linear form obtained by binding its trial argument.
///
/// The bound vector is not stored. It is supplied to the compiled kernel on every evaluation.
#[derive(Debug, Clone)]
pub struct Action {
    form: Arc<dyn BilinearForm>,
}

impl Action {
    pub fn form(&self) -> &Arc<dyn BilinearForm> {
        &self.form
    }

    pub fn compile(
        &self,
        bcs: &[BoundaryCondition],
        parameters: &FormCompilerParameters,
    ) -> eyre::Result<Box<dyn ActionKernel>> {
        self.form.compile_action(bcs, parameters)
    }
}

pub fn action(form: Arc<dyn BilinearForm>) -> Action {
    Action { form }
}

pub fn adjoint(form: &dyn BilinearForm) -> Arc<dyn BilinearForm> {
    form.adjoint()
}
