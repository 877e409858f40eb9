//! Matrix-free linear operators defined by bilinear forms with (nested) boundary conditions.
//!
//! The central type is [`ImplicitMatrixContext`](context::ImplicitMatrixContext), which
//! evaluates the action `y = A x` and the transpose action `x = A^T y` of the operator of a
//! bilinear form through compiled kernels, never assembling `A`. Operators are handed to
//! solvers and preconditioners as [`ShellMatrix`](matrix::ShellMatrix) objects, and sub-blocks
//! of operators on mixed spaces are extracted by matching index sets against the fields of the
//! underlying spaces.
//!
//! All data is distributed over the processes of a [`Communicator`](comm::Communicator).
//! Functions documented as *collective* must be called by every process of the
//! communicator, in the same order.

pub mod appctx;
pub mod bcs;
pub mod comm;
pub mod context;
pub mod error;
pub mod fieldsplit;
pub mod form;
pub mod index_set;
pub mod krylov;
pub mod matrix;
pub mod space;
pub mod vector;

pub(crate) mod workspace;

pub use error::{Error, Result};

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
