//! Preconditioned Conjugate Gradient for distributed operators.
use crate::matrix::ShellMatrix;
use crate::vector::DistributedVector;
use log::debug;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

pub trait LinearOperator {
    /// `y <- A x`
    fn apply(&self, y: &mut DistributedVector, x: &DistributedVector) -> Result<(), Box<dyn Error>>;
}

impl<'a, A> LinearOperator for &'a A
where
    A: ?Sized + LinearOperator,
{
    fn apply(&self, y: &mut DistributedVector, x: &DistributedVector) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator>::apply(self, y, x)
    }
}

impl LinearOperator for ShellMatrix {
    fn apply(&self, y: &mut DistributedVector, x: &DistributedVector) -> Result<(), Box<dyn Error>> {
        self.mult(x, y)?;
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Default)]
pub struct IdentityOperator;

impl LinearOperator for IdentityOperator {
    fn apply(&self, y: &mut DistributedVector, x: &DistributedVector) -> Result<(), Box<dyn Error>> {
        y.copy_from(x);
        Ok(())
    }
}

/// Search directions and residuals kept between solves. They are reallocated whenever the
/// layout of the right-hand side changes.
#[derive(Debug, Clone, Default)]
pub struct CgWorkspace {
    vectors: Option<SolverVectors>,
}

#[derive(Debug, Clone)]
struct SolverVectors {
    residual: DistributedVector,
    preconditioned: DistributedVector,
    direction: DistributedVector,
    image: DistributedVector,
}

impl CgWorkspace {
    fn vectors_like(&mut self, template: &DistributedVector) -> &mut SolverVectors {
        let vectors = self
            .vectors
            .take()
            .filter(|vectors| vectors.residual.layout() == template.layout())
            .unwrap_or_else(|| {
                let zeros = || DistributedVector::zeros_with_layout(Arc::clone(template.comm()), template.layout());
                SolverVectors {
                    residual: zeros(),
                    preconditioned: zeros(),
                    direction: zeros(),
                    image: zeros(),
                }
            });
        self.vectors.insert(vectors)
    }
}

/// Conjugate Gradient solver for symmetric positive definite operators.
///
/// Iterates until the residual `r` estimated by the recurrence satisfies
/// `||r|| <= tol * ||b||`. All processes take the same decisions, since they only depend on
/// collective dot products.
#[derive(Debug)]
pub struct ConjugateGradient<'a, A, P> {
    workspace: Option<&'a mut CgWorkspace>,
    operator: A,
    preconditioner: P,
    tol: f64,
    max_iter: Option<usize>,
}

impl<'a> ConjugateGradient<'a, (), IdentityOperator> {
    pub fn new() -> Self {
        Self {
            workspace: None,
            operator: (),
            preconditioner: IdentityOperator,
            tol: 1e-8,
            max_iter: None,
        }
    }

    /// A solver that reuses the vectors stored in `workspace`.
    pub fn with_workspace(workspace: &'a mut CgWorkspace) -> Self {
        Self {
            workspace: Some(workspace),
            ..Self::new()
        }
    }
}

impl<'a, P> ConjugateGradient<'a, (), P> {
    pub fn with_operator<A>(self, operator: A) -> ConjugateGradient<'a, A, P> {
        ConjugateGradient {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            tol: self.tol,
            max_iter: self.max_iter,
        }
    }
}

impl<'a, A, P> ConjugateGradient<'a, A, P> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<'a, A, P2> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            tol: self.tol,
            max_iter: self.max_iter,
        }
    }

    /// Relative residual tolerance. Defaults to `1e-8`.
    pub fn with_tolerance(self, tol: f64) -> Self {
        Self { tol, ..self }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error>),
    PreconditionerError(Box<dyn Error>),
    IndefiniteOperator,
    IndefinitePreconditioner,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "Error applying operator: {}", err),
            Self::PreconditionerError(err) => write!(f, "Error applying preconditioner: {}", err),
            Self::IndefiniteOperator => write!(f, "Operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "Preconditioner appears to be indefinite"),
            Self::MaxIterationsReached { max_iter } => write!(f, "No convergence within {} iterations", max_iter),
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError {
    pub output: CgOutput,
    pub kind: SolveErrorKind,
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CG failed after {} iterations: {}", self.output.num_iterations, self.kind)
    }
}

impl Error for SolveError {}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct CgOutput {
    /// Number of updates made to the initial guess.
    pub num_iterations: usize,
}

impl<'a, A, P> ConjugateGradient<'a, A, P>
where
    A: LinearOperator,
    P: LinearOperator,
{
    /// Solves `A x = b` starting from the current contents of `x`. Collective.
    pub fn solve_with_guess(&mut self, b: &DistributedVector, x: &mut DistributedVector) -> Result<CgOutput, SolveError> {
        assert_eq!(b.local_len(), x.local_len(), "Solution and right-hand side differ in length");

        let mut owned_workspace = CgWorkspace::default();
        let workspace = match self.workspace.as_deref_mut() {
            Some(workspace) => workspace,
            None => &mut owned_workspace,
        };
        let SolverVectors {
            residual: r,
            preconditioned: z,
            direction: p,
            image: ap,
        } = workspace.vectors_like(b);

        let mut output = CgOutput { num_iterations: 0 };
        let fail = |output: &CgOutput, kind| SolveError {
            output: output.clone(),
            kind,
        };

        let b_norm = b.norm();
        if b_norm == 0.0 {
            x.fill(0.0);
            return Ok(output);
        }

        self.operator
            .apply(r, x)
            .map_err(|err| fail(&output, SolveErrorKind::OperatorError(err)))?;
        r.scale(-1.0);
        r.axpy(1.0, b);

        self.preconditioner
            .apply(z, r)
            .map_err(|err| fail(&output, SolveErrorKind::PreconditionerError(err)))?;
        p.copy_from(z);
        let mut z_dot_r = z.dot(r);

        while r.norm() > self.tol * b_norm {
            if let Some(max_iter) = self.max_iter.filter(|&max_iter| output.num_iterations >= max_iter) {
                return Err(fail(&output, SolveErrorKind::MaxIterationsReached { max_iter }));
            }

            self.operator
                .apply(ap, p)
                .map_err(|err| fail(&output, SolveErrorKind::OperatorError(err)))?;
            let p_dot_ap = p.dot(ap);
            if p_dot_ap <= 0.0 {
                return Err(fail(&output, SolveErrorKind::IndefiniteOperator));
            }
            if z_dot_r <= 0.0 {
                return Err(fail(&output, SolveErrorKind::IndefinitePreconditioner));
            }

            let alpha = z_dot_r / p_dot_ap;
            x.axpy(alpha, p);
            r.axpy(-alpha, ap);
            output.num_iterations += 1;

            self.preconditioner
                .apply(z, r)
                .map_err(|err| fail(&output, SolveErrorKind::PreconditionerError(err)))?;
            let z_dot_r_next = z.dot(r);
            // p <- z + beta p
            p.scale(z_dot_r_next / z_dot_r);
            p.axpy(1.0, z);
            z_dot_r = z_dot_r_next;
        }

        debug!("CG converged after {} iterations", output.num_iterations);
        Ok(output)
    }
}
