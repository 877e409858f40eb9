use crate::bcs::{BoundaryCondition, EquationForm};
use crate::comm::Communicator;
use crate::form::{ActionKernel, BilinearForm, FormCompilerParameters};
use crate::space::FunctionSpace;
use crate::vector::DistributedVector;
use eyre::eyre;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::sync::Arc;

/// A bilinear form given by its matrix in the global numbering of its spaces.
///
/// The matrix is replicated on every process: rows are indexed by the global dofs of the test
/// space and columns by the global dofs of the trial space. This is the simplest possible
/// form compiler. It exists so that operators can be exercised without a symbolic backend.
#[derive(Debug, Clone)]
pub struct MatrixForm {
    test_space: Arc<FunctionSpace>,
    trial_space: Arc<FunctionSpace>,
    matrix: Arc<CsrMatrix<f64>>,
}

impl MatrixForm {
    pub fn new(
        test_space: Arc<FunctionSpace>,
        trial_space: Arc<FunctionSpace>,
        matrix: CsrMatrix<f64>,
    ) -> eyre::Result<Self> {
        let shape = (test_space.layout().global_size, trial_space.layout().global_size);
        if (matrix.nrows(), matrix.ncols()) != shape {
            return Err(eyre!(
                "Matrix of shape {}x{} does not match spaces of global sizes {}x{}",
                matrix.nrows(),
                matrix.ncols(),
                shape.0,
                shape.1
            ));
        }
        Ok(Self {
            test_space,
            trial_space,
            matrix: Arc::new(matrix),
        })
    }

    pub fn from_dense(
        test_space: Arc<FunctionSpace>,
        trial_space: Arc<FunctionSpace>,
        matrix: &DMatrix<f64>,
    ) -> eyre::Result<Self> {
        Self::new(test_space, trial_space, CsrMatrix::from(matrix))
    }

    pub fn matrix(&self) -> &CsrMatrix<f64> {
        &self.matrix
    }

    /// Maps global dofs of `space` to global dofs of `space.restrict(fields)`.
    fn restriction_map(space: &FunctionSpace, fields: &[usize], restricted: &FunctionSpace) -> Vec<Option<usize>> {
        let mut map = vec![None; space.layout().global_size];
        for rank in 0..space.comm().size() {
            for (position, &field) in fields.iter().enumerate() {
                let source = space.field_global_range(rank, field);
                let target = restricted.field_global_range(rank, position);
                for (i, j) in source.zip(target) {
                    map[i] = Some(j);
                }
            }
        }
        map
    }
}

impl BilinearForm for MatrixForm {
    fn test_space(&self) -> &Arc<FunctionSpace> {
        &self.test_space
    }

    fn trial_space(&self) -> &Arc<FunctionSpace> {
        &self.trial_space
    }

    fn adjoint(&self) -> Arc<dyn BilinearForm> {
        Arc::new(MatrixForm {
            test_space: Arc::clone(&self.trial_space),
            trial_space: Arc::clone(&self.test_space),
            matrix: Arc::new(self.matrix.transpose()),
        })
    }

    fn split(&self, row_fields: &[usize], col_fields: &[usize]) -> eyre::Result<Arc<dyn BilinearForm>> {
        check_fields(row_fields, &self.test_space)?;
        check_fields(col_fields, &self.trial_space)?;

        let test_space = self.test_space.restrict(row_fields);
        let trial_space = self.trial_space.restrict(col_fields);
        let row_map = Self::restriction_map(&self.test_space, row_fields, &test_space);
        let col_map = Self::restriction_map(&self.trial_space, col_fields, &trial_space);

        let mut coo = CooMatrix::new(test_space.layout().global_size, trial_space.layout().global_size);
        for (i, j, &v) in self.matrix.triplet_iter() {
            if let (Some(i), Some(j)) = (row_map[i], col_map[j]) {
                coo.push(i, j, v);
            }
        }

        Ok(Arc::new(MatrixForm {
            test_space,
            trial_space,
            matrix: Arc::new(CsrMatrix::from(&coo)),
        }))
    }

    fn compile_action(
        &self,
        bcs: &[BoundaryCondition],
        parameters: &FormCompilerParameters,
    ) -> eyre::Result<Box<dyn ActionKernel>> {
        let mut overrides = Vec::new();
        for bc in bcs {
            if let BoundaryCondition::Equation(ebc) = bc {
                let action = match ebc.form() {
                    EquationForm::Action(action) => action,
                    EquationForm::Bilinear(_) => {
                        return Err(eyre!(
                            "Equation conditions must be action-transformed before compiling an action"
                        ))
                    }
                };
                let mut rows: Vec<usize> = ebc.dofs().collect();
                rows.sort_unstable();
                rows.dedup();
                overrides.push(RowOverride {
                    rows,
                    kernel: action.compile(ebc.bcs(), parameters)?,
                });
            }
        }

        Ok(Box::new(MatrixActionKernel {
            matrix: Arc::clone(&self.matrix),
            row_start: self.test_space.ownership_range().start,
            local_rows: self.test_space.layout().local_size,
            local_cols: self.trial_space.layout().local_size,
            overrides,
        }))
    }
}

fn check_fields(fields: &[usize], space: &FunctionSpace) -> eyre::Result<()> {
    match fields.iter().find(|&&field| field >= space.num_fields()) {
        Some(field) => Err(eyre!(
            "Field {} does not exist in a space with {} fields",
            field,
            space.num_fields()
        )),
        None => Ok(()),
    }
}

/// Rows whose values are produced by the kernel of an equation condition.
#[derive(Debug)]
struct RowOverride {
    rows: Vec<usize>,
    kernel: Box<dyn ActionKernel>,
}

#[derive(Debug)]
struct MatrixActionKernel {
    matrix: Arc<CsrMatrix<f64>>,
    row_start: usize,
    local_rows: usize,
    local_cols: usize,
    overrides: Vec<RowOverride>,
}

impl ActionKernel for MatrixActionKernel {
    fn apply(&self, input: &DistributedVector, output: &mut DistributedVector) -> eyre::Result<()> {
        if input.local_len() != self.local_cols || output.local_len() != self.local_rows {
            return Err(eyre!(
                "Kernel of local shape {}x{} applied to input of length {} and output of length {}",
                self.local_rows,
                self.local_cols,
                input.local_len(),
                output.local_len()
            ));
        }

        let x = input.gather();
        {
            let y = output.local_mut();
            for i in 0..self.local_rows {
                let row = self.matrix.row(self.row_start + i);
                y[i] = row
                    .col_indices()
                    .iter()
                    .zip(row.values())
                    .map(|(&j, &a_ij)| a_ij * x[j])
                    .sum();
            }
        }

        // Every override is evaluated on every process, since kernels may be collective
        let mut scratch = output.clone();
        for RowOverride { rows, kernel } in &self.overrides {
            kernel.apply(input, &mut scratch)?;
            let y = output.local_mut();
            for &i in rows {
                y[i] = scratch.local()[i];
            }
        }

        Ok(())
    }
}
