//! Additive field-split preconditioning of coupled operators.
use crate::error::Error;
use crate::index_set::DistributedIndexSet;
use crate::krylov::{CgWorkspace, ConjugateGradient, LinearOperator};
use crate::matrix::ShellMatrix;
use crate::space::FunctionSpace;
use crate::vector::DistributedVector;
use log::debug;
use std::cell::RefCell;
use std::error;
use std::sync::Arc;

/// Block-diagonal (additive) preconditioner of an operator on a mixed space.
///
/// The fields of the space are grouped into splits. The diagonal block of every split is
/// extracted with [`ShellMatrix::create_sub_matrix`], and the preconditioner applies the
/// inverse of each block, approximated with an inner Conjugate Gradient solve, to the
/// corresponding part of the input. Entries not covered by any split are passed through
/// unchanged.
#[derive(Debug)]
pub struct FieldSplitPreconditioner {
    blocks: Vec<SplitBlock>,
    tol: f64,
    max_iter: usize,
}

#[derive(Debug)]
struct SplitBlock {
    fields: Vec<usize>,
    /// Positions of the split's dofs within the local part of a vector on the full space.
    positions: Vec<usize>,
    matrix: ShellMatrix,
    workspace: RefCell<CgWorkspace>,
}

impl FieldSplitPreconditioner {
    /// Splits `operator` into one block per field of `space`. Collective.
    pub fn new(operator: &ShellMatrix, space: &FunctionSpace) -> Result<Self, Error> {
        let splits: Vec<Vec<usize>> = (0..space.num_fields()).map(|field| vec![field]).collect();
        Self::with_splits(operator, space, &splits)
    }

    /// Splits `operator` into one block per group of fields of `space`. Collective.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a group is empty or names a field the space does
    /// not have, and propagates failures to extract the diagonal blocks.
    pub fn with_splits(
        operator: &ShellMatrix,
        space: &FunctionSpace,
        splits: &[Vec<usize>],
    ) -> Result<Self, Error> {
        let start = space.ownership_range().start;
        let mut blocks = Vec::with_capacity(splits.len());
        for fields in splits {
            if fields.is_empty() || fields.iter().any(|&field| field >= space.num_fields()) {
                return Err(Error::InvalidArgument(format!(
                    "Invalid split {:?} of a space with {} fields",
                    fields,
                    space.num_fields()
                )));
            }
            let index_set = split_index_set(space, fields);
            let matrix = operator.create_sub_matrix(&index_set, &index_set, None)?;
            let positions = index_set.indices().iter().map(|&idx| idx - start).collect();
            debug!(
                "Field split {:?}: block of global size {}",
                fields,
                matrix.row_layout().global_size
            );
            blocks.push(SplitBlock {
                fields: fields.clone(),
                positions,
                matrix,
                workspace: RefCell::new(CgWorkspace::default()),
            });
        }
        Ok(Self {
            blocks,
            tol: 1e-10,
            max_iter: 1000,
        })
    }

    /// Relative tolerance of the inner block solves.
    pub fn with_tolerance(self, tol: f64) -> Self {
        Self { tol, ..self }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self { max_iter, ..self }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// The fields making up every split, in split order.
    pub fn splits(&self) -> impl Iterator<Item = &[usize]> {
        self.blocks.iter().map(|block| block.fields.as_slice())
    }

    /// The diagonal block of split `index`.
    pub fn block(&self, index: usize) -> &ShellMatrix {
        &self.blocks[index].matrix
    }

    /// Re-marks every block as assembled, e.g. after the coefficients of the operator changed.
    /// Collective.
    pub fn refresh(self, operator: &ShellMatrix, space: &FunctionSpace) -> Result<Self, Error> {
        let mut blocks = Vec::with_capacity(self.blocks.len());
        for block in self.blocks {
            let index_set = split_index_set(space, &block.fields);
            let matrix = operator.create_sub_matrix(&index_set, &index_set, Some(block.matrix))?;
            blocks.push(SplitBlock { matrix, ..block });
        }
        Ok(Self { blocks, ..self })
    }
}

fn split_index_set(space: &FunctionSpace, fields: &[usize]) -> DistributedIndexSet {
    DistributedIndexSet::concatenate(fields.iter().map(|&field| &space.field_index_sets()[field]))
}

impl LinearOperator for FieldSplitPreconditioner {
    fn apply(&self, y: &mut DistributedVector, x: &DistributedVector) -> Result<(), Box<dyn error::Error>> {
        y.copy_from(x);
        for block in &self.blocks {
            let comm = Arc::clone(x.comm());
            let mut rhs = DistributedVector::zeros_with_layout(Arc::clone(&comm), block.matrix.row_layout());
            let mut solution = DistributedVector::zeros_with_layout(comm, block.matrix.col_layout());
            for (local, &position) in rhs.local_mut().iter_mut().zip(&block.positions) {
                *local = x.local()[position];
            }

            let mut workspace = block.workspace.borrow_mut();
            ConjugateGradient::with_workspace(&mut workspace)
                .with_operator(&block.matrix)
                .with_tolerance(self.tol)
                .with_max_iter(self.max_iter)
                .solve_with_guess(&rhs, &mut solution)?;

            let y = y.local_mut();
            for (&value, &position) in solution.local().iter().zip(&block.positions) {
                y[position] = value;
            }
        }
        Ok(())
    }
}
