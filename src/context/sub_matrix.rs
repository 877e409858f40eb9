use crate::bcs::restrict_bcs;
use crate::comm::Communicator;
use crate::context::ImplicitMatrixContext;
use crate::error::Error;
use crate::index_set::{find_sub_block, DistributedIndexSet};
use crate::matrix::ShellMatrix;
use log::debug;
use std::sync::Arc;

impl ImplicitMatrixContext {
    /// Extracts the operator coupling the fields making up `row_is` to the fields making up
    /// `col_is`. Collective.
    ///
    /// The form is split into the corresponding block and every condition is restricted to
    /// the selected fields; conditions on other fields are dropped. The sub-operator lies on
    /// the block diagonal only if this operator does and the row and column fields coincide.
    ///
    /// If `target` is given, it must be the result of a previous call with the same index
    /// sets. Nothing is recomputed: the target is only marked as assembled again, after
    /// checking that its shape matches the index sets.
    ///
    /// # Errors
    ///
    /// Returns [`Error::FieldDecompositionNotFound`] if either index set is not a
    /// concatenation of field index sets, and [`Error::InvalidArgument`] if either index set
    /// is empty or if `target` does not have the shape of the requested block.
    pub fn create_sub_matrix(
        &self,
        row_is: &DistributedIndexSet,
        col_is: &DistributedIndexSet,
        target: Option<ShellMatrix>,
    ) -> Result<ShellMatrix, Error> {
        if let Some(mut target) = target {
            let local_match = target.row_layout().local_size == row_is.local_len()
                && target.col_layout().local_size == col_is.local_len();
            if !row_is.comm().all_reduce_and(local_match) {
                return Err(Error::InvalidArgument(
                    "The sub-matrix to refresh does not have the shape of the requested block".to_string(),
                ));
            }
            target.assemble();
            debug!(
                "Refreshed sub-matrix (assembly state {})",
                target.assembly_state()
            );
            return Ok(target);
        }

        let test_space = self.test_space();
        let trial_space = self.trial_space();
        let row_inds = find_sub_block(row_is, test_space.field_index_sets())?;
        // Both conditions are collective, so they must be evaluated on every process
        let same_is = row_is.equals(col_is);
        let same_space = test_space.collective_eq(trial_space);
        let col_inds = if same_is && same_space {
            row_inds.clone()
        } else {
            find_sub_block(col_is, trial_space.field_index_sets())?
        };
        // The field lists are identical on every process, so this branch is collective
        if row_inds.is_empty() || col_inds.is_empty() {
            return Err(Error::InvalidArgument(
                "Cannot extract a sub-block from an empty index set".to_string(),
            ));
        }
        debug!("Extracting sub-block of fields {:?} x {:?}", row_inds, col_inds);

        let sub_form = self.form().split(&row_inds, &col_inds)?;
        let w_row = sub_form.test_space();
        let w_col = sub_form.trial_space();

        let row_bcs = restrict_bcs(self.row_bcs(), &row_inds, &row_inds, &col_inds, w_row)?;
        let spaces_coincide = w_row.collective_eq(w_col);
        let builder = ImplicitMatrixContext::builder(Arc::clone(&sub_form))
            .with_form_compiler_parameters(self.form_compiler_parameters().clone())
            .with_app_context(self.app_context().clone())
            .with_on_diagonal(self.on_diagonal() && row_inds == col_inds);
        let builder = if self.col_bcs_shared() && row_inds == col_inds && spaces_coincide {
            builder.with_bcs(row_bcs)
        } else {
            let col_bcs = restrict_bcs(self.col_bcs(), &col_inds, &row_inds, &col_inds, w_col)?;
            builder.with_row_bcs(row_bcs).with_col_bcs(col_bcs)
        };

        Ok(ShellMatrix::new(builder.build()?))
    }
}
