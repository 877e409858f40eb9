//! Matrix-free operators defined by bilinear forms and boundary conditions.
use crate::appctx::AppContext;
use crate::bcs::{dirichlet_bcs, equation_bcs, iter_tree, BoundaryCondition, DirichletBC, EquationBC};
use crate::comm::Communicator;
use crate::error::Error;
use crate::form::{action, adjoint, ActionKernel, BilinearForm, FormCompilerParameters};
use crate::index_set::DistributedIndexSet;
use crate::matrix::{InfoType, MatInfo, ShellContext, ShellMatrix, Viewer, ViewerType};
use crate::space::{FunctionSpace, Layout};
use crate::vector::DistributedVector;
use crate::workspace::ActionWorkspace;
use log::debug;
use std::any::Any;
use std::cell::RefCell;
use std::slice;
use std::sync::Arc;

mod sub_matrix;

/// The operator `A` of a bilinear form `a(v, u)` with boundary conditions, applied without
/// ever assembling a matrix.
///
/// Row conditions live on the test space and column conditions on the trial space. For an
/// operator on the block diagonal of a coupled system, rows and columns constrained by
/// essential conditions form an identity block, so that the operator has the structure
/// `[A_II 0; 0 I]`. Off the diagonal, these rows and columns are zero. Rows constrained by
/// an equation condition are the rows of the condition's own form.
///
/// The kernels evaluating the actions of the form, its adjoint and the adjoints of all
/// equation conditions are compiled once, when the operator is built.
///
/// # Reentrancy
///
/// The operator owns scratch vectors that are reset by every action. Actions therefore
/// require exclusive access to the scratch storage: calling an action of an operator from
/// within one of its own kernels panics.
#[derive(Debug)]
pub struct ImplicitMatrixContext {
    a: Arc<dyn BilinearForm>,
    a_t: Arc<dyn BilinearForm>,
    fc_params: FormCompilerParameters,
    appctx: AppContext,

    row_bcs: Vec<BoundaryCondition>,
    col_bcs: Vec<BoundaryCondition>,
    col_bcs_shared: bool,
    essential_row_bcs: Vec<DirichletBC>,
    essential_col_bcs: Vec<DirichletBC>,

    row_layout: Layout,
    col_layout: Layout,
    on_diag: bool,

    assemble_action: Box<dyn ActionKernel>,
    /// Transpose kernels of the form and of every equation condition in `row_bcs`, in
    /// pre-order. `mult_transpose` consumes them in exactly this order.
    assemble_action_t: Vec<Box<dyn ActionKernel>>,

    workspace: RefCell<ActionWorkspace>,
}

#[derive(Debug, Clone)]
enum ColumnBcs {
    SameAsRows,
    Separate(Vec<BoundaryCondition>),
}

/// Builder for [`ImplicitMatrixContext`].
#[derive(Debug, Clone)]
pub struct ImplicitMatrixContextBuilder {
    form: Arc<dyn BilinearForm>,
    row_bcs: Vec<BoundaryCondition>,
    col_bcs: ColumnBcs,
    fc_params: FormCompilerParameters,
    appctx: AppContext,
    on_diag: bool,
}

impl ImplicitMatrixContextBuilder {
    /// Uses the same conditions for rows and columns.
    pub fn with_bcs(self, bcs: impl IntoIterator<Item = BoundaryCondition>) -> Self {
        Self {
            row_bcs: bcs.into_iter().collect(),
            col_bcs: ColumnBcs::SameAsRows,
            ..self
        }
    }

    pub fn with_row_bcs(self, bcs: impl IntoIterator<Item = BoundaryCondition>) -> Self {
        Self {
            row_bcs: bcs.into_iter().collect(),
            ..self
        }
    }

    pub fn with_col_bcs(self, bcs: impl IntoIterator<Item = BoundaryCondition>) -> Self {
        Self {
            col_bcs: ColumnBcs::Separate(bcs.into_iter().collect()),
            ..self
        }
    }

    pub fn with_form_compiler_parameters(self, fc_params: FormCompilerParameters) -> Self {
        Self { fc_params, ..self }
    }

    pub fn with_app_context(self, appctx: AppContext) -> Self {
        Self { appctx, ..self }
    }

    /// Whether the operator is a block on the diagonal of a coupled operator. Defaults to
    /// `true`.
    pub fn with_on_diagonal(self, on_diag: bool) -> Self {
        Self { on_diag, ..self }
    }

    /// Compiles the kernels and allocates the scratch storage of the operator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a condition does not live on the test (rows) or
    /// trial (columns) space of the form or if an on-diagonal operator with essential
    /// conditions is not square, and [`Error::Evaluation`] if the form compiler
    /// fails.
    pub fn build(self) -> Result<ImplicitMatrixContext, Error> {
        let a = self.form;
        let a_t = adjoint(&*a);
        let test_space = Arc::clone(a.test_space());
        let trial_space = Arc::clone(a.trial_space());

        let (col_bcs, col_bcs_shared) = match self.col_bcs {
            ColumnBcs::SameAsRows => (self.row_bcs.clone(), true),
            ColumnBcs::Separate(bcs) => (bcs, false),
        };
        check_bcs_space(&self.row_bcs, &test_space, "row")?;
        check_bcs_space(&col_bcs, &trial_space, "column")?;

        let essential_row_bcs = dirichlet_bcs(&self.row_bcs);
        let essential_col_bcs = dirichlet_bcs(&col_bcs);

        // Identity rows and columns copy entries across spaces, which requires equal layouts
        let (row_layout, col_layout) = (test_space.layout(), trial_space.layout());
        let local_square = row_layout.local_size == col_layout.local_size
            && row_layout.global_size == col_layout.global_size;
        let square = test_space.comm().all_reduce_and(local_square);
        let has_essential = !essential_row_bcs.is_empty() || !essential_col_bcs.is_empty();
        if self.on_diag && has_essential && !square {
            return Err(Error::InvalidArgument(format!(
                "An on-diagonal operator with essential conditions must be square, but the form has \
                 global shape {}x{}",
                row_layout.global_size, col_layout.global_size
            )));
        }

        // The forward kernel evaluates the rows of equation conditions with the actions of
        // their forms on the operator input
        let bcs_action: Vec<BoundaryCondition> = self
            .row_bcs
            .iter()
            .map(|bc| match bc {
                BoundaryCondition::Dirichlet(_) => bc.clone(),
                BoundaryCondition::Equation(ebc) => ebc.action_transform().into(),
            })
            .collect();
        let assemble_action = action(Arc::clone(&a)).compile(&bcs_action, &self.fc_params)?;

        let mut assemble_action_t = vec![action(Arc::clone(&a_t)).compile(&[], &self.fc_params)?];
        for ebc in equation_bcs(&self.row_bcs) {
            let kernel = action(adjoint(&**ebc.form().bilinear())).compile(&[], &self.fc_params)?;
            assemble_action_t.push(kernel);
        }

        debug!(
            "Built matrix-free operator of global shape {}x{} ({} row conditions, {} column conditions, \
             {} transpose kernels, on diagonal: {})",
            test_space.layout().global_size,
            trial_space.layout().global_size,
            iter_tree(&self.row_bcs).count(),
            iter_tree(&col_bcs).count(),
            assemble_action_t.len(),
            self.on_diag
        );

        Ok(ImplicitMatrixContext {
            a,
            a_t,
            fc_params: self.fc_params,
            appctx: self.appctx,
            row_bcs: self.row_bcs,
            col_bcs,
            col_bcs_shared,
            essential_row_bcs,
            essential_col_bcs,
            row_layout,
            col_layout,
            on_diag: self.on_diag,
            assemble_action,
            assemble_action_t,
            workspace: RefCell::new(ActionWorkspace::new(&test_space, &trial_space)),
        })
    }
}

fn check_bcs_space(bcs: &[BoundaryCondition], space: &FunctionSpace, side: &str) -> Result<(), Error> {
    for bc in iter_tree(bcs) {
        let bc_layout = bc.function_space().layout();
        if bc_layout.global_size != space.layout().global_size {
            return Err(Error::InvalidArgument(format!(
                "A {} condition lives on a space of global size {}, but the operator space has global size {}",
                side,
                bc_layout.global_size,
                space.layout().global_size
            )));
        }
    }
    Ok(())
}

impl ImplicitMatrixContext {
    const NAME: &'static str = "ImplicitMatrixContext";

    pub fn builder(form: Arc<dyn BilinearForm>) -> ImplicitMatrixContextBuilder {
        ImplicitMatrixContextBuilder {
            form,
            row_bcs: Vec::new(),
            col_bcs: ColumnBcs::Separate(Vec::new()),
            fc_params: FormCompilerParameters::default(),
            appctx: AppContext::default(),
            on_diag: true,
        }
    }

    pub fn form(&self) -> &Arc<dyn BilinearForm> {
        &self.a
    }

    pub fn adjoint_form(&self) -> &Arc<dyn BilinearForm> {
        &self.a_t
    }

    pub fn test_space(&self) -> &Arc<FunctionSpace> {
        self.a.test_space()
    }

    pub fn trial_space(&self) -> &Arc<FunctionSpace> {
        self.a.trial_space()
    }

    pub fn row_bcs(&self) -> &[BoundaryCondition] {
        &self.row_bcs
    }

    pub fn col_bcs(&self) -> &[BoundaryCondition] {
        &self.col_bcs
    }

    /// Whether the column conditions were given as the row conditions.
    pub fn col_bcs_shared(&self) -> bool {
        self.col_bcs_shared
    }

    /// All essential row conditions, including those nested in equation conditions.
    pub fn essential_row_bcs(&self) -> &[DirichletBC] {
        &self.essential_row_bcs
    }

    pub fn essential_col_bcs(&self) -> &[DirichletBC] {
        &self.essential_col_bcs
    }

    pub fn row_layout(&self) -> Layout {
        self.row_layout
    }

    pub fn col_layout(&self) -> Layout {
        self.col_layout
    }

    pub fn block_size(&self) -> (usize, usize) {
        (self.row_layout.block_size, self.col_layout.block_size)
    }

    pub fn on_diagonal(&self) -> bool {
        self.on_diag
    }

    pub fn form_compiler_parameters(&self) -> &FormCompilerParameters {
        &self.fc_params
    }

    pub fn app_context(&self) -> &AppContext {
        &self.appctx
    }

    /// The number of kernels evaluated by every transpose action.
    pub fn num_transpose_kernels(&self) -> usize {
        self.assemble_action_t.len()
    }

    /// `y <- A x`
    ///
    /// Panics if the vectors do not match the shape of the operator.
    pub fn mult(&self, x: &DistributedVector, y: &mut DistributedVector) -> Result<(), Error> {
        assert_eq!(x.local_len(), self.col_layout.local_size, "Input does not match the trial space");
        assert_eq!(y.local_len(), self.row_layout.local_size, "Output does not match the test space");
        let mut ws = self.workspace.borrow_mut();
        let ws = &mut *ws;

        ws.trial.copy_from(x);
        // Constrained columns must not pollute the unconstrained rows
        for bc in &self.essential_col_bcs {
            bc.zero(&mut ws.trial);
        }

        self.assemble_action.apply(&ws.trial, &mut ws.test)?;

        if self.on_diag {
            // Identity block on the constrained rows
            for bc in &self.essential_row_bcs {
                bc.set(&mut ws.test, x);
            }
        } else {
            for bc in &self.essential_row_bcs {
                bc.zero(&mut ws.test);
            }
        }

        y.copy_from(&ws.test);
        Ok(())
    }

    /// `x <- A^T y`
    ///
    /// The rows of `A` are partitioned between the form itself and the equation conditions
    /// (each row belongs to the innermost condition constraining it), so `A^T y` is the sum of
    /// the transposed contributions of every part, each applied to `y` restricted to its own
    /// rows.
    ///
    /// Panics if the vectors do not match the shape of the operator.
    pub fn mult_transpose(&self, y: &DistributedVector, x: &mut DistributedVector) -> Result<(), Error> {
        assert_eq!(y.local_len(), self.row_layout.local_size, "Input does not match the test space");
        assert_eq!(x.local_len(), self.col_layout.local_size, "Output does not match the trial space");
        let mut ws = self.workspace.borrow_mut();
        let ws = &mut *ws;

        let mut kernels = self.assemble_action_t.iter();
        ws.trial_acc.fill(0.0);
        Self::mult_transpose_part(None, &self.row_bcs, y, ws, &mut kernels)?;
        assert!(
            kernels.next().is_none(),
            "Transpose kernels left over after traversing the condition tree"
        );

        if self.on_diag {
            for bc in &self.essential_col_bcs {
                bc.set(&mut ws.trial_acc, y);
            }
        } else {
            for bc in &self.essential_col_bcs {
                bc.zero(&mut ws.trial_acc);
            }
        }

        x.copy_from(&ws.trial_acc);
        Ok(())
    }

    /// Adds the transposed contribution of the rows owned by `owner` (all rows for the form
    /// itself) that are not claimed by `bcs`, then recurses into the equation conditions among
    /// `bcs`.
    fn mult_transpose_part(
        owner: Option<&EquationBC>,
        bcs: &[BoundaryCondition],
        y: &DistributedVector,
        ws: &mut ActionWorkspace,
        kernels: &mut slice::Iter<Box<dyn ActionKernel>>,
    ) -> Result<(), Error> {
        match owner {
            None => ws.test.copy_from(y),
            Some(ebc) => {
                // The form of an equation condition only defines the rows of the condition
                ws.test.fill(0.0);
                let test = ws.test.local_mut();
                for dof in ebc.dofs() {
                    test[dof] = y.local()[dof];
                }
            }
        }
        for bc in bcs {
            bc.zero(&mut ws.test);
        }

        let kernel = kernels
            .next()
            .expect("Transpose kernels exhausted before the condition tree was traversed");
        kernel.apply(&ws.test, &mut ws.trial)?;
        ws.trial_acc.axpy(1.0, &ws.trial);

        for bc in bcs {
            if let BoundaryCondition::Equation(ebc) = bc {
                Self::mult_transpose_part(Some(ebc), ebc.bcs(), y, ws, kernels)?;
            }
        }
        Ok(())
    }

    pub fn view(&self, viewer: Option<&mut dyn Viewer>) -> Result<(), Error> {
        match viewer {
            Some(viewer) if viewer.viewer_type() == ViewerType::Ascii => {
                viewer.print_ascii(&format!("Matrix-free operator {}\n", Self::NAME))?;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Reports the memory held by the scratch storage. Collective for the global scopes.
    pub fn get_info(&self, info: Option<InfoType>) -> Result<MatInfo, Error> {
        let memory = self.workspace.borrow().nbytes();
        let comm = self.test_space().comm();
        let memory = match info.unwrap_or_default() {
            InfoType::Local => memory,
            InfoType::GlobalSum => comm.all_reduce_sum(memory),
            InfoType::GlobalMax => comm.all_reduce_max(memory),
        };
        Ok(MatInfo { memory })
    }
}

impl ShellContext for ImplicitMatrixContext {
    fn row_layout(&self) -> Layout {
        self.row_layout
    }

    fn col_layout(&self) -> Layout {
        self.col_layout
    }

    fn block_size(&self) -> (usize, usize) {
        ImplicitMatrixContext::block_size(self)
    }

    fn mult(&self, x: &DistributedVector, y: &mut DistributedVector) -> Result<(), Error> {
        ImplicitMatrixContext::mult(self, x, y)
    }

    fn mult_transpose(&self, y: &DistributedVector, x: &mut DistributedVector) -> Result<(), Error> {
        ImplicitMatrixContext::mult_transpose(self, y, x)
    }

    fn view(&self, viewer: Option<&mut dyn Viewer>) -> Result<(), Error> {
        ImplicitMatrixContext::view(self, viewer)
    }

    fn get_info(&self, info: Option<InfoType>) -> Result<MatInfo, Error> {
        ImplicitMatrixContext::get_info(self, info)
    }

    fn create_sub_matrix(
        &self,
        row_is: &DistributedIndexSet,
        col_is: &DistributedIndexSet,
        target: Option<ShellMatrix>,
    ) -> Result<ShellMatrix, Error> {
        ImplicitMatrixContext::create_sub_matrix(self, row_is, col_is, target)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
