//! Boundary conditions: essential (Dirichlet) conditions and nested equation conditions.
//!
//! Conditions form trees. An [`EquationBC`] replaces the rows of the operator on its
//! degrees of freedom with the rows of its own form, and may itself carry further
//! conditions which take precedence on their own degrees of freedom. Trees are always
//! traversed in pre-order: a condition first, then its nested conditions in the order they
//! were added.
use crate::form::{action, Action, BilinearForm};
use crate::space::FunctionSpace;
use crate::vector::DistributedVector;
use std::sync::Arc;

/// The degrees of freedom a condition acts on: a set of nodes of one field of a space,
/// optionally restricted to a single vector component.
#[derive(Debug, Clone)]
struct ConstrainedDofs {
    space: Arc<FunctionSpace>,
    field: usize,
    component: Option<usize>,
    /// Local node indices within the field.
    nodes: Arc<[usize]>,
}

impl ConstrainedDofs {
    fn new(space: Arc<FunctionSpace>, field: usize, nodes: Vec<usize>) -> Self {
        assert!(
            field < space.num_fields(),
            "Field index {} out of bounds for space with {} fields",
            field,
            space.num_fields()
        );
        let local_nodes = space.field(field).local_nodes();
        assert!(
            nodes.iter().all(|&node| node < local_nodes),
            "Node index out of bounds for field with {} local nodes",
            local_nodes
        );
        Self {
            space,
            field,
            component: None,
            nodes: nodes.into(),
        }
    }

    fn with_component(self, component: usize) -> Self {
        let block_size = self.space.field(self.field).block_size();
        assert!(
            component < block_size,
            "Component {} out of bounds for block size {}",
            component,
            block_size
        );
        Self {
            component: Some(component),
            ..self
        }
    }

    fn dofs(&self) -> impl Iterator<Item = usize> + '_ {
        let offset = self.space.field_local_range(self.field).start;
        let block_size = self.space.field(self.field).block_size();
        let components = match self.component {
            Some(c) => c..c + 1,
            None => 0..block_size,
        };
        self.nodes
            .iter()
            .flat_map(move |&node| components.clone().map(move |c| offset + node * block_size + c))
    }

    fn check_vector(&self, vector: &DistributedVector) {
        assert_eq!(
            vector.local_len(),
            self.space.layout().local_size,
            "Vector does not live on the space of the boundary condition"
        );
    }

    fn zero(&self, target: &mut DistributedVector) {
        self.check_vector(target);
        let target = target.local_mut();
        for dof in self.dofs() {
            target[dof] = 0.0;
        }
    }

    /// The same dofs on a space built from the fields `selection` of the current space.
    ///
    /// Returns `None` if the field is not part of the selection.
    fn restrict(&self, selection: &[usize], space: &Arc<FunctionSpace>) -> Option<Self> {
        let position = selection.iter().position(|&field| field == self.field)?;
        Some(Self {
            space: Arc::clone(space),
            field: position,
            component: self.component,
            nodes: Arc::clone(&self.nodes),
        })
    }
}

/// An essential condition fixing the selected degrees of freedom to a prescribed value.
#[derive(Debug, Clone)]
pub struct DirichletBC {
    dofs: ConstrainedDofs,
    value: f64,
}

impl DirichletBC {
    /// A homogeneous condition on the given local nodes of `field`.
    ///
    /// Panics if the field or any of the nodes are out of bounds.
    pub fn new(space: Arc<FunctionSpace>, field: usize, nodes: impl Into<Vec<usize>>) -> Self {
        Self {
            dofs: ConstrainedDofs::new(space, field, nodes.into()),
            value: 0.0,
        }
    }

    /// Restricts the condition to one component of a vector-valued field.
    pub fn with_component(self, component: usize) -> Self {
        Self {
            dofs: self.dofs.with_component(component),
            ..self
        }
    }

    pub fn with_value(self, value: f64) -> Self {
        Self { value, ..self }
    }

    pub fn function_space(&self) -> &Arc<FunctionSpace> {
        &self.dofs.space
    }

    pub fn field(&self) -> usize {
        self.dofs.field
    }

    pub fn component(&self) -> Option<usize> {
        self.dofs.component
    }

    pub fn nodes(&self) -> &[usize] {
        &self.dofs.nodes
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Positions of the constrained dofs within the local part of a vector.
    pub fn dofs(&self) -> impl Iterator<Item = usize> + '_ {
        self.dofs.dofs()
    }

    /// Sets the constrained entries of `target` to zero.
    pub fn zero(&self, target: &mut DistributedVector) {
        self.dofs.zero(target);
    }

    /// Copies the constrained entries of `source` into `target`.
    pub fn set(&self, target: &mut DistributedVector, source: &DistributedVector) {
        self.dofs.check_vector(target);
        self.dofs.check_vector(source);
        let source = source.local();
        let target = target.local_mut();
        for dof in self.dofs() {
            target[dof] = source[dof];
        }
    }

    /// Sets the constrained entries of `target` to the prescribed value.
    pub fn apply(&self, target: &mut DistributedVector) {
        self.dofs.check_vector(target);
        let target = target.local_mut();
        for dof in self.dofs.dofs() {
            target[dof] = self.value;
        }
    }

    /// The same condition on the space made of the fields `selection` of the current space.
    ///
    /// Returns `None` if the constrained field is not selected.
    pub fn restrict(&self, selection: &[usize], space: &Arc<FunctionSpace>) -> Option<Self> {
        Some(Self {
            dofs: self.dofs.restrict(selection, space)?,
            value: self.value,
        })
    }
}

/// The form defining an equation condition.
#[derive(Debug, Clone)]
pub enum EquationForm {
    Bilinear(Arc<dyn BilinearForm>),
    /// The action of the bilinear form on the input of the operator being evaluated.
    Action(Action),
}

impl EquationForm {
    /// The underlying bilinear form.
    pub fn bilinear(&self) -> &Arc<dyn BilinearForm> {
        match self {
            Self::Bilinear(form) => form,
            Self::Action(action) => action.form(),
        }
    }
}

/// A condition defined by a form whose zero level-set is the constraint.
///
/// The rows of the operator on the selected degrees of freedom are the rows of the condition's
/// own form, except where nested conditions constrain them further.
#[derive(Debug, Clone)]
pub struct EquationBC {
    form: EquationForm,
    dofs: ConstrainedDofs,
    bcs: Vec<BoundaryCondition>,
}

impl EquationBC {
    /// A condition on the given local nodes of `field` of the test space of `form`.
    ///
    /// Panics if the field or any of the nodes are out of bounds.
    pub fn new(form: Arc<dyn BilinearForm>, field: usize, nodes: impl Into<Vec<usize>>) -> Self {
        let space = Arc::clone(form.test_space());
        Self {
            form: EquationForm::Bilinear(form),
            dofs: ConstrainedDofs::new(space, field, nodes.into()),
            bcs: Vec::new(),
        }
    }

    pub fn with_component(self, component: usize) -> Self {
        Self {
            dofs: self.dofs.with_component(component),
            ..self
        }
    }

    /// Adds a nested condition constraining this condition's equation.
    pub fn with_bc(mut self, bc: impl Into<BoundaryCondition>) -> Self {
        self.add(bc);
        self
    }

    pub fn add(&mut self, bc: impl Into<BoundaryCondition>) {
        self.bcs.push(bc.into());
    }

    pub fn form(&self) -> &EquationForm {
        &self.form
    }

    pub fn bcs(&self) -> &[BoundaryCondition] {
        &self.bcs
    }

    pub fn function_space(&self) -> &Arc<FunctionSpace> {
        &self.dofs.space
    }

    pub fn field(&self) -> usize {
        self.dofs.field
    }

    pub fn component(&self) -> Option<usize> {
        self.dofs.component
    }

    pub fn nodes(&self) -> &[usize] {
        &self.dofs.nodes
    }

    pub fn dofs(&self) -> impl Iterator<Item = usize> + '_ {
        self.dofs.dofs()
    }

    /// Sets the entries of `target` on the rows of this condition to zero.
    pub fn zero(&self, target: &mut DistributedVector) {
        self.dofs.zero(target);
    }

    /// The same tree with every equation form replaced by its action.
    pub fn action_transform(&self) -> EquationBC {
        let bcs = self
            .bcs
            .iter()
            .map(|bc| match bc {
                BoundaryCondition::Dirichlet(_) => bc.clone(),
                BoundaryCondition::Equation(ebc) => ebc.action_transform().into(),
            })
            .collect();
        EquationBC {
            form: EquationForm::Action(action(Arc::clone(self.form.bilinear()))),
            dofs: self.dofs.clone(),
            bcs,
        }
    }

    /// The same tree restricted to a coupled-field sub-block.
    ///
    /// `selection` are the fields of the condition's space which make up `space`, while the
    /// defining form is split into the block coupling `row_fields` to `col_fields`. Nested
    /// conditions on unselected fields are dropped. Returns `Ok(None)` if the condition's own
    /// field is not selected.
    pub fn restrict(
        &self,
        selection: &[usize],
        row_fields: &[usize],
        col_fields: &[usize],
        space: &Arc<FunctionSpace>,
    ) -> eyre::Result<Option<EquationBC>> {
        let dofs = match self.dofs.restrict(selection, space) {
            Some(dofs) => dofs,
            None => return Ok(None),
        };
        let sub_form = self.form.bilinear().split(row_fields, col_fields)?;
        let form = match &self.form {
            EquationForm::Bilinear(_) => EquationForm::Bilinear(sub_form),
            EquationForm::Action(_) => EquationForm::Action(action(sub_form)),
        };
        let bcs = restrict_bcs(&self.bcs, selection, row_fields, col_fields, space)?;
        Ok(Some(EquationBC { form, dofs, bcs }))
    }
}

/// A boundary condition of either kind.
#[derive(Debug, Clone)]
pub enum BoundaryCondition {
    Dirichlet(DirichletBC),
    Equation(EquationBC),
}

impl From<DirichletBC> for BoundaryCondition {
    fn from(bc: DirichletBC) -> Self {
        Self::Dirichlet(bc)
    }
}

impl From<EquationBC> for BoundaryCondition {
    fn from(bc: EquationBC) -> Self {
        Self::Equation(bc)
    }
}

impl BoundaryCondition {
    pub fn function_space(&self) -> &Arc<FunctionSpace> {
        match self {
            Self::Dirichlet(bc) => bc.function_space(),
            Self::Equation(bc) => bc.function_space(),
        }
    }

    pub fn zero(&self, target: &mut DistributedVector) {
        match self {
            Self::Dirichlet(bc) => bc.zero(target),
            Self::Equation(bc) => bc.zero(target),
        }
    }

    pub fn as_dirichlet(&self) -> Option<&DirichletBC> {
        match self {
            Self::Dirichlet(bc) => Some(bc),
            Self::Equation(_) => None,
        }
    }

    pub fn as_equation(&self) -> Option<&EquationBC> {
        match self {
            Self::Dirichlet(_) => None,
            Self::Equation(bc) => Some(bc),
        }
    }

    /// Iterates over this condition and all nested conditions in pre-order.
    pub fn iter(&self) -> Iter<'_> {
        Iter { stack: vec![self] }
    }

    /// See [`EquationBC::restrict`] and [`DirichletBC::restrict`].
    pub fn restrict(
        &self,
        selection: &[usize],
        row_fields: &[usize],
        col_fields: &[usize],
        space: &Arc<FunctionSpace>,
    ) -> eyre::Result<Option<BoundaryCondition>> {
        match self {
            Self::Dirichlet(bc) => Ok(bc.restrict(selection, space).map(Into::into)),
            Self::Equation(bc) => Ok(bc
                .restrict(selection, row_fields, col_fields, space)?
                .map(Into::into)),
        }
    }
}

/// Pre-order iterator over condition trees.
#[derive(Debug, Clone)]
pub struct Iter<'a> {
    stack: Vec<&'a BoundaryCondition>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a BoundaryCondition;

    fn next(&mut self) -> Option<Self::Item> {
        let bc = self.stack.pop()?;
        if let BoundaryCondition::Equation(ebc) = bc {
            self.stack.extend(ebc.bcs.iter().rev());
        }
        Some(bc)
    }
}

/// Iterates over all conditions of a forest in pre-order.
pub fn iter_tree(bcs: &[BoundaryCondition]) -> Iter<'_> {
    Iter {
        stack: bcs.iter().rev().collect(),
    }
}

/// All essential conditions of a forest, including those nested in equation conditions.
pub fn dirichlet_bcs(bcs: &[BoundaryCondition]) -> Vec<DirichletBC> {
    iter_tree(bcs)
        .filter_map(BoundaryCondition::as_dirichlet)
        .cloned()
        .collect()
}

/// All equation conditions of a forest, in pre-order.
pub fn equation_bcs(bcs: &[BoundaryCondition]) -> Vec<&EquationBC> {
    iter_tree(bcs)
        .filter_map(BoundaryCondition::as_equation)
        .collect()
}

/// Restricts every condition of a forest, dropping those on unselected fields.
pub fn restrict_bcs(
    bcs: &[BoundaryCondition],
    selection: &[usize],
    row_fields: &[usize],
    col_fields: &[usize],
    space: &Arc<FunctionSpace>,
) -> eyre::Result<Vec<BoundaryCondition>> {
    let mut restricted = Vec::new();
    for bc in bcs {
        if let Some(bc) = bc.restrict(selection, row_fields, col_fields, space)? {
            restricted.push(bc);
        }
    }
    Ok(restricted)
}
