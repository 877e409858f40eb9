use crate::{
    dense_mult, dense_mult_transpose, lifted_matrix, matrix_form, mixed_space, serial, test_matrix, EquationRows,
};
use matfree::appctx::AppContext;
use matfree::bcs::{BoundaryCondition, DirichletBC, EquationBC};
use matfree::context::ImplicitMatrixContext;
use matfree::error::Error;
use matfree::form::FormCompilerParameters;
use matfree::index_set::DistributedIndexSet;
use matfree::matrix::ShellMatrix;
use matrixcompare::assert_matrix_eq;
use nalgebra::DMatrix;
use std::ops::Range;

/// Global dof ranges of the fields of [`mixed_space`] on a single process.
const FIELD_RANGES: [Range<usize>; 3] = [0..6, 6..8, 8..12];

fn field_block(m: &DMatrix<f64>, row_fields: &[usize], col_fields: &[usize]) -> DMatrix<f64> {
    let rows: Vec<usize> = row_fields.iter().flat_map(|&f| FIELD_RANGES[f].clone()).collect();
    let cols: Vec<usize> = col_fields.iter().flat_map(|&f| FIELD_RANGES[f].clone()).collect();
    DMatrix::from_fn(rows.len(), cols.len(), |i, j| m[(rows[i], cols[j])])
}

/// An operator on the mixed space with conditions on every field:
///
/// ```text
/// Dirichlet velocity {node 1}
/// Equation(b) temperature {1, 2, 3}
///     Dirichlet temperature {3}
/// Dirichlet pressure {0}
/// ```
fn coupled_operator() -> (ShellMatrix, DMatrix<f64>) {
    let space = mixed_space(serial());
    let b = matrix_form(&space, &space, 1);
    let ebc = EquationBC::new(b, 2, vec![1, 2, 3]).with_bc(DirichletBC::new(space.clone(), 2, vec![3]));
    let bcs: Vec<BoundaryCondition> = vec![
        DirichletBC::new(space.clone(), 0, vec![1]).into(),
        ebc.into(),
        DirichletBC::new(space.clone(), 1, vec![0]).into(),
    ];
    let context = ImplicitMatrixContext::builder(matrix_form(&space, &space, 0))
        .with_bcs(bcs)
        .with_app_context(AppContext::new().with("name", String::from("coupled")))
        .with_form_compiler_parameters(FormCompilerParameters::default().with_quadrature_degree(2))
        .build()
        .unwrap();

    let constrained = [2, 3, 11, 6];
    let equations = [EquationRows {
        rows: vec![9, 10, 11],
        matrix: test_matrix(12, 12, 1),
    }];
    let expected = lifted_matrix(&test_matrix(12, 12, 0), &constrained, &constrained, &equations, true);
    (ShellMatrix::new(context), expected)
}

fn fields_index_set(matrix: &ShellMatrix, fields: &[usize]) -> DistributedIndexSet {
    let context = matrix.context_as::<ImplicitMatrixContext>().unwrap();
    let sets = context.test_space().field_index_sets();
    DistributedIndexSet::concatenate(fields.iter().map(|&f| &sets[f]))
}

fn sub_context(matrix: &ShellMatrix) -> &ImplicitMatrixContext {
    matrix.context_as::<ImplicitMatrixContext>().unwrap()
}

#[test]
fn single_field_sub_block_has_field_shape() {
    let (matrix, _) = coupled_operator();
    let is = fields_index_set(&matrix, &[1]);
    let sub = matrix.create_sub_matrix(&is, &is, None).unwrap();

    assert_eq!(sub.row_layout().global_size, 2);
    assert_eq!(sub.row_layout().local_size, 2);
    assert_eq!(sub.col_layout().global_size, 2);
    assert_eq!(sub.col_layout().local_size, 2);
}

#[test]
fn every_field_block_matches_explicit_operator() {
    let (matrix, expected) = coupled_operator();
    for row_field in 0..3 {
        for col_field in 0..3 {
            let row_is = fields_index_set(&matrix, &[row_field]);
            let col_is = fields_index_set(&matrix, &[col_field]);
            let sub = matrix.create_sub_matrix(&row_is, &col_is, None).unwrap();
            let context = sub_context(&sub);

            assert_eq!(context.on_diagonal(), row_field == col_field);
            let block = field_block(&expected, &[row_field], &[col_field]);
            assert_matrix_eq!(dense_mult(context), block, comp = abs, tol = 1e-12);
            assert_matrix_eq!(dense_mult_transpose(context), block.transpose(), comp = abs, tol = 1e-12);
        }
    }
}

#[test]
fn multi_field_block_matches_explicit_operator() {
    let (matrix, expected) = coupled_operator();
    let row_is = fields_index_set(&matrix, &[2, 1]);
    let col_is = fields_index_set(&matrix, &[0]);
    let sub = matrix.create_sub_matrix(&row_is, &col_is, None).unwrap();
    let block = field_block(&expected, &[2, 1], &[0]);
    assert_matrix_eq!(dense_mult(sub_context(&sub)), block, comp = abs, tol = 1e-12);

    let diagonal_is = fields_index_set(&matrix, &[2, 1]);
    let sub = matrix.create_sub_matrix(&row_is, &diagonal_is, None).unwrap();
    let block = field_block(&expected, &[2, 1], &[2, 1]);
    assert!(sub_context(&sub).on_diagonal());
    assert_matrix_eq!(dense_mult(sub_context(&sub)), block, comp = abs, tol = 1e-12);
}

#[test]
fn sub_block_restricts_condition_tree() {
    let (matrix, _) = coupled_operator();
    let is = fields_index_set(&matrix, &[2]);
    let sub = matrix.create_sub_matrix(&is, &is, None).unwrap();
    let context = sub_context(&sub);

    // Only the equation condition on temperature and its nested condition survive
    assert_eq!(context.row_bcs().len(), 1);
    assert!(context.row_bcs()[0].as_equation().is_some());
    assert_eq!(context.essential_row_bcs().len(), 1);
    assert_eq!(context.num_transpose_kernels(), 2);
    assert!(context.col_bcs_shared());
}

#[test]
fn sub_block_forwards_parameters_and_app_context() {
    let (matrix, _) = coupled_operator();
    let row_is = fields_index_set(&matrix, &[0]);
    let col_is = fields_index_set(&matrix, &[2]);
    let sub = matrix.create_sub_matrix(&row_is, &col_is, None).unwrap();
    let context = sub_context(&sub);

    assert_eq!(context.app_context().get::<String>("name").map(String::as_str), Some("coupled"));
    assert_eq!(context.form_compiler_parameters().quadrature_degree, Some(2));
    assert!(!context.col_bcs_shared());
}

#[test]
fn sub_block_of_sub_block() {
    let (matrix, expected) = coupled_operator();
    let is = fields_index_set(&matrix, &[1, 2]);
    let sub = matrix.create_sub_matrix(&is, &is, None).unwrap();

    // Temperature is the second field of the sub-block
    let inner_is = fields_index_set(&sub, &[1]);
    let inner = sub.create_sub_matrix(&inner_is, &inner_is, None).unwrap();
    let block = field_block(&expected, &[2], &[2]);
    assert_matrix_eq!(dense_mult(sub_context(&inner)), block, comp = abs, tol = 1e-12);
}

#[test]
fn refresh_marks_existing_target_as_assembled() {
    let (matrix, _) = coupled_operator();
    let is = fields_index_set(&matrix, &[0]);
    let sub = matrix.create_sub_matrix(&is, &is, None).unwrap();
    assert_eq!(sub.assembly_state(), 0);

    let sub = matrix.create_sub_matrix(&is, &is, Some(sub)).unwrap();
    assert_eq!(sub.assembly_state(), 1);
    let sub = matrix.create_sub_matrix(&is, &is, Some(sub)).unwrap();
    assert_eq!(sub.assembly_state(), 2);
}

#[test]
fn refresh_rejects_target_of_other_shape() {
    let (matrix, _) = coupled_operator();
    let velocity = fields_index_set(&matrix, &[0]);
    let pressure = fields_index_set(&matrix, &[1]);
    let sub = matrix.create_sub_matrix(&velocity, &velocity, None).unwrap();

    let result = matrix.create_sub_matrix(&pressure, &pressure, Some(sub));
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn sub_block_of_inconsistent_index_set_fails() {
    let (matrix, _) = coupled_operator();
    let is = DistributedIndexSet::new(serial(), vec![6, 8]);
    let result = matrix.create_sub_matrix(&is, &is, None);
    assert!(matches!(result, Err(Error::FieldDecompositionNotFound { .. })));
}

#[test]
fn sub_block_of_empty_index_set_fails() {
    let (matrix, _) = coupled_operator();
    let empty = DistributedIndexSet::new(serial(), vec![]);
    let velocity = fields_index_set(&matrix, &[0]);

    let result = matrix.create_sub_matrix(&empty, &empty, None);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    let result = matrix.create_sub_matrix(&velocity, &empty, None);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}
