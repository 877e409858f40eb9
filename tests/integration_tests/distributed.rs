use crate::{
    dense_form, distributed_mixed_space, global_dofs, lifted_matrix, sample_global, sample_vector, test_matrix,
};
use matfree::bcs::{BoundaryCondition, DirichletBC, EquationBC};
use matfree::comm::{Comm, ThreadCommunicator};
use matfree::context::ImplicitMatrixContext;
use matfree::error::Error;
use matfree::index_set::{find_sub_block, DistributedIndexSet};
use matfree::matrix::{InfoType, ShellMatrix};
use matfree::space::{Field, FunctionSpace};
use matfree::vector::DistributedVector;
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;

const NUM_RANKS: usize = 3;
const GLOBAL_SIZE: usize = 27;

/// Builds the coupled operator on every rank:
///
/// ```text
/// Dirichlet velocity {node 0}
/// Equation(b) temperature {0, 1}
///     Dirichlet temperature {1}
/// ```
///
/// The nodes are local, so every rank constrains its own copies.
fn coupled_operator(comm: Comm) -> ShellMatrix {
    let space = distributed_mixed_space(comm);
    let a = dense_form(&space, &test_matrix(GLOBAL_SIZE, 0));
    let b = dense_form(&space, &test_matrix(GLOBAL_SIZE, 1));
    let ebc = EquationBC::new(b, 2, vec![0, 1]).with_bc(DirichletBC::new(space.clone(), 2, vec![1]));
    let bcs: Vec<BoundaryCondition> = vec![DirichletBC::new(space.clone(), 0, vec![0]).into(), ebc.into()];
    ShellMatrix::new(ImplicitMatrixContext::builder(a).with_bcs(bcs).build().unwrap())
}

fn expected_operator() -> DMatrix<f64> {
    ThreadCommunicator::run(NUM_RANKS, |comm| {
        let space = distributed_mixed_space(comm);
        let mut constrained = global_dofs(&space, 0, |_| vec![0, 1]);
        constrained.extend(global_dofs(&space, 2, |_| vec![1]));
        let equation_rows = global_dofs(&space, 2, |_| vec![0, 1]);
        lifted_matrix(
            &test_matrix(GLOBAL_SIZE, 0),
            &constrained,
            &equation_rows,
            &test_matrix(GLOBAL_SIZE, 1),
            true,
        )
    })
    .remove(0)
}

#[test]
fn distributed_mult_matches_explicit_operator() {
    let results = ThreadCommunicator::run(NUM_RANKS, |comm| {
        let matrix = coupled_operator(comm);
        let context = matrix.context_as::<ImplicitMatrixContext>().unwrap();
        let space = context.test_space().clone();
        assert_eq!(space.layout().global_size, GLOBAL_SIZE);

        let x = sample_vector(&space);
        let mut y = DistributedVector::zeros(&space);
        let mut z = DistributedVector::zeros(&space);
        matrix.mult(&x, &mut y).unwrap();
        matrix.mult_transpose(&x, &mut z).unwrap();
        (y.gather(), z.gather())
    });

    let expected = expected_operator();
    let x = sample_global(GLOBAL_SIZE);
    for (y, z) in results {
        assert_matrix_eq!(y, &expected * &x, comp = abs, tol = 1e-10);
        assert_matrix_eq!(z, expected.transpose() * &x, comp = abs, tol = 1e-10);
    }
}

#[test]
fn distributed_result_is_independent_of_process_count() {
    let x = sample_global(GLOBAL_SIZE);
    // A single process holding the same global system
    let serial = ThreadCommunicator::run(1, |comm| {
        let space = FunctionSpace::new(comm, vec![Field::scalar("u", GLOBAL_SIZE)]);
        let a = dense_form(&space, &test_matrix(GLOBAL_SIZE, 0));
        let context = ImplicitMatrixContext::builder(a).build().unwrap();
        let mut y = DistributedVector::zeros(&space);
        context.mult(&DistributedVector::from_local(&space, x.clone()), &mut y).unwrap();
        y.gather()
    });
    let distributed = ThreadCommunicator::run(NUM_RANKS, |comm| {
        let space = distributed_mixed_space(comm);
        let a = dense_form(&space, &test_matrix(GLOBAL_SIZE, 0));
        let context = ImplicitMatrixContext::builder(a).build().unwrap();
        let mut y = DistributedVector::zeros(&space);
        context.mult(&sample_vector(&space), &mut y).unwrap();
        y.gather()
    });

    for y in distributed {
        assert_matrix_eq!(y, serial[0], comp = abs, tol = 1e-12);
    }
}

#[test]
fn get_info_reduces_over_processes() {
    let results = ThreadCommunicator::run(NUM_RANKS, |comm| {
        let matrix = coupled_operator(comm);
        let local = matrix.get_info(Some(InfoType::Local)).unwrap().memory;
        let max = matrix.get_info(Some(InfoType::GlobalMax)).unwrap().memory;
        let sum = matrix.get_info(Some(InfoType::GlobalSum)).unwrap().memory;
        let default = matrix.get_info(None).unwrap().memory;
        (local, max, sum, default)
    });

    let locals: Vec<usize> = results.iter().map(|&(local, ..)| local).collect();
    // Local sizes differ, hence so does the scratch memory
    assert!(locals[0] < locals[1] && locals[1] < locals[2]);
    for &(_, max, sum, default) in &results {
        assert_eq!(max, locals[2]);
        assert_eq!(sum, locals.iter().sum::<usize>());
        assert_eq!(default, sum);
    }
}

#[test]
fn find_sub_block_on_distributed_fields() {
    let results = ThreadCommunicator::run(NUM_RANKS, |comm| {
        let space = distributed_mixed_space(comm);
        let fields = space.field_index_sets();
        let whole = find_sub_block(&space.index_set(), fields).unwrap();
        let reordered = DistributedIndexSet::concatenate([&fields[2], &fields[0]]);
        let reordered = find_sub_block(&reordered, fields).unwrap();
        (whole, reordered)
    });
    for (whole, reordered) in results {
        assert_eq!(whole, vec![0, 1, 2]);
        assert_eq!(reordered, vec![2, 0]);
    }
}

#[test]
fn find_sub_block_requires_agreement_of_all_processes() {
    let results = ThreadCommunicator::run(NUM_RANKS, |comm| {
        let space = distributed_mixed_space(Arc::clone(&comm));
        let fields = space.field_index_sets();
        // Equal to the velocity field on rank 0 only
        let partial = if comm.rank() == 0 {
            fields[0].indices().to_vec()
        } else {
            vec![usize::MAX]
        };
        let candidates = [DistributedIndexSet::new(Arc::clone(&comm), partial), fields[1].clone()];
        let target = DistributedIndexSet::concatenate([&fields[0], &fields[1]]);
        find_sub_block(&target, &candidates)
    });
    for result in results {
        assert!(matches!(result, Err(Error::FieldDecompositionNotFound { matched, .. }) if matched.is_empty()));
    }
}

#[test]
fn distributed_sub_block_matches_explicit_block() {
    let results = ThreadCommunicator::run(NUM_RANKS, |comm| {
        let matrix = coupled_operator(comm);
        let context = matrix.context_as::<ImplicitMatrixContext>().unwrap();
        let space = context.test_space().clone();
        let temperature = global_dofs(&space, 2, |rank| (0..rank + 2).collect());

        let is = &space.field_index_sets()[2];
        let sub = matrix.create_sub_matrix(is, is, None).unwrap();
        let sub_space = sub.context_as::<ImplicitMatrixContext>().unwrap().test_space().clone();
        let x = DistributedVector::from_global_fn(&sub_space, |i| i as f64 - 4.0);
        let mut y = DistributedVector::zeros(&sub_space);
        sub.mult(&x, &mut y).unwrap();
        (temperature, y.gather())
    });

    let expected = expected_operator();
    for (temperature, y) in results {
        let n = temperature.len();
        assert_eq!(n, 9);
        let block = DMatrix::from_fn(n, n, |i, j| expected[(temperature[i], temperature[j])]);
        let x = DVector::from_fn(n, |i, _| i as f64 - 4.0);
        assert_matrix_eq!(y, &block * &x, comp = abs, tol = 1e-10);
    }
}

#[test]
fn empty_process_group_is_rejected() {
    util::assert_panics!(ThreadCommunicator::group(0));
}
