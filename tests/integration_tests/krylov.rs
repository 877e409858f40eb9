use crate::{dense_form, lifted_matrix};
use matfree::bcs::DirichletBC;
use matfree::comm::{Comm, ThreadCommunicator};
use matfree::context::ImplicitMatrixContext;
use matfree::krylov::{ConjugateGradient, SolveErrorKind};
use matfree::matrix::ShellMatrix;
use matfree::space::{Field, FunctionSpace};
use matfree::vector::DistributedVector;
use nalgebra::{DMatrix, DVector};
use std::sync::Arc;
use util::{assert_approx_matrix_eq, laplacian_1d};

const NODES_PER_RANK: usize = 6;

/// The 1D Laplacian on `NODES_PER_RANK` nodes per process, with homogeneous Dirichlet
/// conditions on the two end points of the global domain.
fn dirichlet_laplacian(comm: Comm) -> (Arc<FunctionSpace>, ShellMatrix, DirichletBC) {
    let num_nodes = NODES_PER_RANK * comm.size();
    let last_rank = comm.size() - 1;
    let rank = comm.rank();
    let space = FunctionSpace::new(comm, vec![Field::scalar("u", NODES_PER_RANK)]);

    let mut boundary = Vec::new();
    if rank == 0 {
        boundary.push(0);
    }
    if rank == last_rank {
        boundary.push(NODES_PER_RANK - 1);
    }
    let bc = DirichletBC::new(space.clone(), 0, boundary);
    let context = ImplicitMatrixContext::builder(dense_form(&space, &laplacian_1d(num_nodes)))
        .with_bcs([bc.clone().into()])
        .build()
        .unwrap();
    (space, ShellMatrix::new(context), bc)
}

fn solve(num_ranks: usize) -> Vec<(DVector<f64>, usize)> {
    ThreadCommunicator::run(num_ranks, |comm| {
        let (space, matrix, bc) = dirichlet_laplacian(comm);
        let mut b = DistributedVector::from_global_fn(&space, |_| 1.0);
        bc.apply(&mut b);
        let mut x = DistributedVector::zeros(&space);

        let output = ConjugateGradient::new()
            .with_operator(&matrix)
            .with_tolerance(1e-10)
            .with_max_iter(100)
            .solve_with_guess(&b, &mut x)
            .unwrap();
        (x.gather(), output.num_iterations)
    })
}

fn reference_solution(num_nodes: usize) -> DVector<f64> {
    let constrained = [0, num_nodes - 1];
    let a = lifted_matrix(&laplacian_1d(num_nodes), &constrained, &[], &DMatrix::zeros(0, 0), true);
    let mut b = DVector::repeat(num_nodes, 1.0);
    b[0] = 0.0;
    b[num_nodes - 1] = 0.0;
    a.lu().solve(&b).unwrap()
}

#[test]
fn cg_solves_dirichlet_laplacian_on_one_process() {
    let expected = reference_solution(NODES_PER_RANK);
    for (x, iterations) in solve(1) {
        assert_approx_matrix_eq!(x, expected, abstol = 1e-8);
        assert!(iterations <= NODES_PER_RANK);
    }
}

#[test]
fn cg_solves_dirichlet_laplacian_on_several_processes() {
    for num_ranks in [2, 3] {
        let num_nodes = NODES_PER_RANK * num_ranks;
        let expected = reference_solution(num_nodes);
        for (x, iterations) in solve(num_ranks) {
            assert_approx_matrix_eq!(x, expected, abstol = 1e-8);
            assert!(iterations <= num_nodes);
        }
    }
}

#[test]
fn cg_returns_zero_for_zero_right_hand_side() {
    let results = ThreadCommunicator::run(2, |comm| {
        let (space, matrix, _) = dirichlet_laplacian(comm);
        let b = DistributedVector::zeros(&space);
        let mut x = DistributedVector::from_global_fn(&space, |i| i as f64);
        let output = ConjugateGradient::new()
            .with_operator(&matrix)
            .solve_with_guess(&b, &mut x)
            .unwrap();
        (x.norm(), output.num_iterations)
    });
    for (norm, iterations) in results {
        assert_eq!(norm, 0.0);
        assert_eq!(iterations, 0);
    }
}

#[test]
fn cg_reports_exhausted_iterations() {
    let results = ThreadCommunicator::run(2, |comm| {
        let (space, matrix, _) = dirichlet_laplacian(comm);
        let b = DistributedVector::from_global_fn(&space, |_| 1.0);
        let mut x = DistributedVector::zeros(&space);
        let err = ConjugateGradient::new()
            .with_operator(&matrix)
            .with_tolerance(1e-14)
            .with_max_iter(2)
            .solve_with_guess(&b, &mut x)
            .unwrap_err();
        let exhausted = matches!(err.kind, SolveErrorKind::MaxIterationsReached { max_iter: 2 });
        (exhausted, err.output.num_iterations)
    });
    for (exhausted, iterations) in results {
        assert!(exhausted);
        assert_eq!(iterations, 2);
    }
}
