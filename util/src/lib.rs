use nalgebra::{DMatrix, DVector};

/// Poor man's approx assertion for matrices and vectors
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = &$x - &$y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

#[macro_export]
macro_rules! assert_panics {
    ($e:expr) => {{
        use std::panic::catch_unwind;
        use std::stringify;
        let expr_string = stringify!($e);
        let result = catch_unwind(|| $e);
        if result.is_ok() {
            panic!("assert_panics!({}) failed.", expr_string);
        }
    }};
}

/// The `i`-th standard basis vector of dimension `n`.
pub fn unit_vector(n: usize, i: usize) -> DVector<f64> {
    let mut e = DVector::zeros(n);
    e[i] = 1.0;
    e
}

/// Reconstructs the dense matrix of a linear operator from its action on the standard basis.
pub fn dense_from_action(
    nrows: usize,
    ncols: usize,
    mut action: impl FnMut(&DVector<f64>) -> DVector<f64>,
) -> DMatrix<f64> {
    let mut matrix = DMatrix::zeros(nrows, ncols);
    for j in 0..ncols {
        let column = action(&unit_vector(ncols, j));
        assert_eq!(column.len(), nrows, "Action returned a vector of unexpected length");
        matrix.column_mut(j).copy_from(&column);
    }
    matrix
}

/// Dense matrix of the 1D Laplacian stencil `[-1, 2, -1]` with `n` unknowns.
pub fn laplacian_1d(n: usize) -> DMatrix<f64> {
    DMatrix::from_fn(n, n, |i, j| match (i as isize - j as isize).abs() {
        0 => 2.0,
        1 => -1.0,
        _ => 0.0,
    })
}
