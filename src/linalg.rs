//! Dense linear algebra on `ndarray` matrices
//!
//! Solves go through an LU decomposition with partial pivoting from `nalgebra`; everything else
//! works on `ndarray` arrays directly.

use crate::errors::*;
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, Axis};
use std::collections::VecDeque;

fn to_nalgebra(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Solve $A x = b$ for `x`
pub fn solve(a: &Array2<f64>, b: &Array1<f64>, context: &'static str) -> Result<Array1<f64>> {
    if a.nrows() != b.len() {
        return Err(AnalysisError::ArrayLengthMismatch(b.len(), a.nrows()));
    }
    let rhs = DVector::from_iterator(b.len(), b.iter().copied());
    let x = to_nalgebra(a)
        .lu()
        .solve(&rhs)
        .ok_or(AnalysisError::SingularMatrix(context))?;
    if x.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::SingularMatrix(context));
    }
    Ok(x.iter().copied().collect())
}

/// Solve $A X = B$ for `X`, one column of `B` at a time
pub fn solve_columns(
    a: &Array2<f64>,
    b: &Array2<f64>,
    context: &'static str,
) -> Result<Array2<f64>> {
    if a.nrows() != b.nrows() {
        return Err(AnalysisError::ArrayLengthMismatch(b.nrows(), a.nrows()));
    }
    let rhs = to_nalgebra(b);
    let x = to_nalgebra(a)
        .lu()
        .solve(&rhs)
        .ok_or(AnalysisError::SingularMatrix(context))?;
    if x.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::SingularMatrix(context));
    }
    Ok(Array2::from_shape_fn((x.nrows(), x.ncols()), |(i, j)| {
        x[(i, j)]
    }))
}

/// Raise a square matrix to a non-negative integer power by repeated squaring
pub fn matrix_power(m: &Array2<f64>, mut exponent: u32) -> Array2<f64> {
    let mut result = Array2::eye(m.nrows());
    let mut base = m.clone();
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = result.dot(&base);
        }
        exponent >>= 1;
        if exponent > 0 {
            base = base.dot(&base);
        }
    }
    result
}

/// Copy of `m` restricted to the rows and columns listed in `keep`, in that order
pub fn submatrix(m: &Array2<f64>, keep: &[usize]) -> Array2<f64> {
    m.select(Axis(0), keep).select(Axis(1), keep)
}

/// Set every diagonal element to minus the sum of the off-diagonal elements of its row
pub fn set_diagonal_to_negative_row_sum(q: &mut Array2<f64>) {
    for i in 0..q.nrows() {
        q[[i, i]] = 0.0;
        let row_sum = q.row(i).sum();
        q[[i, i]] = -row_sum;
    }
}

/// Check that every node can reach a target node along edges with positive weight
///
/// `weights[[i, j]] > 0` is an edge from `i` to `j`. Nodes with `target[i] == true` are the
/// absorbing set. The first node that cannot reach it is reported.
pub fn check_reachable(
    weights: &Array2<f64>,
    target: &[bool],
    labels: &[usize],
    context: &'static str,
) -> Result<()> {
    let n = weights.nrows();
    let mut reached: Vec<bool> = target.to_vec();
    let mut queue: VecDeque<usize> = (0..n).filter(|&i| target[i]).collect();

    // Walk edges backwards from the targets
    while let Some(j) = queue.pop_front() {
        for i in 0..n {
            if !reached[i] && weights[[i, j]] > 0.0 {
                reached[i] = true;
                queue.push_back(i);
            }
        }
    }

    match reached.iter().position(|&r| !r) {
        Some(i) => Err(AnalysisError::Unreachable {
            milestone: labels[i],
            context,
        }),
        None => Ok(()),
    }
}

/// Arithmetic mean; zero for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population standard deviation; zero for an empty slice or identical values
pub fn std_dev(values: &[f64]) -> f64 {
    match values.first() {
        None => 0.0,
        Some(first) if values.iter().all(|v| v == first) => 0.0,
        Some(_) => {
            let mu = mean(values);
            let variance =
                values.iter().map(|v| (v - mu) * (v - mu)).sum::<f64>() / values.len() as f64;
            variance.sqrt()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn solve_small_system() {
        let a = array![[4.0, 1.0], [2.0, 3.0]];
        let x = solve(&a, &array![1.0, 2.0], "test").unwrap();
        assert_relative_eq!(x[0], 0.1, epsilon = 1e-12);
        assert_relative_eq!(x[1], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn singular_system_is_an_error() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(matches!(
            solve(&a, &array![1.0, 2.0], "test"),
            Err(AnalysisError::SingularMatrix("test"))
        ));
    }

    #[test]
    fn power_by_squaring() {
        let m = array![[0.0, 1.0], [1.0, 1.0]];
        let m10 = matrix_power(&m, 10);
        // Fibonacci numbers
        assert_eq!(m10, array![[34.0, 55.0], [55.0, 89.0]]);
        assert_eq!(matrix_power(&m, 0), Array2::<f64>::eye(2));
    }

    #[test]
    fn reachability() {
        let w = array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 0.0]];
        assert!(check_reachable(&w, &[true, false, false], &[5, 6, 7], "test").is_err());
        match check_reachable(&w, &[true, false, false], &[5, 6, 7], "test") {
            Err(AnalysisError::Unreachable { milestone: 7, .. }) => {}
            other => panic!("unexpected result {:?}", other),
        }
        assert!(check_reachable(&w, &[false, true, true], &[5, 6, 7], "test").is_ok());
    }

    #[test]
    fn row_sums() {
        let mut q = array![[5.0, 1.0, 2.0], [0.5, 0.0, 0.5], [0.0, 3.0, 9.0]];
        set_diagonal_to_negative_row_sum(&mut q);
        for row in q.axis_iter(Axis(0)) {
            assert_relative_eq!(row.sum(), 0.0);
        }
        assert_eq!(q[[0, 0]], -3.0);
    }

    #[test]
    fn population_statistics() {
        assert_relative_eq!(std_dev(&[1.0, 3.0]), 1.0);
        assert_eq!(std_dev(&[f64::INFINITY, f64::INFINITY]), 0.0);
        assert_eq!(std_dev(&[]), 0.0);
        assert_relative_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
    }
}
