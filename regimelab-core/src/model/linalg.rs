//! Small dense solvers for the normal equations.

use super::ModelError;
use ndarray::{Array1, Array2};

/// Relative pivot threshold below which a system is treated as singular.
const PIVOT_TOLERANCE: f64 = 1e-12;

/// Solve `a · x = b` for symmetric positive-definite `a` via Cholesky.
pub fn solve_symmetric(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, ModelError> {
    let n = a.nrows();
    if a.ncols() != n || b.len() != n {
        return Err(ModelError::Singular {
            reason: format!("shape mismatch: {}x{} vs {}", a.nrows(), a.ncols(), b.len()),
        });
    }
    let scale = (0..n).map(|i| a[[i, i]].abs()).fold(1.0_f64, f64::max);

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > PIVOT_TOLERANCE * scale) {
                    return Err(ModelError::Singular {
                        reason: format!("non-positive pivot at column {i}"),
                    });
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }

    // Forward substitution: L y = b
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }
    // Back substitution: Lᵀ x = y
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = y[i];
        for k in i + 1..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    Ok(x)
}

/// Ridge regression `(XᵀX + λ·P)⁻¹ Xᵀy`, where `P` is the identity with the
/// intercept column (column 0) unpenalized when `intercept` is set.
pub fn ridge(
    x: &Array2<f64>,
    y: &Array1<f64>,
    penalty: f64,
    intercept: bool,
) -> Result<Array1<f64>, ModelError> {
    let mut gram = x.t().dot(x);
    let start = usize::from(intercept);
    for i in start..gram.nrows() {
        gram[[i, i]] += penalty;
    }
    let rhs = x.t().dot(y);
    solve_symmetric(&gram, &rhs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn cholesky_solves_spd_system() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let b = array![2.0, 1.0];
        let x = solve_symmetric(&a, &b).unwrap();
        let back = a.dot(&x);
        assert!((back[0] - 2.0).abs() < 1e-12);
        assert!((back[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn singular_matrix_rejected() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let b = array![1.0, 1.0];
        assert!(matches!(
            solve_symmetric(&a, &b),
            Err(ModelError::Singular { .. })
        ));
    }

    #[test]
    fn ols_recovers_exact_line() {
        // y = 0.5 + 2x
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = array![0.5, 2.5, 4.5, 6.5];
        let beta = ridge(&x, &y, 0.0, true).unwrap();
        assert!((beta[0] - 0.5).abs() < 1e-10);
        assert!((beta[1] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn ridge_shrinks_slope_not_intercept() {
        let x = array![[1.0, -1.0], [1.0, 1.0]];
        let y = array![0.0, 2.0];
        // Gram = [[2,0],[0,2]]; slope (2)/(2+2) = 0.5, intercept 1
        let beta = ridge(&x, &y, 2.0, true).unwrap();
        assert!((beta[0] - 1.0).abs() < 1e-12);
        assert!((beta[1] - 0.5).abs() < 1e-12);
    }
}
