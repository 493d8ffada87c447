//! Dense linear-algebra helpers for the normal-equation and Fisher solves.
//!
//! Gauss-Jordan elimination with partial pivoting over `ndarray` matrices.
//! A singular (or numerically singular) matrix is a hard error; callers must
//! not retry with the same inputs.

use ndarray::{Array1, Array2};

use crate::core::{Error, Result};

/// Pivot magnitudes below this are treated as singular.
const PIVOT_TOL: f64 = 1e-12;

/// Solve `a x = b` for a square system.
pub fn solve(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>> {
    let n = check_square(a)?;
    if b.len() != n {
        return Err(Error::Numerical(format!(
            "dimension mismatch: matrix is {n}x{n}, vector has {} entries",
            b.len()
        )));
    }
    let mut aug = a.clone();
    let mut rhs = b.clone();
    eliminate(&mut aug, std::slice::from_mut(&mut rhs))?;
    Ok(rhs)
}

/// Invert a square matrix.
pub fn inv(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = check_square(a)?;
    let mut aug = a.clone();
    let mut columns: Vec<Array1<f64>> = (0..n)
        .map(|j| {
            let mut e = Array1::zeros(n);
            e[j] = 1.0;
            e
        })
        .collect();
    eliminate(&mut aug, &mut columns)?;
    let mut out = Array2::zeros((n, n));
    for (j, col) in columns.iter().enumerate() {
        for i in 0..n {
            out[[i, j]] = col[i];
        }
    }
    Ok(out)
}

/// Square roots of the diagonal of the inverse; used for standard errors
/// from a Fisher information matrix.
pub fn inv_diag_sqrt(a: &Array2<f64>) -> Result<Array1<f64>> {
    let inverse = inv(a)?;
    Ok(inverse.diag().mapv(|v| v.max(0.0).sqrt()))
}

fn check_square(a: &Array2<f64>) -> Result<usize> {
    let (rows, cols) = a.dim();
    if rows != cols {
        return Err(Error::Numerical(format!(
            "expected a square matrix, got {rows}x{cols}"
        )));
    }
    Ok(rows)
}

/// Row-reduce `a` in place, applying the same operations to every
/// right-hand side.
fn eliminate(a: &mut Array2<f64>, rhs: &mut [Array1<f64>]) -> Result<()> {
    let n = a.nrows();
    for col in 0..n {
        // Partial pivot
        let mut pivot_row = col;
        let mut pivot_mag = a[[col, col]].abs();
        for row in (col + 1)..n {
            let mag = a[[row, col]].abs();
            if mag > pivot_mag {
                pivot_row = row;
                pivot_mag = mag;
            }
        }
        if pivot_mag < PIVOT_TOL || !pivot_mag.is_finite() {
            return Err(Error::Numerical(
                "singular matrix encountered during elimination".into(),
            ));
        }
        if pivot_row != col {
            for j in 0..n {
                a.swap([col, j], [pivot_row, j]);
            }
            for b in rhs.iter_mut() {
                b.swap(col, pivot_row);
            }
        }

        let pivot = a[[col, col]];
        for j in 0..n {
            a[[col, j]] /= pivot;
        }
        for b in rhs.iter_mut() {
            b[col] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = a[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                a[[row, j]] -= factor * a[[col, j]];
            }
            for b in rhs.iter_mut() {
                let pivot_val = b[col];
                b[row] -= factor * pivot_val;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_solve_simple_system() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![5.0, 10.0];
        let x = solve(&a, &b).unwrap();
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_solve_requires_pivoting() {
        // Zero leading pivot forces a row swap.
        let a = array![[0.0, 1.0], [1.0, 0.0]];
        let b = array![2.0, 3.0];
        let x = solve(&a, &b).unwrap();
        assert_abs_diff_eq!(x[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_inv_roundtrip() {
        let a = array![[4.0, 7.0], [2.0, 6.0]];
        let a_inv = inv(&a).unwrap();
        let ident = a.dot(&a_inv);
        assert_abs_diff_eq!(ident[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ident[[0, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ident[[1, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(ident[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_singular_matrix_is_error() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(matches!(
            solve(&a, &array![1.0, 2.0]),
            Err(Error::Numerical(_))
        ));
        assert!(matches!(inv(&a), Err(Error::Numerical(_))));
    }

    #[test]
    fn test_non_square_rejected() {
        let a = Array2::<f64>::zeros((2, 3));
        assert!(matches!(inv(&a), Err(Error::Numerical(_))));
    }

    #[test]
    fn test_inv_diag_sqrt() {
        let a = array![[4.0, 0.0], [0.0, 16.0]];
        let d = inv_diag_sqrt(&a).unwrap();
        assert_abs_diff_eq!(d[0], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(d[1], 0.25, epsilon = 1e-12);
    }
}
