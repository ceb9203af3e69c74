//! Ridge distillation: fits `U ≈ X · W` with an L2 penalty and no intercept, giving
//! callers a cheap deterministic linear surrogate for the nonlinear UMAP manifold.
//!
//! `W` is solved in closed form from the regularized normal equations
//! `(XᵀX + αI) W = XᵀU` via Gauss-Jordan elimination. No cross-validation or alpha
//! tuning is performed — a single fixed `alpha` is used throughout.

use ndarray::Array2;
use tracing::warn;

pub const DEFAULT_ALPHA: f64 = 0.1;

/// Fits `W` (D x K) such that `X · W ≈ U`. Falls back to the D x K truncated identity
/// if the regularized system is singular (should not happen for alpha > 0, but a
/// defensive fallback keeps the learning request well-typed regardless).
pub fn fit_ridge(x: &Array2<f64>, u: &Array2<f64>, alpha: f64) -> Array2<f64> {
    let d = x.ncols();
    let k = u.ncols();

    let xt = x.t();
    let mut gram = xt.dot(x); // D x D
    for i in 0..d {
        gram[[i, i]] += alpha;
    }
    let xtu = xt.dot(u); // D x K

    match solve_linear_system(&gram, &xtu) {
        Some(w) => w,
        None => {
            warn!("ridge distillation: regularized system was singular, falling back to truncated identity");
            truncated_identity(d, k)
        }
    }
}

/// Mean-squared-error of `X·W` against `U`, divided by the variance of `U`. A value
/// `<= 1.0` means the surrogate is no worse than predicting the mean.
pub fn surrogate_quality(x: &Array2<f64>, u: &Array2<f64>, w: &Array2<f64>) -> f64 {
    let pred = x.dot(w);
    let diff = &pred - u;
    let mse = diff.mapv(|v| v * v).mean().unwrap_or(0.0);

    let mean = u.mean().unwrap_or(0.0);
    let var = u.mapv(|v| (v - mean).powi(2)).mean().unwrap_or(0.0);

    if var == 0.0 {
        if mse == 0.0 {
            0.0
        } else {
            f64::INFINITY
        }
    } else {
        mse / var
    }
}

fn truncated_identity(d: usize, k: usize) -> Array2<f64> {
    let mut m = Array2::<f64>::zeros((d, k));
    for i in 0..d.min(k) {
        m[[i, i]] = 1.0;
    }
    m
}

/// Solves `a · w = b` for `w` via Gauss-Jordan elimination with partial pivoting.
/// Returns `None` if `a` is (numerically) singular.
fn solve_linear_system(a: &Array2<f64>, b: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    debug_assert_eq!(a.ncols(), n);
    let cols = b.ncols();

    // Augmented matrix [a | b].
    let mut aug = Array2::<f64>::zeros((n, n + cols));
    aug.slice_mut(ndarray::s![.., ..n]).assign(a);
    aug.slice_mut(ndarray::s![.., n..]).assign(b);

    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&r1, &r2| aug[[r1, col]].abs().total_cmp(&aug[[r2, col]].abs()))?;

        if aug[[pivot_row, col]].abs() < 1e-12 {
            return None;
        }

        if pivot_row != col {
            for c in 0..(n + cols) {
                aug.swap([col, c], [pivot_row, c]);
            }
        }

        let pivot = aug[[col, col]];
        for c in 0..(n + cols) {
            aug[[col, c]] /= pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[[row, col]];
            if factor != 0.0 {
                for c in 0..(n + cols) {
                    aug[[row, c]] -= factor * aug[[col, c]];
                }
            }
        }
    }

    Some(aug.slice(ndarray::s![.., n..]).to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn fits_exact_linear_map() {
        // U = X * [[1,0],[0,1],[0,0]] exactly, so ridge with small alpha should recover
        // something close to that mapping and have near-zero relative error.
        let x = array![[1.0, 0.0, 5.0], [0.0, 1.0, 5.0], [2.0, 1.0, 5.0], [1.0, 2.0, 5.0]];
        let u = array![[1.0, 0.0], [0.0, 1.0], [2.0, 1.0], [1.0, 2.0]];

        let w = fit_ridge(&x, &u, 1e-6);
        let quality = surrogate_quality(&x, &u, &w);
        assert!(quality < 0.05, "quality={quality}");
    }

    #[test]
    fn surrogate_no_worse_than_mean_baseline() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [0.5, 0.5], [3.0, 1.0]];
        let u = array![[0.1, 0.2], [0.3, 0.1], [0.2, 0.2], [0.4, 0.3]];
        let w = fit_ridge(&x, &u, DEFAULT_ALPHA);
        assert!(surrogate_quality(&x, &u, &w) <= 1.0);
    }

    #[test]
    fn truncated_identity_shape() {
        let id = truncated_identity(4, 2);
        assert_eq!(id.shape(), &[4, 2]);
        assert_eq!(id[[0, 0]], 1.0);
        assert_eq!(id[[1, 1]], 1.0);
        assert_eq!(id[[2, 0]], 0.0);
    }
}
