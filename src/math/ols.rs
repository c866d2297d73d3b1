//! Least squares solver.
//!
//! The optimizer repeatedly solves small, tall linear systems of the form
//!
//! ```text
//! minimize ‖A·δ - b‖²
//! ```
//!
//! where `A` is the damped Jacobian (one column per fitted parameter, a few
//! hundred to a few thousand rows).
//!
//! Implementation choices:
//! - SVD handles tall matrices and near-singular columns (e.g. an Rmax that
//!   only affects a blank curve) without special-casing.
//!   (Nalgebra's `QR::solve` is intended for square systems and will panic for
//!   non-square matrices.)
//! - The parameter dimension is tiny (3 for Global, N+2 for Partial), so SVD
//!   cost is negligible next to model evaluation.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-12, 1e-10, 1e-8] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}
