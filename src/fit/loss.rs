//! Objective pieces: residual sum of squares, soft log-KD penalty, and the
//! hard KD inequality constraint.
//!
//! Nothing returned from here is NaN or infinite: sums that overflow (e.g.
//! when a prediction is the model sentinel) saturate to [`SENTINEL`].

use nalgebra::DMatrix;

use crate::models::SENTINEL;

/// Beyond this |log10 KD| the penalty is a flat 1.0 (keeps `exp` in range).
const PENALTY_GUARD: f64 = 20.0;

/// Sum of squared residuals over every curve; missing observations contribute zero.
pub fn residual_sum_of_squares(predicted: &DMatrix<f64>, observed: &DMatrix<f64>) -> f64 {
    debug_assert_eq!(predicted.shape(), observed.shape());
    saturate(
        predicted
            .iter()
            .zip(observed.iter())
            .filter(|(_, o)| !o.is_nan())
            .map(|(p, o)| (p - o) * (p - o))
            .sum(),
    )
}

/// Residual sum of squares per curve (column).
pub fn curve_losses(predicted: &DMatrix<f64>, observed: &DMatrix<f64>) -> Vec<f64> {
    debug_assert_eq!(predicted.shape(), observed.shape());
    predicted
        .column_iter()
        .zip(observed.column_iter())
        .map(|(p, o)| {
            saturate(
                p.iter()
                    .zip(o.iter())
                    .filter(|(_, o)| !o.is_nan())
                    .map(|(p, o)| (p - o) * (p - o))
                    .sum(),
            )
        })
        .collect()
}

/// Sum of squares of a residual vector, saturating like the matrix form.
pub fn sum_of_squares(residuals: &[f64]) -> f64 {
    saturate(residuals.iter().map(|r| r * r).sum())
}

fn saturate(v: f64) -> f64 {
    if v.is_finite() { v } else { SENTINEL }
}

fn logistic(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Smooth window penalty on `x = log10 KD`.
///
/// `≈ 0` well inside `[lower, upper]`, `→ 1` outside either edge, with
/// steepness `k`. Returns `1.0` for `|x| > 20`.
pub fn soft_bound_penalty(x: f64, lower: f64, upper: f64, k: f64) -> f64 {
    if x.abs() > PENALTY_GUARD || !x.is_finite() {
        return 1.0;
    }
    2.0 - logistic(k * (x - lower)) - logistic(k * (upper - x))
}

/// Hard constraint value; feasible when `>= 0`.
pub fn kd_constraint(log10_kon: f64, log10_koff: f64, kd_bound: f64) -> f64 {
    log10_koff - log10_kon - kd_bound
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rss_skips_missing_observations() {
        let predicted = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let observed = DMatrix::from_row_slice(2, 2, &[0.0, f64::NAN, 3.0, 2.0]);
        assert_eq!(residual_sum_of_squares(&predicted, &observed), 5.0);
        assert_eq!(curve_losses(&predicted, &observed), vec![1.0, 4.0]);
    }

    #[test]
    fn rss_saturates_on_sentinel_predictions() {
        let predicted = DMatrix::from_element(3, 1, SENTINEL);
        let observed = DMatrix::from_element(3, 1, 1.0);
        assert_eq!(residual_sum_of_squares(&predicted, &observed), SENTINEL);
        assert_eq!(sum_of_squares(&[SENTINEL, 1.0]), SENTINEL);
    }

    #[test]
    fn penalty_is_small_inside_and_large_outside() {
        let inside = soft_bound_penalty(-7.0, -11.0, -3.0, 5.0);
        assert!(inside < 1e-6, "inside={inside}");
        let below = soft_bound_penalty(-14.0, -11.0, -3.0, 5.0);
        assert!(below > 0.99, "below={below}");
        let above = soft_bound_penalty(0.0, -11.0, -3.0, 5.0);
        assert!(above > 0.99, "above={above}");
        let edge = soft_bound_penalty(-11.0, -11.0, -3.0, 5.0);
        assert!((edge - 0.5).abs() < 1e-6);
    }

    #[test]
    fn penalty_guard_returns_one() {
        assert_eq!(soft_bound_penalty(25.0, -11.0, -3.0, 5.0), 1.0);
        assert_eq!(soft_bound_penalty(-300.0, -11.0, -3.0, 1e3), 1.0);
    }

    #[test]
    fn kd_constraint_sign() {
        assert!(kd_constraint(5.0, -3.0, -12.0) > 0.0);
        assert!(kd_constraint(9.0, -7.0, -12.0) < 0.0);
    }
}
