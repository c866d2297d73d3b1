//! Projected Levenberg–Marquardt for small bound/constraint-limited problems.
//!
//! We minimize `Σ r_i(p)²` where the problem supplies:
//!
//! - the residual vector `r(p)`
//! - a projection that maps any parameter vector back onto the feasible set
//!   (box bounds plus any inequality constraints)
//!
//! Each iteration builds a forward-difference Jacobian with step
//! `eps · max(|p_j|, 1)` and solves the damped normal equations as an augmented
//! least-squares problem
//!
//! ```text
//! [ J          ] δ = [ -r ]
//! [ sqrt(λ·D)  ]     [  0 ]
//! ```
//!
//! with the SVD solver from `math::ols`. Trial points are projected before
//! they are scored; a step is kept only if it lowers the cost.
//!
//! Non-convergence is not an error: the best point found is always returned,
//! with `converged = false`.

use nalgebra::{DMatrix, DVector};

use crate::fit::loss::sum_of_squares;
use crate::math::solve_least_squares;

const LAMBDA_INIT: f64 = 1e-3;
const LAMBDA_MIN: f64 = 1e-12;
const LAMBDA_MAX: f64 = 1e12;
const DAMPING_FLOOR: f64 = 1e-12;
/// Consecutive tiny accepted steps before we call it converged.
const STALL_LIMIT: usize = 3;

/// A least-squares problem over a projected parameter space.
pub trait LeastSquaresProblem {
    fn dim(&self) -> usize;

    /// Fill `out` with the residual vector at `params` (replacing its contents).
    fn residuals(&self, params: &[f64], out: &mut Vec<f64>);

    /// Map `params` onto the feasible set in place.
    fn project(&self, params: &mut [f64]);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LmSettings {
    /// Relative finite-difference step.
    pub eps: f64,
    pub max_iterations: usize,
    /// Stop when the relative cost decrease falls below this.
    pub ftol: f64,
    /// Stop when the relative step length falls below this.
    pub xtol: f64,
}

impl LmSettings {
    pub fn new(eps: f64, max_iterations: usize) -> Self {
        Self {
            eps,
            max_iterations,
            ftol: 1e-12,
            xtol: 1e-10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LmOutcome {
    pub params: Vec<f64>,
    pub cost: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Minimize the problem's sum of squared residuals starting from `x0`.
pub fn minimize<P: LeastSquaresProblem>(problem: &P, x0: &[f64], settings: &LmSettings) -> LmOutcome {
    let n = problem.dim();
    debug_assert_eq!(x0.len(), n);

    let mut x = x0.to_vec();
    problem.project(&mut x);
    let mut r = Vec::new();
    problem.residuals(&x, &mut r);
    let mut cost = sum_of_squares(&r);

    let mut lambda = LAMBDA_INIT;
    let mut converged = false;
    let mut iterations = 0;
    let mut stalls = 0;
    let mut trial_r = Vec::new();

    while iterations < settings.max_iterations {
        iterations += 1;
        if cost == 0.0 {
            converged = true;
            break;
        }

        let jac = jacobian(problem, &x, &r, settings.eps);
        let damping: Vec<f64> = (0..n)
            .map(|j| jac.column(j).norm_squared().max(DAMPING_FLOOR))
            .collect();

        let mut improved = false;
        while lambda <= LAMBDA_MAX {
            let Some(delta) = damped_step(&jac, &r, &damping, lambda) else {
                lambda *= 10.0;
                continue;
            };

            let mut trial: Vec<f64> = x.iter().zip(delta.iter()).map(|(a, d)| a + d).collect();
            problem.project(&mut trial);
            problem.residuals(&trial, &mut trial_r);
            let trial_cost = sum_of_squares(&trial_r);

            if trial_cost < cost {
                let rel_drop = (cost - trial_cost) / cost;
                let step: f64 = trial.iter().zip(&x).map(|(a, b)| (a - b) * (a - b)).sum::<f64>().sqrt();
                let scale: f64 = x.iter().map(|v| v * v).sum::<f64>().sqrt();

                x = trial;
                std::mem::swap(&mut r, &mut trial_r);
                cost = trial_cost;
                lambda = (lambda / 10.0).max(LAMBDA_MIN);
                improved = true;

                if rel_drop < settings.ftol || step <= settings.xtol * (scale + settings.xtol) {
                    stalls += 1;
                    converged = stalls >= STALL_LIMIT;
                } else {
                    stalls = 0;
                }
                break;
            }
            lambda *= 10.0;
        }

        if !improved {
            // No descent direction left at any damping: a (projected) stationary point.
            converged = true;
        }
        if converged {
            break;
        }
    }

    LmOutcome {
        params: x,
        cost,
        iterations,
        converged,
    }
}

fn jacobian<P: LeastSquaresProblem>(problem: &P, x: &[f64], r: &[f64], eps: f64) -> DMatrix<f64> {
    let n = x.len();
    let m = r.len();
    let mut jac = DMatrix::zeros(m, n);
    let mut shifted = x.to_vec();
    let mut r_shifted = Vec::with_capacity(m);

    for j in 0..n {
        let h = eps * x[j].abs().max(1.0);
        let mut moved = 0.0;
        for signed_h in [h, -h] {
            shifted.copy_from_slice(x);
            shifted[j] += signed_h;
            problem.project(&mut shifted);
            moved = shifted[j] - x[j];
            if moved.abs() > 0.5 * h {
                break;
            }
        }
        // Pinned on both sides by the feasible set.
        if moved.abs() <= 0.5 * h {
            continue;
        }

        problem.residuals(&shifted, &mut r_shifted);
        if r_shifted.len() != m {
            continue;
        }
        for i in 0..m {
            let d = (r_shifted[i] - r[i]) / moved;
            jac[(i, j)] = if d.is_finite() { d } else { 0.0 };
        }
    }
    jac
}

fn damped_step(jac: &DMatrix<f64>, r: &[f64], damping: &[f64], lambda: f64) -> Option<DVector<f64>> {
    let (m, n) = jac.shape();
    let mut a = DMatrix::zeros(m + n, n);
    a.view_mut((0, 0), (m, n)).copy_from(jac);
    let mut b = DVector::zeros(m + n);
    for i in 0..m {
        b[i] = if r[i].is_finite() { -r[i] } else { 0.0 };
    }
    for j in 0..n {
        a[(m + j, j)] = (lambda * damping[j]).sqrt();
    }
    solve_least_squares(&a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Exponential decay `a·exp(-b·t)` with `b` kept in `[0, 10]`.
    struct Decay {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for Decay {
        fn dim(&self) -> usize {
            2
        }

        fn residuals(&self, p: &[f64], out: &mut Vec<f64>) {
            out.clear();
            out.extend(self.t.iter().zip(&self.y).map(|(t, y)| p[0] * (-p[1] * t).exp() - y));
        }

        fn project(&self, p: &mut [f64]) {
            p[1] = p[1].clamp(0.0, 10.0);
        }
    }

    fn decay(a: f64, b: f64) -> Decay {
        let t: Vec<f64> = (0..40).map(|i| i as f64 * 0.1).collect();
        let y = t.iter().map(|t| a * (-b * t).exp()).collect();
        Decay { t, y }
    }

    #[test]
    fn recovers_exact_parameters() {
        let problem = decay(3.0, 0.7);
        let out = minimize(&problem, &[1.0, 2.0], &LmSettings::new(1e-7, 200));
        assert!(out.converged);
        assert!((out.params[0] - 3.0).abs() < 1e-6, "{:?}", out.params);
        assert!((out.params[1] - 0.7).abs() < 1e-6, "{:?}", out.params);
        assert!(out.cost < 1e-12);
    }

    #[test]
    fn respects_projection() {
        // Data wants b = 20, but the feasible set stops at 10.
        let problem = decay(2.0, 20.0);
        let out = minimize(&problem, &[1.0, 1.0], &LmSettings::new(1e-7, 200));
        assert!(out.params[1] <= 10.0);
        assert!(out.cost.is_finite());
    }

    #[test]
    fn infeasible_start_is_projected() {
        let problem = decay(2.0, 1.0);
        let out = minimize(&problem, &[1.0, -5.0], &LmSettings::new(1e-7, 1));
        assert!(out.params[1] >= 0.0);
        assert_eq!(out.iterations, 1);
    }
}
