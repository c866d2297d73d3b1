//! 1:1 Langmuir binding kinetics (closed form).
//!
//! For analyte concentration `c`:
//!
//! ```text
//! kon  = 10^log10_kon,  koff = 10^log10_koff
//! Kobs = c·kon + koff,  KD = koff / kon
//! Eq   = Rmax·c / (c + KD)
//!
//! t <= tb : R(t)  = Eq·(1 - e^{-Kobs·t})
//! Rb       = Eq·(1 - e^{-Kobs·tb}) + R0·e^{-Kobs·tb}
//! t >  tb : R(t)  = Rb·e^{-koff·(t - tb)}
//! ```
//!
//! `R0` is the background carried over from a previous injection (single-cycle
//! runs); it only enters the level the dissociation decays from, and is zero
//! for ordinary multi-cycle data.
//!
//! Numerical notes:
//! - `1 - e^{-x}` is computed as `-expm1(-x)` to keep precision for small `x`.
//! - Any non-finite intermediate or output replaces the *whole* curve with
//!   [`SENTINEL`]. The check is local to the call; nothing global is touched.

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::domain::{ParamValue, PredictedCurveMatrix, ResponseMatrix};

/// Response reported for parameter regions where evaluation overflows.
pub const SENTINEL: f64 = f64::MAX;

/// Kinetic parameters in the optimizer's log space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KineticParams {
    pub rmax: f64,
    pub log10_kon: f64,
    pub log10_koff: f64,
}

impl KineticParams {
    pub fn new(rmax: f64, log10_kon: f64, log10_koff: f64) -> Self {
        Self {
            rmax,
            log10_kon,
            log10_koff,
        }
    }

    /// Build from linear rate constants.
    pub fn from_rates(rmax: f64, kon: f64, koff: f64) -> Self {
        Self::new(rmax, kon.log10(), koff.log10())
    }

    pub fn kon(&self) -> f64 {
        10f64.powf(self.log10_kon)
    }

    pub fn koff(&self) -> f64 {
        10f64.powf(self.log10_koff)
    }

    pub fn log10_kd(&self) -> f64 {
        self.log10_koff - self.log10_kon
    }

    pub fn kd(&self) -> f64 {
        10f64.powf(self.log10_kd())
    }
}

/// Evaluate one concentration's curve at `time`.
pub fn evaluate(
    concentration: f64,
    time: &[f64],
    params: &KineticParams,
    time_break: f64,
    background: f64,
) -> Vec<f64> {
    let mut out = vec![0.0; time.len()];
    evaluate_into(concentration, time, params, time_break, background, &mut out);
    out
}

/// Allocation-free form of [`evaluate`]; `out` must have `time.len()` entries.
pub fn evaluate_into(
    concentration: f64,
    time: &[f64],
    params: &KineticParams,
    time_break: f64,
    background: f64,
    out: &mut [f64],
) {
    if !try_evaluate(concentration, time, params, time_break, background, out) {
        out.fill(SENTINEL);
    }
}

fn try_evaluate(
    c: f64,
    time: &[f64],
    params: &KineticParams,
    tb: f64,
    background: f64,
    out: &mut [f64],
) -> bool {
    let kon = params.kon();
    let koff = params.koff();
    let kobs = c * kon + koff;
    let kd = koff / kon;
    let eq = params.rmax * c / (c + kd);
    if ![kon, koff, kobs, kd, eq].iter().all(|v| v.is_finite()) {
        return false;
    }

    let association = |t: f64| eq * -(-kobs * t).exp_m1();
    let carry = if background != 0.0 { background * (-kobs * tb).exp() } else { 0.0 };
    let at_break = association(tb) + carry;
    if !at_break.is_finite() {
        return false;
    }

    for (slot, &t) in out.iter_mut().zip(time) {
        let r = if t <= tb {
            association(t)
        } else {
            at_break * (-koff * (t - tb)).exp()
        };
        if !r.is_finite() {
            return false;
        }
        *slot = r;
    }
    true
}

/// Evaluate the model for every curve of a dataset.
///
/// `rmax` is either shared or one value per concentration.
pub fn predict_matrix(
    data: &ResponseMatrix,
    rmax: &ParamValue,
    log10_kon: f64,
    log10_koff: f64,
) -> PredictedCurveMatrix {
    let n_rows = data.time().len();
    let n_cols = data.n_curves();
    let mut values = DMatrix::zeros(n_rows, n_cols);
    let mut column = vec![0.0; n_rows];
    for (col, &c) in data.concentrations().iter().enumerate() {
        let params = KineticParams::new(rmax.at(col), log10_kon, log10_koff);
        evaluate_into(c, data.time(), &params, data.time_break().at(col), 0.0, &mut column);
        values.set_column(col, &nalgebra::DVector::from_column_slice(&column));
    }
    PredictedCurveMatrix {
        time: data.time().to_vec(),
        concentrations: data.concentrations().to_vec(),
        values,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> Vec<f64> {
        (0..=200).map(|i| i as f64).collect()
    }

    #[test]
    fn association_approaches_equilibrium() {
        let p = KineticParams::from_rates(100.0, 1e5, 1e-3);
        let c = 1e-6;
        let r = evaluate(c, &[0.0, 1e6], &p, 2e6, 0.0);
        let eq = 100.0 * c / (c + 1e-8);
        assert_eq!(r[0], 0.0);
        assert!((r[1] - eq).abs() < 1e-9);
    }

    #[test]
    fn curve_is_continuous_at_break() {
        let p = KineticParams::from_rates(100.0, 1e5, 1e-2);
        let r = evaluate(1e-7, &[50.0, 50.0 + 1e-9], &p, 50.0, 0.0);
        assert!((r[0] - r[1]).abs() < 1e-6);
    }

    #[test]
    fn dissociation_decays_with_koff() {
        let p = KineticParams::from_rates(100.0, 1e5, 1e-2);
        let r = evaluate(1e-7, &[50.0, 150.0], &p, 50.0, 0.0);
        assert!((r[1] / r[0] - (-1.0f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn blank_concentration_is_flat_zero() {
        let p = KineticParams::from_rates(100.0, 1e5, 1e-3);
        assert!(evaluate(0.0, &grid(), &p, 50.0, 0.0).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn background_only_shifts_the_break_level() {
        let p = KineticParams::from_rates(100.0, 1e5, 1e-3);
        let c = 1e-8;
        let time = [0.0, 20.0, 60.0];
        let plain = evaluate(c, &time, &p, 50.0, 0.0);
        let carried = evaluate(c, &time, &p, 50.0, 7.5);
        assert_eq!(plain[0], carried[0]);
        assert_eq!(plain[1], carried[1]);

        let kobs = c * 1e5 + 1e-3;
        let carry = 7.5 * (-kobs * 50.0f64).exp() * (-1e-3 * 10.0f64).exp();
        assert!((carried[2] - plain[2] - carry).abs() < 1e-9);
    }

    #[test]
    fn extreme_rates_never_leak_non_finite_values() {
        let p = KineticParams::new(100.0, 300.0, -3.0);
        let r = evaluate(1e-7, &grid(), &p, 50.0, 0.0);
        assert!(r.iter().all(|v| v.is_finite()));

        let p = KineticParams::new(100.0, 400.0, -3.0);
        let r = evaluate(1e-7, &grid(), &p, 50.0, 0.0);
        assert!(r.iter().all(|v| *v == SENTINEL));

        let p = KineticParams::new(100.0, 5.0, 400.0);
        let r = evaluate(1e-7, &grid(), &p, 50.0, 0.0);
        assert!(r.iter().all(|v| *v == SENTINEL));
    }
}
