//! Per-curve residual summaries.

use crate::domain::{PredictedCurveMatrix, ResponseMatrix};
use crate::error::{KineticsError, Result};
use crate::models::SENTINEL;

/// Residual summary of one curve (`observed - predicted`).
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualSummary {
    pub concentration: f64,
    pub rms: f64,
    /// `(time, residual)` of the largest absolute residual.
    pub worst: Option<(f64, f64)>,
}

/// Summarize residuals for each curve.
///
/// Fails if the prediction was never evaluable (sentinel responses).
pub fn summarize_residuals(data: &ResponseMatrix, predicted: &PredictedCurveMatrix) -> Result<Vec<ResidualSummary>> {
    if predicted.values.shape() != data.values().shape() {
        return Err(KineticsError::config(format!(
            "Prediction shape {:?} does not match data shape {:?}.",
            predicted.values.shape(),
            data.values().shape()
        )));
    }

    let mut out = Vec::with_capacity(data.n_curves());
    for (col, &concentration) in data.concentrations().iter().enumerate() {
        let mut sum = 0.0;
        let mut n = 0usize;
        let mut worst: Option<(f64, f64)> = None;
        for (row, &t) in data.time().iter().enumerate() {
            let obs = data.values()[(row, col)];
            if obs.is_nan() {
                continue;
            }
            let pred = predicted.values[(row, col)];
            if pred == SENTINEL {
                return Err(KineticsError::value(format!(
                    "Non-evaluable model prediction for concentration {concentration:e}."
                )));
            }
            let r = obs - pred;
            sum += r * r;
            n += 1;
            if worst.is_none_or(|(_, w)| r.abs() > w.abs()) {
                worst = Some((t, r));
            }
        }
        let rms = if n > 0 { (sum / n as f64).sqrt() } else { 0.0 };
        out.push(ResidualSummary {
            concentration,
            rms,
            worst,
        });
    }
    Ok(out)
}
