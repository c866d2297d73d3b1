//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during segmentation and fitting
//! - exported to JSON/CSV
//! - handed to a presentation layer without further conversion

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

use crate::error::{KineticsError, Result};

/// How the dissociation phase is stitched onto the association phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AlignMode {
    /// Propagate the association offset to the dissociation phase.
    Fast,
    /// Compute an independent offset so dissociation starts where association ends.
    Slow,
}

impl AlignMode {
    pub const VALID: [&'static str; 2] = ["fast", "slow"];
}

impl FromStr for AlignMode {
    type Err = KineticsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(AlignMode::Fast),
            "slow" => Ok(AlignMode::Slow),
            other => Err(KineticsError::value(format!(
                "Unknown alignment mode '{other}'; expected one of {:?}.",
                AlignMode::VALID
            ))),
        }
    }
}

/// Instrument export family a raw record came from.
///
/// Each variant knows how its phase markers are expressed; see
/// `signal::segment` for the per-variant extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFormat {
    /// One curve per export with explicit phase boundary indices.
    SingleCurveExport,
    /// Multi-file archive whose event log marks phase starts by time.
    ZippedExport,
    /// Structured multi-sample JSON with explicit boundaries or phase arrays.
    StructuredJson,
}

impl DeviceFormat {
    /// Whether injection-artifact truncation applies to this format.
    pub fn truncates(self) -> bool {
        matches!(self, DeviceFormat::SingleCurveExport)
    }
}

/// Whether every concentration had its own injection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CycleKind {
    #[default]
    MultiCycle,
    SingleCycle,
}

/// Parameter-sharing strategy across concentration curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One Rmax, kon, koff shared by every curve.
    Global,
    /// An independent fit per curve, aggregated afterwards.
    Local,
    /// One Rmax per curve, shared kon and koff.
    Partial,
}

impl Topology {
    pub fn display_name(self) -> &'static str {
        match self {
            Topology::Global => "Global",
            Topology::Local => "Local",
            Topology::Partial => "Partial",
        }
    }

    /// Free parameter count used for the pooled Chi².
    pub fn free_parameters(self, n_curves: usize) -> usize {
        match self {
            Topology::Global => 3,
            Topology::Local => 3 * n_curves,
            Topology::Partial => n_curves + 2,
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// The association → dissociation instant (seconds from association start).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeBreak {
    /// Multi-cycle data: one instant for the whole dataset.
    Shared(f64),
    /// Single-cycle data: one instant per concentration.
    PerCurve(Vec<f64>),
}

impl TimeBreak {
    /// Time break for column `col`.
    pub fn at(&self, col: usize) -> f64 {
        match self {
            TimeBreak::Shared(t) => *t,
            TimeBreak::PerCurve(ts) => ts[col],
        }
    }

    /// Restrict to a subset of columns (keeps the shared form shared).
    pub fn select(&self, cols: &[usize]) -> TimeBreak {
        match self {
            TimeBreak::Shared(t) => TimeBreak::Shared(*t),
            TimeBreak::PerCurve(ts) => TimeBreak::PerCurve(cols.iter().map(|&c| ts[c]).collect()),
        }
    }

    fn validate(&self, n_curves: usize) -> Result<()> {
        let values: &[f64] = match self {
            TimeBreak::Shared(t) => std::slice::from_ref(t),
            TimeBreak::PerCurve(ts) => {
                if ts.len() != n_curves {
                    return Err(KineticsError::config(format!(
                        "Time break count ({}) != concentration count ({n_curves}).",
                        ts.len()
                    )));
                }
                ts
            }
        };
        if values.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(KineticsError::value("Time break must be finite and >= 0."));
        }
        Ok(())
    }
}

/// One phase of a dataset: `[time × concentration]`, `NaN` marks a missing sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalMatrix {
    pub time: Vec<f64>,
    pub values: DMatrix<f64>,
}

impl SignalMatrix {
    pub fn empty(n_cols: usize) -> Self {
        Self {
            time: Vec::new(),
            values: DMatrix::zeros(0, n_cols),
        }
    }

    pub fn rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn cols(&self) -> usize {
        self.values.ncols()
    }

    /// First non-missing sample of a column.
    pub fn first_in(&self, col: usize) -> Option<f64> {
        self.values.column(col).iter().copied().find(|v| !v.is_nan())
    }

    /// Last non-missing sample of a column.
    pub fn last_in(&self, col: usize) -> Option<f64> {
        self.values.column(col).iter().rev().copied().find(|v| !v.is_nan())
    }

    /// Count of non-missing samples in a column.
    pub fn present_in(&self, col: usize) -> usize {
        self.values.column(col).iter().filter(|v| !v.is_nan()).count()
    }

    pub fn remove_column(&mut self, col: usize) {
        let values = std::mem::replace(&mut self.values, DMatrix::zeros(0, 0));
        self.values = values.remove_column(col);
    }
}

/// The fitting input: stitched association + dissociation responses.
///
/// Invariants (checked by [`ResponseMatrix::new`]):
/// - `values` is `time.len() × concentrations.len()` and non-empty
/// - time is finite and strictly increasing
/// - concentrations are finite, `>= 0`, with at most one blank (`0.0`)
/// - observed values are finite or `NaN` (missing)
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMatrix {
    time: Vec<f64>,
    concentrations: Vec<f64>,
    values: DMatrix<f64>,
    time_break: TimeBreak,
}

impl ResponseMatrix {
    pub fn new(
        time: Vec<f64>,
        concentrations: Vec<f64>,
        values: DMatrix<f64>,
        time_break: TimeBreak,
    ) -> Result<Self> {
        if values.ncols() != concentrations.len() {
            return Err(KineticsError::config(format!(
                "Response matrix has {} columns but {} concentrations.",
                values.ncols(),
                concentrations.len()
            )));
        }
        if values.nrows() != time.len() {
            return Err(KineticsError::config(format!(
                "Response matrix has {} rows but {} time points.",
                values.nrows(),
                time.len()
            )));
        }
        if concentrations.is_empty() || time.is_empty() {
            return Err(KineticsError::value("Empty dataset: nothing to fit."));
        }
        if time.iter().any(|t| !t.is_finite()) || time.windows(2).any(|w| w[1] <= w[0]) {
            return Err(KineticsError::value(
                "Time axis must be finite and strictly increasing.",
            ));
        }
        if concentrations.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(KineticsError::value("Concentrations must be finite and >= 0."));
        }
        blank_index(&concentrations)?;
        time_break.validate(concentrations.len())?;
        if values.iter().any(|v| v.is_infinite()) {
            return Err(KineticsError::value("Observed responses contain infinite values."));
        }
        if values.iter().all(|v| v.is_nan()) {
            return Err(KineticsError::value("Empty dataset: every response is missing."));
        }

        Ok(Self {
            time,
            concentrations,
            values,
            time_break,
        })
    }

    pub fn time(&self) -> &[f64] {
        &self.time
    }

    pub fn concentrations(&self) -> &[f64] {
        &self.concentrations
    }

    pub fn values(&self) -> &DMatrix<f64> {
        &self.values
    }

    pub fn time_break(&self) -> &TimeBreak {
        &self.time_break
    }

    pub fn n_curves(&self) -> usize {
        self.concentrations.len()
    }

    /// Number of observed (non-missing) points.
    pub fn n_points(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }

    /// Largest observed response (ignoring missing samples).
    pub fn max_observed(&self) -> Option<f64> {
        self.values
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    /// Single-curve view used by per-curve (Local) fits.
    pub fn column(&self, col: usize) -> Result<ResponseMatrix> {
        ResponseMatrix::new(
            self.time.clone(),
            vec![self.concentrations[col]],
            self.values.columns(col, 1).into_owned(),
            self.time_break.select(&[col]),
        )
    }
}

/// Locate the unique blank (`0.0`) concentration.
///
/// More than one blank is a fatal configuration error.
pub fn blank_index(concentrations: &[f64]) -> Result<Option<usize>> {
    let zeros: Vec<usize> = concentrations
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == 0.0)
        .map(|(i, _)| i)
        .collect();
    match zeros.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        many => Err(KineticsError::config(format!(
            "Found {} zero-concentration columns (at {many:?}); at most one blank is allowed.",
            many.len()
        ))),
    }
}

/// A parameter that is either shared or reported per concentration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Scalar(f64),
    PerCurve(Vec<f64>),
}

impl ParamValue {
    /// Value for column `col` (a scalar applies to every column).
    pub fn at(&self, col: usize) -> f64 {
        match self {
            ParamValue::Scalar(v) => *v,
            ParamValue::PerCurve(vs) => vs[col],
        }
    }
}

/// Fitted parameters and statistics of a single concentration curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurveFit {
    pub concentration: f64,
    pub rmax: f64,
    pub kon: f64,
    pub koff: f64,
    pub loss: f64,
    pub n_points: usize,
    pub r2: Option<f64>,
    pub chi2: Option<f64>,
}

/// How the winning optimizer run was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitDiagnostics {
    /// Index into `FittingOptions::init_params` of the best start (first curve for Local).
    pub best_start: usize,
    pub iterations: usize,
    pub converged: bool,
    /// Normalization scale applied to the observed response.
    pub r_guess: f64,
}

/// Output of one `fit` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KineticsResult {
    pub topology: Topology,
    pub rmax: ParamValue,
    pub kon: f64,
    pub koff: f64,
    #[serde(rename = "KD")]
    pub kd: f64,
    /// Total (unpenalized) loss over all curves.
    pub total_loss: f64,
    pub loss: Vec<f64>,
    #[serde(rename = "R2")]
    pub r2: Vec<Option<f64>>,
    #[serde(rename = "Chi2")]
    pub chi2: Vec<Option<f64>>,
    #[serde(rename = "GlobalR2")]
    pub global_r2: Option<f64>,
    #[serde(rename = "GlobalChi2")]
    pub global_chi2: Option<f64>,
    pub concentrations: Vec<f64>,
    pub curves: Vec<CurveFit>,
    pub diagnostics: FitDiagnostics,
}

/// Model responses at the fitted parameters, same shape as the fitted matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictedCurveMatrix {
    pub time: Vec<f64>,
    pub concentrations: Vec<f64>,
    pub values: DMatrix<f64>,
}
