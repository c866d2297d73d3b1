//! Fitting driver: constrained multi-start optimization over three topologies.
//!
//! All topologies share one inner loop:
//!
//! 1. normalize the observed response by its maximum (`R_guess`)
//! 2. run the projected Levenberg–Marquardt optimizer from every configured
//!    initial guess, minimizing `RSS + penalty` (penalty during search only)
//! 3. keep the run with the lowest *unpenalized* loss (first found on ties)
//! 4. de-normalize Rmax and recompute the reported loss without the penalty
//!
//! Topologies differ in what is shared:
//!
//! - **Global**: `[Rmax, log10 kon, log10 koff]` for every curve
//! - **Local**: the Global fit run per curve, then aggregated (Rmax arithmetic
//!   mean, kon/koff geometric mean over non-blank curves, loss summed)
//! - **Partial**: `[Rmax_1..Rmax_N, log10 kon, log10 koff]` jointly; the hard
//!   KD bound only applies when `FittingOptions::partial_kd_bound` is set
//!
//! Optimizer non-convergence is never an error; fit quality shows up in the
//! returned R²/Chi².

use nalgebra::DMatrix;
use tracing::{debug, warn};

use crate::domain::{
    CurveFit, FitDiagnostics, KineticsResult, ParamValue, PredictedCurveMatrix, ResponseMatrix, Topology,
};
use crate::error::{KineticsError, Result};
use crate::fit::loss::{curve_losses, kd_constraint, soft_bound_penalty, sum_of_squares};
use crate::fit::optimizer::{LeastSquaresProblem, LmSettings, minimize};
use crate::fit::options::{FittingOptions, ParameterBounds};
use crate::models::{KineticParams, evaluate_into, predict_matrix};
use crate::report::stats::fit_statistics;

/// A fit's parameters plus the model evaluated at them.
#[derive(Debug, Clone, PartialEq)]
pub struct FitOutput {
    pub result: KineticsResult,
    pub predicted: PredictedCurveMatrix,
}

/// Fit `data` with the given topology.
pub fn fit(data: &ResponseMatrix, topology: Topology, options: &FittingOptions) -> Result<FitOutput> {
    if data.n_points() == 0 {
        return Err(KineticsError::value("Empty dataset: nothing to fit."));
    }
    match topology {
        Topology::Global => fit_global(data, options),
        Topology::Local => fit_local(data, options),
        Topology::Partial => fit_partial(data, options),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RmaxLayout {
    Shared,
    PerCurve,
}

/// Best multi-start run in normalized units.
#[derive(Debug, Clone)]
struct JointFit {
    params: Vec<f64>,
    r_guess: f64,
    start: usize,
    iterations: usize,
    converged: bool,
}

impl JointFit {
    fn log10_kon(&self) -> f64 {
        self.params[self.params.len() - 2]
    }

    fn log10_koff(&self) -> f64 {
        self.params[self.params.len() - 1]
    }

    /// De-normalized Rmax values (one for Shared, one per curve for PerCurve).
    fn rmax(&self, n_rmax: usize) -> Vec<f64> {
        self.params[..n_rmax].iter().map(|r| r * self.r_guess).collect()
    }

    fn diagnostics(&self) -> FitDiagnostics {
        FitDiagnostics {
            best_start: self.start,
            iterations: self.iterations,
            converged: self.converged,
            r_guess: self.r_guess,
        }
    }
}

/// Normalized least-squares problem for one dataset and Rmax layout.
struct KineticsProblem<'a> {
    data: &'a ResponseMatrix,
    observed: DMatrix<f64>,
    layout: RmaxLayout,
    bounds: ParameterBounds,
    kd_bound: Option<f64>,
    penalty: Option<Penalty>,
}

#[derive(Debug, Clone, Copy)]
struct Penalty {
    lower: f64,
    upper: f64,
    k: f64,
    /// `λ × dataset size`.
    weight: f64,
}

impl<'a> KineticsProblem<'a> {
    fn new(
        data: &'a ResponseMatrix,
        r_guess: f64,
        layout: RmaxLayout,
        options: &FittingOptions,
        enforce_kd_bound: bool,
    ) -> Self {
        let penalty = options.penalized().then(|| Penalty {
            lower: options.punish_lower(),
            upper: options.punish_upper(),
            k: options.punish_k(),
            weight: options.punish_lambda() * data.n_points() as f64,
        });
        Self {
            data,
            observed: data.values() / r_guess,
            layout,
            bounds: *options.bounds(),
            kd_bound: enforce_kd_bound.then(|| options.kd_bound()),
            penalty,
        }
    }

    fn n_rmax(&self) -> usize {
        match self.layout {
            RmaxLayout::Shared => 1,
            RmaxLayout::PerCurve => self.data.n_curves(),
        }
    }

    fn start_vector(&self, rmax_scale: f64, log10_kon: f64, log10_koff: f64) -> Vec<f64> {
        let mut x = vec![rmax_scale; self.n_rmax()];
        x.push(log10_kon);
        x.push(log10_koff);
        x
    }

    fn data_residuals(&self, params: &[f64], out: &mut Vec<f64>) {
        out.clear();
        let n = params.len();
        let (log10_kon, log10_koff) = (params[n - 2], params[n - 1]);
        let time = self.data.time();
        let mut column = vec![0.0; time.len()];

        for (col, &c) in self.data.concentrations().iter().enumerate() {
            let rmax = match self.layout {
                RmaxLayout::Shared => params[0],
                RmaxLayout::PerCurve => params[col],
            };
            let kp = KineticParams::new(rmax, log10_kon, log10_koff);
            evaluate_into(c, time, &kp, self.data.time_break().at(col), 0.0, &mut column);
            for (row, &pred) in column.iter().enumerate() {
                let obs = self.observed[(row, col)];
                if !obs.is_nan() {
                    out.push(pred - obs);
                }
            }
        }
    }

    /// Normalized loss without the penalty term.
    fn unpenalized_cost(&self, params: &[f64]) -> f64 {
        let mut r = Vec::new();
        self.data_residuals(params, &mut r);
        sum_of_squares(&r)
    }
}

impl LeastSquaresProblem for KineticsProblem<'_> {
    fn dim(&self) -> usize {
        self.n_rmax() + 2
    }

    fn residuals(&self, params: &[f64], out: &mut Vec<f64>) {
        self.data_residuals(params, out);
        if let Some(p) = self.penalty {
            let n = params.len();
            let log10_kd = params[n - 1] - params[n - 2];
            let value = soft_bound_penalty(log10_kd, p.lower, p.upper, p.k);
            out.push((p.weight * value).sqrt());
        }
    }

    fn project(&self, params: &mut [f64]) {
        let n = params.len();
        for r in &mut params[..n - 2] {
            *r = self.bounds.rmax_scale.clamp(*r);
        }
        let mut kon = self.bounds.log10_kon.clamp(params[n - 2]);
        let mut koff = self.bounds.log10_koff.clamp(params[n - 1]);

        if let Some(bound) = self.kd_bound {
            let deficit = -kd_constraint(kon, koff, bound);
            if deficit > 0.0 {
                // Split the correction, then push whichever side still has room.
                kon = self.bounds.log10_kon.clamp(kon - deficit / 2.0);
                koff = self.bounds.log10_koff.clamp(koff + deficit / 2.0);
                if kd_constraint(kon, koff, bound) < 0.0 {
                    koff = self.bounds.log10_koff.clamp(kon + bound);
                }
                if kd_constraint(kon, koff, bound) < 0.0 {
                    kon = self.bounds.log10_kon.clamp(koff - bound);
                }
            }
        }
        params[n - 2] = kon;
        params[n - 1] = koff;
    }
}

fn r_guess(data: &ResponseMatrix) -> f64 {
    match data.max_observed() {
        Some(m) if m.is_finite() && m > 0.0 => m,
        other => {
            warn!(max_observed = ?other, "no positive response to normalize by; using 1.0");
            1.0
        }
    }
}

/// Multi-start search; keeps the lowest unpenalized loss, first found on ties.
fn search(
    data: &ResponseMatrix,
    layout: RmaxLayout,
    options: &FittingOptions,
    enforce_kd_bound: bool,
) -> Result<JointFit> {
    let scale = r_guess(data);
    let problem = KineticsProblem::new(data, scale, layout, options, enforce_kd_bound);
    let settings = LmSettings::new(options.eps(), options.max_iterations());

    let mut best: Option<(f64, JointFit)> = None;
    for (idx, guess) in options.init_params().iter().enumerate() {
        let x0 = problem.start_vector(guess.rmax_scale, guess.log10_kon, guess.log10_koff);
        let outcome = minimize(&problem, &x0, &settings);
        let loss = problem.unpenalized_cost(&outcome.params);
        debug!(
            start = idx,
            loss,
            search_cost = outcome.cost,
            iterations = outcome.iterations,
            converged = outcome.converged,
            "optimizer run finished"
        );

        let better = best.as_ref().is_none_or(|(best_loss, _)| loss < *best_loss);
        if better {
            best = Some((
                loss,
                JointFit {
                    params: outcome.params,
                    r_guess: scale,
                    start: idx,
                    iterations: outcome.iterations,
                    converged: outcome.converged,
                },
            ));
        }
    }

    best.map(|(_, fit)| fit)
        .ok_or_else(|| KineticsError::config("At least one initial guess is required."))
}

fn fit_global(data: &ResponseMatrix, options: &FittingOptions) -> Result<FitOutput> {
    let joint = search(data, RmaxLayout::Shared, options, true)?;
    let rmax = joint.rmax(1)[0];
    let (log10_kon, log10_koff) = (joint.log10_kon(), joint.log10_koff());
    let predicted = predict_matrix(data, &ParamValue::Scalar(rmax), log10_kon, log10_koff);

    let kp = KineticParams::new(rmax, log10_kon, log10_koff);
    Ok(assemble(
        data,
        Topology::Global,
        ParamValue::Scalar(rmax),
        kp.kon(),
        kp.koff(),
        &vec![kp; data.n_curves()],
        predicted,
        joint.diagnostics(),
    ))
}

fn fit_partial(data: &ResponseMatrix, options: &FittingOptions) -> Result<FitOutput> {
    let joint = search(data, RmaxLayout::PerCurve, options, options.partial_kd_bound())?;
    let rmax = joint.rmax(data.n_curves());
    let (log10_kon, log10_koff) = (joint.log10_kon(), joint.log10_koff());
    let rmax = ParamValue::PerCurve(rmax);
    let predicted = predict_matrix(data, &rmax, log10_kon, log10_koff);

    let per_curve: Vec<KineticParams> = (0..data.n_curves())
        .map(|col| KineticParams::new(rmax.at(col), log10_kon, log10_koff))
        .collect();
    let kp = per_curve[0];
    Ok(assemble(
        data,
        Topology::Partial,
        rmax,
        kp.kon(),
        kp.koff(),
        &per_curve,
        predicted,
        joint.diagnostics(),
    ))
}

fn fit_local(data: &ResponseMatrix, options: &FittingOptions) -> Result<FitOutput> {
    let n = data.n_curves();
    let mut per_curve = Vec::with_capacity(n);
    let mut diagnostics = None;
    let mut predicted_values = DMatrix::zeros(data.time().len(), n);

    for col in 0..n {
        let curve = data.column(col)?;
        let joint = search(&curve, RmaxLayout::Shared, options, true)?;
        let kp = KineticParams::new(joint.rmax(1)[0], joint.log10_kon(), joint.log10_koff());
        let curve_pred = predict_matrix(&curve, &ParamValue::Scalar(kp.rmax), kp.log10_kon, kp.log10_koff);
        predicted_values.set_column(col, &curve_pred.values.column(0));
        per_curve.push(kp);
        if diagnostics.is_none() {
            diagnostics = Some(joint.diagnostics());
        }
    }

    let rmax_mean = per_curve.iter().map(|p| p.rmax).sum::<f64>() / n as f64;

    // The blank takes part in the per-curve fits but not in the rate averages.
    let mut rated: Vec<&KineticParams> = per_curve
        .iter()
        .zip(data.concentrations())
        .filter(|(_, c)| **c != 0.0)
        .map(|(p, _)| p)
        .collect();
    if rated.is_empty() {
        warn!("only a blank curve was fitted; averaging its rates");
        rated = per_curve.iter().collect();
    }
    let log_kon = rated.iter().map(|p| p.log10_kon).sum::<f64>() / rated.len() as f64;
    let log_koff = rated.iter().map(|p| p.log10_koff).sum::<f64>() / rated.len() as f64;
    let aggregate = KineticParams::new(rmax_mean, log_kon, log_koff);

    let predicted = PredictedCurveMatrix {
        time: data.time().to_vec(),
        concentrations: data.concentrations().to_vec(),
        values: predicted_values,
    };
    let diagnostics = diagnostics.ok_or_else(|| KineticsError::value("Empty dataset: nothing to fit."))?;

    Ok(assemble(
        data,
        Topology::Local,
        ParamValue::Scalar(rmax_mean),
        aggregate.kon(),
        aggregate.koff(),
        &per_curve,
        predicted,
        diagnostics,
    ))
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    data: &ResponseMatrix,
    topology: Topology,
    rmax: ParamValue,
    kon: f64,
    koff: f64,
    per_curve: &[KineticParams],
    predicted: PredictedCurveMatrix,
    diagnostics: FitDiagnostics,
) -> FitOutput {
    let losses = curve_losses(&predicted.values, data.values());
    let stats = fit_statistics(data.values(), &losses, topology.free_parameters(data.n_curves()));

    let curves = data
        .concentrations()
        .iter()
        .enumerate()
        .map(|(col, &concentration)| CurveFit {
            concentration,
            rmax: per_curve[col].rmax,
            kon: per_curve[col].kon(),
            koff: per_curve[col].koff(),
            loss: losses[col],
            n_points: stats.n_points[col],
            r2: stats.r2[col],
            chi2: stats.chi2[col],
        })
        .collect();

    let result = KineticsResult {
        topology,
        rmax,
        kon,
        koff,
        kd: koff / kon,
        total_loss: losses.iter().sum(),
        loss: losses,
        r2: stats.r2,
        chi2: stats.chi2,
        global_r2: stats.global_r2,
        global_chi2: stats.global_chi2,
        concentrations: data.concentrations().to_vec(),
        curves,
        diagnostics,
    };
    FitOutput { result, predicted }
}
