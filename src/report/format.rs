//! Formatted terminal output for fit results.
//!
//! Formatting lives here so the fitting code stays free of presentation and
//! output changes stay localized.

use crate::domain::{KineticsResult, ParamValue};
use crate::report::residuals::ResidualSummary;

/// Format the run summary: headline parameters, fit quality, per-curve table.
pub fn format_fit_summary(label: &str, result: &KineticsResult) -> String {
    let mut out = String::new();

    out.push_str("=== spr - SPR Kinetics Fit ===\n");
    out.push_str(&format!("Dataset: {label}\n"));
    out.push_str(&format!(
        "Topology: {} | curves={}\n",
        result.topology.display_name(),
        result.concentrations.len()
    ));

    out.push_str("\nParameters:\n");
    out.push_str(&format!("- Rmax : {}\n", fmt_param(&result.rmax)));
    out.push_str(&format!("- kon  : {} 1/(M*s)\n", fmt_sci(result.kon)));
    out.push_str(&format!("- koff : {} 1/s\n", fmt_sci(result.koff)));
    out.push_str(&format!("- KD   : {} M\n", fmt_sci(result.kd)));

    out.push_str("\nQuality:\n");
    out.push_str(&format!(
        "- loss={} R2={} Chi2={}\n",
        fmt_sci(result.total_loss),
        fmt_opt(result.global_r2, 5),
        fmt_opt(result.global_chi2, 4)
    ));
    let d = &result.diagnostics;
    out.push_str(&format!(
        "- start #{} | iterations={} | converged={} | R_guess={:.3}\n",
        d.best_start, d.iterations, d.converged, d.r_guess
    ));

    out.push_str("\nPer curve:\n");
    out.push_str(&format_curve_table(result));
    out
}

fn format_curve_table(result: &KineticsResult) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:>12} {:>10} {:>12} {:>12} {:>12} {:>9} {:>10}\n",
        "conc[M]", "Rmax", "kon", "koff", "loss", "R2", "Chi2"
    ));
    out.push_str(&format!(
        "{:->12} {:->10} {:->12} {:->12} {:->12} {:->9} {:->10}\n",
        "", "", "", "", "", "", ""
    ));
    for c in &result.curves {
        out.push_str(&format!(
            "{:>12} {:>10.3} {:>12} {:>12} {:>12} {:>9} {:>10}\n",
            fmt_sci(c.concentration),
            c.rmax,
            fmt_sci(c.kon),
            fmt_sci(c.koff),
            fmt_sci(c.loss),
            fmt_opt(c.r2, 5),
            fmt_opt(c.chi2, 4),
        ));
    }
    out
}

/// Format the worst-fitting points of each curve.
pub fn format_residuals(summaries: &[ResidualSummary]) -> String {
    let mut out = String::new();
    out.push_str("Largest residuals:\n");
    for s in summaries {
        match s.worst {
            Some((t, r)) => out.push_str(&format!(
                "- c={} rms={:.4} worst={:+.4} at t={:.1}s\n",
                fmt_sci(s.concentration),
                s.rms,
                r,
                t
            )),
            None => out.push_str(&format!("- c={} (no observations)\n", fmt_sci(s.concentration))),
        }
    }
    out
}

fn fmt_param(v: &ParamValue) -> String {
    match v {
        ParamValue::Scalar(x) => format!("{x:.4}"),
        ParamValue::PerCurve(xs) => {
            let parts: Vec<String> = xs.iter().map(|x| format!("{x:.4}")).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}

fn fmt_sci(v: f64) -> String {
    format!("{v:.4e}")
}

fn fmt_opt(v: Option<f64>, digits: usize) -> String {
    match v {
        Some(x) => format!("{x:.digits$}"),
        None => "n/a".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CurveFit, FitDiagnostics, Topology};

    fn result() -> KineticsResult {
        KineticsResult {
            topology: Topology::Global,
            rmax: ParamValue::Scalar(100.0),
            kon: 1e5,
            koff: 1e-3,
            kd: 1e-8,
            total_loss: 2.5,
            loss: vec![2.5],
            r2: vec![Some(0.99)],
            chi2: vec![None],
            global_r2: Some(0.99),
            global_chi2: None,
            concentrations: vec![1e-8],
            curves: vec![CurveFit {
                concentration: 1e-8,
                rmax: 100.0,
                kon: 1e5,
                koff: 1e-3,
                loss: 2.5,
                n_points: 3,
                r2: Some(0.99),
                chi2: None,
            }],
            diagnostics: FitDiagnostics {
                best_start: 0,
                iterations: 12,
                converged: true,
                r_guess: 42.0,
            },
        }
    }

    #[test]
    fn summary_shows_headline_parameters() {
        let s = format_fit_summary("demo", &result());
        assert!(s.contains("Topology: Global"));
        assert!(s.contains("KD   : 1.0000e-8 M"));
        assert!(s.contains("Chi2=n/a"));
    }

    #[test]
    fn residuals_without_points_are_marked() {
        let s = format_residuals(&[ResidualSummary {
            concentration: 0.0,
            rms: 0.0,
            worst: None,
        }]);
        assert!(s.contains("no observations"));
    }
}
