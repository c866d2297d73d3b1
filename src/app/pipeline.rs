//! Shared "fit pipeline" logic used by the `fit` and `batch` commands.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! read input -> (segment -> align -> stitch) -> fit -> statistics
//!
//! The commands can then focus on presentation and exports.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::cli::{InputArgs, InputKind, OptionArgs};
use crate::domain::{ResponseMatrix, TimeBreak, Topology};
use crate::error::{KineticsError, Result};
use crate::fit::{FitOutput, FittingOptions, FittingOptionsConfig, fit};
use crate::io::{TableSpec, load_records, load_response_table};
use crate::signal::prepare;

/// All computed outputs of a single dataset fit.
#[derive(Debug, Clone)]
pub struct DatasetRun {
    pub label: String,
    pub data: ResponseMatrix,
    pub output: FitOutput,
}

/// Build the fitting options: JSON file first, then flag overrides.
pub fn build_options(args: &OptionArgs) -> Result<FittingOptions> {
    let mut builder = match &args.options {
        Some(path) => {
            let text = fs::read_to_string(path)
                .map_err(|e| KineticsError::io(format!("Failed to read options '{}'", path.display()), e))?;
            FittingOptionsConfig::from_json_str(&text)?.into_builder()
        }
        None => FittingOptions::builder(),
    };

    if let Some(v) = args.kd_bound {
        builder = builder.kd_bound(v);
    }
    if let Some(v) = args.punish_lambda {
        builder = builder.punish_lambda(v);
    }
    if let Some(v) = args.eps {
        builder = builder.eps(v);
    }
    if let Some(v) = args.max_iterations {
        builder = builder.max_iterations(v);
    }
    if args.partial_kd_bound {
        builder = builder.partial_kd_bound(true);
    }
    builder.build()
}

/// Read one dataset into a fit-ready response matrix.
pub fn load_dataset(path: &Path, args: &InputArgs) -> Result<ResponseMatrix> {
    match resolve_kind(path, args.input_kind) {
        InputKind::Records => {
            let records = load_records(path)?;
            let mut config = records.segment_config();
            if let Some(format) = args.format {
                config.format = format;
            }
            if let Some(cycle) = args.cycle {
                config.cycle = cycle;
            }
            let samples = records.raw_samples()?;
            prepare(&samples, &config, args.align)
        }
        InputKind::Table | InputKind::Auto => {
            let spec = TableSpec {
                unit: args.unit,
                reference_mass: args.reference_mass,
            };
            load_response_table(path, &spec, table_time_break(&args.time_break)?)
        }
    }
}

fn resolve_kind(path: &Path, kind: InputKind) -> InputKind {
    match kind {
        InputKind::Auto => {
            let is_json = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("json"));
            if is_json { InputKind::Records } else { InputKind::Table }
        }
        other => other,
    }
}

fn table_time_break(values: &[f64]) -> Result<TimeBreak> {
    match values {
        [] => Err(KineticsError::config(
            "Response tables need `--time-break` (one value, or one per curve).",
        )),
        [single] => Ok(TimeBreak::Shared(*single)),
        many => Ok(TimeBreak::PerCurve(many.to_vec())),
    }
}

/// Load and fit one dataset.
pub fn run_fit(path: &Path, topology: Topology, input: &InputArgs, options: &FittingOptions) -> Result<DatasetRun> {
    let data = load_dataset(path, input)?;
    let output = fit(&data, topology, options)?;
    info!(
        input = %path.display(),
        topology = %topology,
        kd = output.result.kd,
        global_r2 = ?output.result.global_r2,
        "fit finished"
    );
    Ok(DatasetRun {
        label: path.display().to_string(),
        data,
        output,
    })
}
