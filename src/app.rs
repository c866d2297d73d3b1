//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments
//! - loads and prepares datasets
//! - runs the fitting driver
//! - prints reports
//! - writes optional exports

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use rayon::prelude::*;
use tracing::{error, info};

use crate::cli::{BatchArgs, Command, FitArgs, SimulateArgs};
use crate::data::{RawLayout, SensorgramSpec, synthesize, synthesize_samples};
use crate::domain::DeviceFormat;
use crate::error::{KineticsError, Result};
use crate::io::{RecordFile, ResultFile, write_predicted_csv, write_records, write_response_table, write_result_json};
use crate::models::KineticParams;
use crate::report::{format_fit_summary, format_residuals, summarize_residuals};

pub mod pipeline;

/// Entry point for the `spr` binary.
pub fn run() -> Result<()> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Batch(args) => handle_batch(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<()> {
    let options = pipeline::build_options(&args.fit)?;
    let run = pipeline::run_fit(&args.input, args.topology, &args.data, &options)?;

    println!("{}", format_fit_summary(&run.label, &run.output.result));
    if args.residuals {
        let summaries = summarize_residuals(&run.data, &run.output.predicted)?;
        println!("{}", format_residuals(&summaries));
    }

    if let Some(path) = &args.export {
        let file = ResultFile::new(&run.label, &options, &run.output.result)?;
        write_result_json(path, &file)?;
        info!(path = %path.display(), "wrote result JSON");
    }
    if let Some(path) = &args.export_curves {
        write_predicted_csv(path, &run.output.predicted)?;
        info!(path = %path.display(), "wrote predicted curves");
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<()> {
    if !(args.kon > 0.0 && args.koff > 0.0) {
        return Err(KineticsError::config("kon and koff must be > 0."));
    }
    let spec = SensorgramSpec {
        concentrations: args.concentrations.clone(),
        params: KineticParams::from_rates(args.rmax, args.kon, args.koff),
        time_break: args.time_break,
        duration: args.duration,
        dt: args.dt,
        noise_sd: args.noise,
        seed: args.seed,
    };

    if args.raw {
        let samples = synthesize_samples(&spec, &RawLayout::default())?;
        let records = RecordFile::from_samples(&samples, DeviceFormat::StructuredJson)?;
        write_records(&args.output, &records)?;
    } else {
        let data = synthesize(&spec)?;
        write_response_table(&args.output, &data)?;
    }
    info!(
        path = %args.output.display(),
        curves = spec.concentrations.len(),
        raw = args.raw,
        "wrote synthetic dataset"
    );
    Ok(())
}

fn handle_batch(args: BatchArgs) -> Result<()> {
    let options = pipeline::build_options(&args.fit)?;
    if let Some(dir) = &args.out_dir {
        fs::create_dir_all(dir)
            .map_err(|e| KineticsError::io(format!("Failed to create output directory '{}'", dir.display()), e))?;
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(args.jobs.unwrap_or(0))
        .build()
        .map_err(|e| KineticsError::config(format!("Failed to build worker pool: {e}")))?;

    let results: Vec<(PathBuf, Result<()>)> = pool.install(|| {
        args.inputs
            .par_iter()
            .map(|path| {
                let outcome = fit_one(path, &args, &options);
                (path.clone(), outcome)
            })
            .collect()
    });

    let mut failed = 0usize;
    for (path, outcome) in &results {
        if let Err(err) = outcome {
            failed += 1;
            error!(input = %path.display(), %err, "batch item failed");
        }
    }
    if failed > 0 {
        return Err(KineticsError::value(format!(
            "{failed} of {} datasets failed.",
            results.len()
        )));
    }
    Ok(())
}

fn fit_one(path: &Path, args: &BatchArgs, options: &crate::fit::FittingOptions) -> Result<()> {
    let run = pipeline::run_fit(path, args.topology, &args.data, options)?;
    let r = &run.output.result;
    println!(
        "{}\t{}\tkon={:.4e}\tkoff={:.4e}\tKD={:.4e}\tR2={}",
        run.label,
        r.topology,
        r.kon,
        r.koff,
        r.kd,
        r.global_r2.map_or_else(|| "n/a".to_string(), |v| format!("{v:.5}"))
    );

    if let Some(dir) = &args.out_dir {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("result");
        let file = ResultFile::new(&run.label, options, r)?;
        write_result_json(&dir.join(format!("{stem}.result.json")), &file)?;
    }
    Ok(())
}
