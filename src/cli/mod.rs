//! Command-line parsing for the SPR kinetics fitter.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! signal processing and fitting code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::domain::{AlignMode, CycleKind, DeviceFormat, Topology};
use crate::units::ConcentrationUnit;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "spr", version, about = "SPR binding kinetics fitter (1:1 Langmuir)")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit one dataset, print the summary, and optionally export results.
    Fit(FitArgs),
    /// Generate a synthetic dataset with known parameters.
    Simulate(SimulateArgs),
    /// Fit several datasets concurrently with shared options.
    Batch(BatchArgs),
}

/// How to read an input file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum InputKind {
    /// Decide from the file extension (`.json` = records, anything else = table).
    Auto,
    /// Wide CSV table: time column + one column per concentration.
    Table,
    /// Structured per-sample JSON records.
    Records,
}

/// Dataset interpretation shared by `fit` and `batch`.
#[derive(Debug, Args, Clone)]
pub struct InputArgs {
    #[arg(long, value_enum, default_value_t = InputKind::Auto)]
    pub input_kind: InputKind,

    /// Concentration unit of table headers (records files carry their own).
    #[arg(long, value_enum, default_value_t = ConcentrationUnit::Molar)]
    pub unit: ConcentrationUnit,

    /// Molecular mass for mass-based units (0 falls back to 1.0 with a warning).
    #[arg(long, default_value_t = 0.0)]
    pub reference_mass: f64,

    /// Association → dissociation time (s) for tables; repeat once per curve for single-cycle data.
    #[arg(long = "time-break", value_delimiter = ',')]
    pub time_break: Vec<f64>,

    /// Override the device format declared in a records file.
    #[arg(long, value_enum)]
    pub format: Option<DeviceFormat>,

    /// Override the cycle kind declared in a records file.
    #[arg(long, value_enum)]
    pub cycle: Option<CycleKind>,

    /// Dissociation stitching mode.
    #[arg(long, value_enum, default_value_t = AlignMode::Fast)]
    pub align: AlignMode,
}

/// Fitting options; flags override values from `--options`.
#[derive(Debug, Args, Clone, Default)]
pub struct OptionArgs {
    /// JSON fitting options (`initParams`, `KDBound`, `punishLambda`, ...).
    #[arg(long, value_name = "JSON")]
    pub options: Option<PathBuf>,

    /// Lower bound on log10(KD).
    #[arg(long, allow_negative_numbers = true)]
    pub kd_bound: Option<f64>,

    /// Weight of the soft log10(KD) penalty (0 disables it).
    #[arg(long)]
    pub punish_lambda: Option<f64>,

    /// Relative finite-difference step.
    #[arg(long)]
    pub eps: Option<f64>,

    /// Optimizer iteration cap per start.
    #[arg(long)]
    pub max_iterations: Option<usize>,

    /// Keep enforcing the KD bound in the Partial topology.
    #[arg(long)]
    pub partial_kd_bound: bool,
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Dataset file (CSV table or JSON records).
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    #[arg(short = 't', long, value_enum, default_value_t = Topology::Global)]
    pub topology: Topology,

    #[command(flatten)]
    pub data: InputArgs,

    #[command(flatten)]
    pub fit: OptionArgs,

    /// Print per-curve residual summaries.
    #[arg(long)]
    pub residuals: bool,

    /// Export the result (plus run metadata) to JSON.
    #[arg(long)]
    pub export: Option<PathBuf>,

    /// Export the predicted curves to CSV.
    #[arg(long = "export-curves")]
    pub export_curves: Option<PathBuf>,
}

#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Molar concentrations (comma-separated); include 0 for a blank.
    #[arg(long, value_delimiter = ',', default_values_t = vec![0.0, 1e-9, 1e-8, 1e-7])]
    pub concentrations: Vec<f64>,

    #[arg(long, default_value_t = 100.0)]
    pub rmax: f64,

    #[arg(long, default_value_t = 1e5)]
    pub kon: f64,

    #[arg(long, default_value_t = 1e-3)]
    pub koff: f64,

    #[arg(long, default_value_t = 50.0)]
    pub time_break: f64,

    #[arg(long, default_value_t = 300.0)]
    pub duration: f64,

    #[arg(long, default_value_t = 1.0)]
    pub dt: f64,

    /// Standard deviation of the additive noise.
    #[arg(long, default_value_t = 0.5)]
    pub noise: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Write raw records (with baseline) as JSON instead of a CSV table.
    #[arg(long)]
    pub raw: bool,

    /// Output file.
    #[arg(short = 'o', long)]
    pub output: PathBuf,
}

#[derive(Debug, Parser, Clone)]
pub struct BatchArgs {
    /// Dataset files.
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,

    #[arg(short = 't', long, value_enum, default_value_t = Topology::Global)]
    pub topology: Topology,

    #[command(flatten)]
    pub data: InputArgs,

    #[command(flatten)]
    pub fit: OptionArgs,

    /// Directory for one result JSON per input.
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Worker threads (defaults to the number of CPUs).
    #[arg(long)]
    pub jobs: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fit_with_flattened_groups() {
        let cli = Cli::parse_from([
            "spr",
            "fit",
            "data.csv",
            "--topology",
            "partial",
            "--unit",
            "nM",
            "--time-break",
            "50",
            "--kd-bound=-10",
        ]);
        match cli.command {
            Command::Fit(args) => {
                assert_eq!(args.topology, Topology::Partial);
                assert_eq!(args.data.unit, ConcentrationUnit::NanoMolar);
                assert_eq!(args.data.time_break, vec![50.0]);
                assert_eq!(args.fit.kd_bound, Some(-10.0));
                assert_eq!(args.data.align, AlignMode::Fast);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn simulate_defaults_include_blank() {
        let cli = Cli::parse_from(["spr", "simulate", "-o", "out.csv"]);
        match cli.command {
            Command::Simulate(args) => {
                assert_eq!(args.concentrations, vec![0.0, 1e-9, 1e-8, 1e-7]);
                assert!(!args.raw);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
