//! Export fit results.
//!
//! - result JSON: `KineticsResult` plus run metadata (timestamp, source, options)
//! - predicted-curve CSV: same layout as the response table input

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{KineticsResult, PredictedCurveMatrix};
use crate::error::{KineticsError, Result};
use crate::fit::FittingOptions;
use crate::io::table::write_matrix_csv;

/// On-disk result document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultFile {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub source: String,
    pub options: serde_json::Value,
    pub result: KineticsResult,
}

impl ResultFile {
    pub fn new(source: &str, options: &FittingOptions, result: &KineticsResult) -> Result<Self> {
        let options = serde_json::to_value(options)
            .map_err(|e| KineticsError::parse(format!("Failed to serialize fitting options: {e}")))?;
        Ok(Self {
            tool: "spr".to_string(),
            generated_at: Utc::now(),
            source: source.to_string(),
            options,
            result: result.clone(),
        })
    }
}

/// Write a result JSON file.
pub fn write_result_json(path: &Path, file: &ResultFile) -> Result<()> {
    let out = File::create(path)
        .map_err(|e| KineticsError::io(format!("Failed to create result JSON '{}'", path.display()), e))?;
    serde_json::to_writer_pretty(out, file)
        .map_err(|e| KineticsError::parse(format!("Failed to write result JSON: {e}")))?;
    Ok(())
}

/// Read a result JSON file.
pub fn read_result_json(path: &Path) -> Result<ResultFile> {
    let file = File::open(path)
        .map_err(|e| KineticsError::io(format!("Failed to open result JSON '{}'", path.display()), e))?;
    serde_json::from_reader(file).map_err(|e| KineticsError::parse(format!("Invalid result JSON: {e}")))
}

/// Write the predicted curves as CSV (time column + one column per concentration).
pub fn write_predicted_csv(path: &Path, predicted: &PredictedCurveMatrix) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| KineticsError::io(format!("Failed to create predicted CSV '{}'", path.display()), e))?;
    write_matrix_csv(file, "time", &predicted.time, &predicted.concentrations, &predicted.values)
}
