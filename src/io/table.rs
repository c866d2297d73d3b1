//! Wide response tables: one time column plus one column per concentration.
//!
//! ```text
//! time,0 nM,1 nM,10 nM,100 nM
//! 0.0,0.01,0.12,1.10,9.40
//! ...
//! ```
//!
//! Headers are concentration labels in a single unit, converted to molar via
//! `units::convert`. Columns whose header has no leading number are dropped
//! (with a warning). Empty cells are missing values.
//!
//! Design goals:
//! - **Row-level validation** (bad rows are reported, not silently skipped)
//! - **No fitting logic** here

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::StringRecord;
use nalgebra::DMatrix;
use tracing::info;

use crate::domain::{ResponseMatrix, TimeBreak};
use crate::error::{KineticsError, Result};
use crate::units::{ConcentrationUnit, convert};

/// How to interpret the header labels of a response table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableSpec {
    pub unit: ConcentrationUnit,
    pub reference_mass: f64,
}

impl Default for TableSpec {
    fn default() -> Self {
        Self {
            unit: ConcentrationUnit::Molar,
            reference_mass: 0.0,
        }
    }
}

/// Load a response table from disk.
pub fn load_response_table(path: &Path, spec: &TableSpec, time_break: TimeBreak) -> Result<ResponseMatrix> {
    let file = File::open(path)
        .map_err(|e| KineticsError::io(format!("Failed to open response table '{}'", path.display()), e))?;
    let data = read_response_table(file, spec, time_break)?;
    info!(
        path = %path.display(),
        curves = data.n_curves(),
        samples = data.time().len(),
        "loaded response table"
    );
    Ok(data)
}

/// Parse a response table from any reader.
pub fn read_response_table<R: Read>(reader: R, spec: &TableSpec, time_break: TimeBreak) -> Result<ResponseMatrix> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(false)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader
        .headers()
        .map_err(|e| KineticsError::parse(format!("Failed to read table headers: {e}")))?
        .clone();
    if headers.len() < 2 {
        return Err(KineticsError::config(
            "Response table needs a time column and at least one concentration column.",
        ));
    }

    let labels: Vec<&str> = headers.iter().skip(1).map(normalize_header_name).collect();
    let conversion = convert(&labels, spec.unit, spec.reference_mass)?;
    if conversion.molar.is_empty() {
        return Err(KineticsError::value("No concentration column header could be parsed."));
    }

    let mut time = Vec::new();
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header; lines are 1-based.
        let line = idx + 2;
        let record = result.map_err(|e| KineticsError::parse(format!("Line {line}: CSV parse error: {e}")))?;
        let (t, values) = parse_row(&record, &conversion.kept, line)?;
        time.push(t);
        rows.push(values);
    }
    if rows.is_empty() {
        return Err(KineticsError::value("Response table has no data rows."));
    }

    let n_cols = conversion.kept.len();
    let values = DMatrix::from_fn(rows.len(), n_cols, |r, c| rows[r][c]);
    ResponseMatrix::new(time, conversion.molar, values, time_break)
}

fn parse_row(record: &StringRecord, kept: &[usize], line: usize) -> Result<(f64, Vec<f64>)> {
    let t = record
        .get(0)
        .and_then(parse_cell)
        .ok_or_else(|| KineticsError::parse(format!("Line {line}: missing or invalid time value.")))?;

    let mut values = Vec::with_capacity(kept.len());
    for &col in kept {
        // +1 skips the time column.
        let raw = record.get(col + 1).unwrap_or("");
        if raw.is_empty() {
            values.push(f64::NAN);
            continue;
        }
        match parse_cell(raw) {
            Some(v) => values.push(v),
            None => {
                return Err(KineticsError::parse(format!(
                    "Line {line}: invalid response value `{raw}` in column {}.",
                    col + 2
                )));
            }
        }
    }
    Ok((t, values))
}

fn parse_cell(raw: &str) -> Option<f64> {
    let lowered = raw.to_ascii_lowercase();
    if lowered == "nan" || lowered == "na" {
        return Some(f64::NAN);
    }
    raw.parse::<f64>().ok()
}

fn normalize_header_name(name: &str) -> &str {
    // Spreadsheet exports sometimes prefix the first header with a BOM.
    name.trim().trim_start_matches('\u{feff}')
}

/// Write a response table with molar concentration headers.
pub fn write_response_table(path: &Path, data: &ResponseMatrix) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| KineticsError::io(format!("Failed to create response table '{}'", path.display()), e))?;
    write_matrix_csv(file, "time", data.time(), data.concentrations(), data.values())
}

/// Shared CSV layout for observed and predicted matrices.
pub(crate) fn write_matrix_csv<W: Write>(
    writer: W,
    time_header: &str,
    time: &[f64],
    concentrations: &[f64],
    values: &DMatrix<f64>,
) -> Result<()> {
    let mut w = csv::Writer::from_writer(writer);
    let mut header = vec![time_header.to_string()];
    header.extend(concentrations.iter().map(|c| format!("{c:e}")));
    w.write_record(&header)
        .map_err(|e| KineticsError::parse(format!("Failed to write CSV header: {e}")))?;

    for (row, t) in time.iter().enumerate() {
        let mut record = Vec::with_capacity(concentrations.len() + 1);
        record.push(format!("{t}"));
        for col in 0..concentrations.len() {
            let v = values[(row, col)];
            record.push(if v.is_nan() { String::new() } else { format!("{v}") });
        }
        w.write_record(&record)
            .map_err(|e| KineticsError::parse(format!("Failed to write CSV row: {e}")))?;
    }
    w.flush()
        .map_err(|e| KineticsError::io("Failed to flush CSV output", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_unit_tagged_headers_and_missing_cells() {
        let csv = "time,0 nM,10 nM,100 nM\n0,0,0,0\n1,0.1,1.0,\n2,0.1,2.0,9.0\n";
        let spec = TableSpec {
            unit: ConcentrationUnit::NanoMolar,
            reference_mass: 0.0,
        };
        let data = read_response_table(csv.as_bytes(), &spec, TimeBreak::Shared(1.0)).unwrap();
        assert_eq!(data.n_curves(), 3);
        assert!((data.concentrations()[2] - 1e-7).abs() < 1e-20);
        assert!(data.values()[(1, 2)].is_nan());
        assert_eq!(data.n_points(), 8);
    }

    #[test]
    fn unparseable_header_column_is_dropped() {
        let csv = "time,ref,1e-9\n0,5,0\n1,5,1\n";
        let data = read_response_table(csv.as_bytes(), &TableSpec::default(), TimeBreak::Shared(0.5)).unwrap();
        assert_eq!(data.concentrations(), &[1e-9]);
        assert_eq!(data.values()[(1, 0)], 1.0);
    }

    #[test]
    fn bad_cell_reports_line() {
        let csv = "time,1e-9\n0,0\n1,abc\n";
        let err = read_response_table(csv.as_bytes(), &TableSpec::default(), TimeBreak::Shared(0.5)).unwrap_err();
        assert!(err.to_string().contains("Line 3"));
    }

    #[test]
    fn written_table_reads_back() {
        let values = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.5, f64::NAN]);
        let data = ResponseMatrix::new(vec![0.0, 1.0], vec![1e-9, 1e-8], values, TimeBreak::Shared(0.5)).unwrap();
        let mut buf = Vec::new();
        write_matrix_csv(&mut buf, "time", data.time(), data.concentrations(), data.values()).unwrap();
        let back = read_response_table(buf.as_slice(), &TableSpec::default(), TimeBreak::Shared(0.5)).unwrap();
        assert_eq!(back.concentrations(), data.concentrations());
        assert_eq!(back.values()[(1, 0)], 1.5);
        assert!(back.values()[(1, 1)].is_nan());
    }
}
