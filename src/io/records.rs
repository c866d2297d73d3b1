//! Structured per-sample record files (JSON).
//!
//! ```json
//! {
//!   "format": "structured_json",
//!   "cycle": "multi_cycle",
//!   "unit": "nM",
//!   "referenceMass": 0,
//!   "samples": [
//!     { "concentration": "100 nM", "time": [...], "response": [...],
//!       "phaseBoundaryIndices": [60, 240] },
//!     { "concentration": 100, "unit": "pM", "time": [...], "response": [...],
//!       "phaseBoundaryTimes": [30.0, 210.0] },
//!     { "concentration": 10, "baseline": { "time": [...], "response": [...] },
//!       "association": {...}, "dissociation": {...} }
//!   ]
//! }
//! ```
//!
//! Each sample carries exactly one of `phaseBoundaryIndices`,
//! `phaseBoundaryTimes` or the three explicit phase arrays. Concentrations are
//! numbers or unit-tagged labels in the sample's own `unit`, falling back to
//! the file-level `unit`; samples whose label cannot be parsed are dropped
//! with a warning.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domain::{CycleKind, DeviceFormat};
use crate::error::{KineticsError, Result};
use crate::signal::{BlankPolicy, PhaseMarkers, RawSample, SegmentConfig};
use crate::units::{ConcentrationUnit, convert};

/// A concentration given either as a bare number or as a label like `"10 nM"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConcentrationLabel {
    Number(f64),
    Text(String),
}

impl ConcentrationLabel {
    fn as_label(&self) -> String {
        match self {
            ConcentrationLabel::Number(v) => format!("{v:e}"),
            ConcentrationLabel::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub time: Vec<f64>,
    pub response: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRecord {
    pub concentration: ConcentrationLabel,
    /// Overrides the file-level unit for this sample.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<ConcentrationUnit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub time: Vec<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub response: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_boundary_indices: Option<[usize; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_boundary_times: Option<[f64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<PhaseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub association: Option<PhaseRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dissociation: Option<PhaseRecord>,
}

fn default_format() -> DeviceFormat {
    DeviceFormat::StructuredJson
}

fn default_unit() -> ConcentrationUnit {
    ConcentrationUnit::Molar
}

/// A whole record file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFile {
    #[serde(default = "default_format")]
    pub format: DeviceFormat,
    #[serde(default)]
    pub cycle: CycleKind,
    #[serde(default = "default_unit")]
    pub unit: ConcentrationUnit,
    #[serde(default)]
    pub reference_mass: f64,
    #[serde(default)]
    pub blank: BlankPolicy,
    pub samples: Vec<SampleRecord>,
}

impl RecordFile {
    /// Molar records with index markers, as produced by the simulator.
    pub fn from_samples(samples: &[RawSample], format: DeviceFormat) -> Result<Self> {
        let samples: Vec<SampleRecord> = samples.iter().map(SampleRecord::from_raw).collect();
        if samples.is_empty() {
            return Err(KineticsError::value("No samples to write."));
        }
        Ok(Self {
            format,
            cycle: CycleKind::default(),
            unit: ConcentrationUnit::Molar,
            reference_mass: 0.0,
            blank: BlankPolicy::default(),
            samples,
        })
    }

    pub fn segment_config(&self) -> SegmentConfig {
        SegmentConfig {
            format: self.format,
            cycle: self.cycle,
            blank: self.blank,
        }
    }

    /// Convert concentrations to molar and resolve each sample's phase markers.
    ///
    /// Samples are converted in groups sharing one unit; output keeps file order.
    pub fn raw_samples(&self) -> Result<Vec<RawSample>> {
        let units: Vec<ConcentrationUnit> = self.samples.iter().map(|s| s.unit.unwrap_or(self.unit)).collect();
        let mut distinct: Vec<ConcentrationUnit> = Vec::new();
        for unit in &units {
            if !distinct.contains(unit) {
                distinct.push(*unit);
            }
        }

        let mut molar: Vec<Option<f64>> = vec![None; self.samples.len()];
        for unit in distinct {
            let members: Vec<usize> = (0..units.len()).filter(|&i| units[i] == unit).collect();
            let labels: Vec<String> = members
                .iter()
                .map(|&i| self.samples[i].concentration.as_label())
                .collect();
            let conversion = convert(&labels, unit, self.reference_mass)?;
            for (&k, &m) in conversion.kept.iter().zip(&conversion.molar) {
                molar[members[k]] = Some(m);
            }
        }

        molar
            .into_iter()
            .enumerate()
            .filter_map(|(idx, m)| m.map(|m| self.samples[idx].to_raw(m, idx)))
            .collect()
    }
}

impl SampleRecord {
    fn from_raw(sample: &RawSample) -> Self {
        let (indices, times) = match sample.markers {
            PhaseMarkers::Indices {
                association_start,
                dissociation_start,
            } => (Some([association_start, dissociation_start]), None),
            PhaseMarkers::Times {
                association_start,
                dissociation_start,
            } => (None, Some([association_start, dissociation_start])),
        };
        Self {
            concentration: ConcentrationLabel::Number(sample.concentration),
            unit: None,
            time: sample.time.clone(),
            response: sample.response.clone(),
            phase_boundary_indices: indices,
            phase_boundary_times: times,
            baseline: None,
            association: None,
            dissociation: None,
        }
    }

    fn to_raw(&self, concentration: f64, idx: usize) -> Result<RawSample> {
        let phases = (&self.baseline, &self.association, &self.dissociation);
        let explicit = phases.0.is_some() || phases.1.is_some() || phases.2.is_some();
        let marker_count = usize::from(self.phase_boundary_indices.is_some())
            + usize::from(self.phase_boundary_times.is_some())
            + usize::from(explicit);
        if marker_count != 1 {
            return Err(KineticsError::config(format!(
                "Sample #{idx} must give exactly one of phaseBoundaryIndices, phaseBoundaryTimes or phase arrays."
            )));
        }

        if let (Some(b), Some(a), Some(d)) = phases {
            let mut time = Vec::with_capacity(b.time.len() + a.time.len() + d.time.len());
            let mut response = Vec::with_capacity(time.capacity());
            for p in [b, a, d] {
                if p.time.len() != p.response.len() {
                    return Err(KineticsError::config(format!(
                        "Sample #{idx}: phase has {} times but {} responses.",
                        p.time.len(),
                        p.response.len()
                    )));
                }
                time.extend_from_slice(&p.time);
                response.extend_from_slice(&p.response);
            }
            return Ok(RawSample {
                concentration,
                time,
                response,
                markers: PhaseMarkers::Indices {
                    association_start: b.time.len(),
                    dissociation_start: b.time.len() + a.time.len(),
                },
            });
        }
        if explicit {
            return Err(KineticsError::config(format!(
                "Sample #{idx}: explicit phases need baseline, association and dissociation."
            )));
        }

        let markers = match (self.phase_boundary_indices, self.phase_boundary_times) {
            (Some([a, d]), _) => PhaseMarkers::Indices {
                association_start: a,
                dissociation_start: d,
            },
            (_, Some([a, d])) => PhaseMarkers::Times {
                association_start: a,
                dissociation_start: d,
            },
            (None, None) => {
                return Err(KineticsError::config(format!("Sample #{idx} has no phase markers.")));
            }
        };
        Ok(RawSample {
            concentration,
            time: self.time.clone(),
            response: self.response.clone(),
            markers,
        })
    }
}

/// Parse a record file from any reader.
pub fn read_records<R: Read>(reader: R) -> Result<RecordFile> {
    let file: RecordFile = serde_json::from_reader(reader)
        .map_err(|e| KineticsError::parse(format!("Invalid sample record JSON: {e}")))?;
    if file.samples.is_empty() {
        return Err(KineticsError::value("Record file contains no samples."));
    }
    Ok(file)
}

/// Load a record file from disk.
pub fn load_records(path: &Path) -> Result<RecordFile> {
    let file = File::open(path)
        .map_err(|e| KineticsError::io(format!("Failed to open record file '{}'", path.display()), e))?;
    let records = read_records(BufReader::new(file))?;
    info!(
        path = %path.display(),
        samples = records.samples.len(),
        format = ?records.format,
        "loaded sample records"
    );
    Ok(records)
}

/// Write a record file as pretty JSON.
pub fn write_records(path: &Path, records: &RecordFile) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| KineticsError::io(format!("Failed to create record file '{}'", path.display()), e))?;
    serde_json::to_writer_pretty(file, records)
        .map_err(|e| KineticsError::parse(format!("Failed to write record JSON: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_phase_arrays_become_index_markers() {
        let json = r#"{
            "unit": "nM",
            "samples": [{
                "concentration": "10 nM",
                "baseline": {"time": [0, 1], "response": [0, 0]},
                "association": {"time": [2, 3, 4], "response": [1, 2, 3]},
                "dissociation": {"time": [5], "response": [2]}
            }]
        }"#;
        let file = read_records(json.as_bytes()).unwrap();
        let raw = file.raw_samples().unwrap();
        assert_eq!(raw.len(), 1);
        assert!((raw[0].concentration - 1e-8).abs() < 1e-20);
        assert_eq!(raw[0].time.len(), 6);
        assert_eq!(
            raw[0].markers,
            PhaseMarkers::Indices {
                association_start: 2,
                dissociation_start: 5
            }
        );
    }

    #[test]
    fn numeric_concentrations_and_time_markers() {
        let json = r#"{
            "format": "zipped_export",
            "samples": [{
                "concentration": 1e-9,
                "time": [0, 1, 2, 3],
                "response": [0, 1, 2, 1],
                "phaseBoundaryTimes": [1.0, 2.5]
            }]
        }"#;
        let file = read_records(json.as_bytes()).unwrap();
        assert_eq!(file.segment_config().format, DeviceFormat::ZippedExport);
        let raw = file.raw_samples().unwrap();
        assert_eq!(raw[0].concentration, 1e-9);
        assert!(matches!(raw[0].markers, PhaseMarkers::Times { .. }));
    }

    #[test]
    fn conflicting_markers_are_rejected() {
        let json = r#"{
            "samples": [{
                "concentration": 1e-9,
                "time": [0, 1, 2],
                "response": [0, 1, 2],
                "phaseBoundaryIndices": [1, 2],
                "phaseBoundaryTimes": [1.0, 2.0]
            }]
        }"#;
        let err = read_records(json.as_bytes()).unwrap().raw_samples().unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn simulator_records_read_back() {
        let raw = vec![RawSample {
            concentration: 1e-8,
            time: vec![0.0, 1.0, 2.0, 3.0],
            response: vec![0.0, 0.0, 1.0, 0.5],
            markers: PhaseMarkers::Indices {
                association_start: 1,
                dissociation_start: 3,
            },
        }];
        let file = RecordFile::from_samples(&raw, DeviceFormat::StructuredJson).unwrap();
        let json = serde_json::to_string(&file).unwrap();
        let back = read_records(json.as_bytes()).unwrap().raw_samples().unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn unparseable_concentration_drops_sample() {
        let json = r#"{
            "samples": [
                {"concentration": "buffer", "time": [0, 1], "response": [0, 0], "phaseBoundaryIndices": [0, 1]},
                {"concentration": "1e-8", "time": [0, 1], "response": [0, 1], "phaseBoundaryIndices": [0, 1]}
            ]
        }"#;
        let raw = read_records(json.as_bytes()).unwrap().raw_samples().unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].concentration, 1e-8);
    }

    #[test]
    fn per_sample_unit_overrides_file_unit() {
        let json = r#"{
            "unit": "M",
            "samples": [
                {"concentration": "100", "unit": "nM", "time": [0, 1, 2, 3], "response": [0, 0, 1, 0], "phaseBoundaryIndices": [1, 3]},
                {"concentration": 2e-6, "time": [0, 1, 2, 3], "response": [0, 0, 1, 0], "phaseBoundaryIndices": [1, 3]},
                {"concentration": "5", "unit": "uM", "time": [0, 1, 2, 3], "response": [0, 0, 1, 0], "phaseBoundaryIndices": [1, 3]}
            ]
        }"#;
        let file = read_records(json.as_bytes()).unwrap();
        assert_eq!(file.samples[0].unit, Some(ConcentrationUnit::NanoMolar));
        let raw = file.raw_samples().unwrap();
        let molar: Vec<f64> = raw.iter().map(|s| s.concentration).collect();
        assert_eq!(molar.len(), 3);
        assert!((molar[0] - 1e-7).abs() < 1e-20);
        assert_eq!(molar[1], 2e-6);
        assert!((molar[2] - 5e-6).abs() < 1e-18);
    }
}
