//! Phase segmentation of raw per-sample records.
//!
//! Every record is one concentration's sensorgram: time-ordered readings plus
//! markers for where the association and dissociation phases start. The marker
//! encoding depends on the export family (`DeviceFormat`), but the output is
//! always the same: baseline / association / dissociation matrices (one column
//! per concentration) plus the `TimeBreak`.
//!
//! Segmentation is length-preserving per record. Injection-artifact truncation
//! and the blank (zero-concentration) policy are separate, explicit steps that
//! run afterwards.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{CycleKind, DeviceFormat, SignalMatrix, TimeBreak, blank_index};
use crate::error::{KineticsError, Result};

/// Association samples dropped after injection on single-curve exports.
pub const INJECTION_ARTIFACT_SAMPLES: usize = 5;

/// Dissociation is capped at this multiple of the association length.
pub const DISSOCIATION_LENGTH_FACTOR: usize = 2;

/// Where the association and dissociation phases start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseMarkers {
    /// Sample indices (association start, dissociation start).
    Indices {
        association_start: usize,
        dissociation_start: usize,
    },
    /// Event-log times; each phase starts at the first sample at or after its marker.
    Times {
        association_start: f64,
        dissociation_start: f64,
    },
}

/// One raw sensorgram with its concentration already converted to molar.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSample {
    pub concentration: f64,
    pub time: Vec<f64>,
    pub response: Vec<f64>,
    pub markers: PhaseMarkers,
}

/// A contiguous run of samples.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Phase {
    pub time: Vec<f64>,
    pub response: Vec<f64>,
}

impl Phase {
    fn from_range(sample: &RawSample, start: usize, end: usize) -> Self {
        Self {
            time: sample.time[start..end].to_vec(),
            response: sample.response[start..end].to_vec(),
        }
    }

    pub fn len(&self) -> usize {
        self.response.len()
    }

    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }
}

/// Three phases of one record.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedCurve {
    pub concentration: f64,
    pub baseline: Phase,
    pub association: Phase,
    pub dissociation: Phase,
}

impl SegmentedCurve {
    pub fn total_len(&self) -> usize {
        self.baseline.len() + self.association.len() + self.dissociation.len()
    }

    /// Drop the first injection-artifact samples and cap the dissociation length.
    ///
    /// Returns `false` when the association phase was too short to truncate.
    pub fn truncate_injection_artifacts(&mut self) -> bool {
        let truncated = if self.association.len() > INJECTION_ARTIFACT_SAMPLES {
            self.association.time.drain(..INJECTION_ARTIFACT_SAMPLES);
            self.association.response.drain(..INJECTION_ARTIFACT_SAMPLES);
            true
        } else {
            warn!(
                concentration = self.concentration,
                association_len = self.association.len(),
                "association phase too short to drop injection artifacts; keeping all samples"
            );
            false
        };

        let cap = DISSOCIATION_LENGTH_FACTOR * self.association.len();
        if self.dissociation.len() > cap {
            self.dissociation.time.truncate(cap);
            self.dissociation.response.truncate(cap);
        }
        truncated
    }
}

/// Splits one raw record into its three phases.
pub trait SignalSegmenter {
    fn split(&self, sample: &RawSample) -> Result<SegmentedCurve>;
}

impl SignalSegmenter for DeviceFormat {
    fn split(&self, sample: &RawSample) -> Result<SegmentedCurve> {
        validate_sample(sample)?;
        let (association_start, dissociation_start) = match (self, &sample.markers) {
            (
                DeviceFormat::SingleCurveExport | DeviceFormat::StructuredJson,
                PhaseMarkers::Indices {
                    association_start,
                    dissociation_start,
                },
            ) => (*association_start, *dissociation_start),
            (
                DeviceFormat::ZippedExport,
                PhaseMarkers::Times {
                    association_start,
                    dissociation_start,
                },
            ) => (
                index_at_or_after(&sample.time, *association_start),
                index_at_or_after(&sample.time, *dissociation_start),
            ),
            (format, markers) => {
                return Err(KineticsError::config(format!(
                    "Device format {format:?} does not support phase markers {markers:?}."
                )));
            }
        };

        let n = sample.time.len();
        if !(association_start < dissociation_start && dissociation_start <= n) {
            return Err(KineticsError::value(format!(
                "Invalid phase boundaries for concentration {}: association={association_start}, dissociation={dissociation_start}, samples={n}.",
                sample.concentration
            )));
        }

        Ok(SegmentedCurve {
            concentration: sample.concentration,
            baseline: Phase::from_range(sample, 0, association_start),
            association: Phase::from_range(sample, association_start, dissociation_start),
            dissociation: Phase::from_range(sample, dissociation_start, n),
        })
    }
}

fn validate_sample(sample: &RawSample) -> Result<()> {
    if sample.time.len() != sample.response.len() {
        return Err(KineticsError::config(format!(
            "Sample at concentration {} has {} times but {} responses.",
            sample.concentration,
            sample.time.len(),
            sample.response.len()
        )));
    }
    if sample.time.is_empty() {
        return Err(KineticsError::value(format!(
            "Sample at concentration {} is empty.",
            sample.concentration
        )));
    }
    if sample.time.iter().any(|t| !t.is_finite()) || sample.time.windows(2).any(|w| w[1] <= w[0]) {
        return Err(KineticsError::value(format!(
            "Sample at concentration {} must have finite, strictly increasing time.",
            sample.concentration
        )));
    }
    if !(sample.concentration.is_finite() && sample.concentration >= 0.0) {
        return Err(KineticsError::value(format!(
            "Invalid concentration {}.",
            sample.concentration
        )));
    }
    Ok(())
}

fn index_at_or_after(time: &[f64], marker: f64) -> usize {
    time.iter().position(|&t| t >= marker).unwrap_or(time.len())
}

/// What to do with the blank (zero-concentration) curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BlankPolicy {
    /// Replace the blank's signal with zeros.
    pub zero_signal: bool,
    /// Remove the blank column (and its concentration) entirely.
    pub drop_column: bool,
    /// Constant factor applied to every signal.
    pub expansion: f64,
}

impl Default for BlankPolicy {
    fn default() -> Self {
        Self {
            zero_signal: false,
            drop_column: false,
            expansion: 1.0,
        }
    }
}

/// Segmentation settings for one dataset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentConfig {
    pub format: DeviceFormat,
    pub cycle: CycleKind,
    pub blank: BlankPolicy,
}

impl SegmentConfig {
    pub fn new(format: DeviceFormat) -> Self {
        Self {
            format,
            cycle: CycleKind::default(),
            blank: BlankPolicy::default(),
        }
    }
}

/// Phase matrices for a whole dataset.
///
/// Times are relative: baseline from its first sample, association and
/// dissociation from the (possibly truncated) association start, so the
/// dissociation axis begins near `time_break`.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentedDataset {
    pub concentrations: Vec<f64>,
    pub baseline: SignalMatrix,
    pub association: SignalMatrix,
    pub dissociation: SignalMatrix,
    pub time_break: TimeBreak,
}

/// Segment every record of a dataset and assemble the phase matrices.
pub fn segment(samples: &[RawSample], config: &SegmentConfig) -> Result<SegmentedDataset> {
    if samples.is_empty() {
        return Err(KineticsError::value("Empty dataset: no samples to segment."));
    }
    if !(config.blank.expansion.is_finite() && config.blank.expansion > 0.0) {
        return Err(KineticsError::config(format!(
            "Expansion coefficient must be finite and > 0 (got {}).",
            config.blank.expansion
        )));
    }

    let concentrations: Vec<f64> = samples.iter().map(|s| s.concentration).collect();
    // Fatal before any work: more than one blank.
    let blank = blank_index(&concentrations)?;

    let mut curves = Vec::with_capacity(samples.len());
    for sample in samples {
        let mut curve = config.format.split(sample)?;
        if config.format.truncates() {
            curve.truncate_injection_artifacts();
        }
        curves.push(curve);
    }

    let breaks: Vec<f64> = curves.iter().map(curve_time_break).collect();
    let time_break = match config.cycle {
        CycleKind::SingleCycle => TimeBreak::PerCurve(breaks),
        CycleKind::MultiCycle => {
            let shared = breaks[0];
            let spread = breaks.iter().map(|b| (b - shared).abs()).fold(0.0, f64::max);
            if spread > 1e-6 * shared.abs().max(1.0) {
                warn!(
                    shared,
                    spread,
                    "time breaks differ between curves; using the first curve's break for the dataset"
                );
            }
            TimeBreak::Shared(shared)
        }
    };

    let mut dataset = SegmentedDataset {
        concentrations,
        baseline: assemble(&curves, |c| (&c.baseline, origin(&c.baseline)))?,
        association: assemble(&curves, |c| (&c.association, origin(&c.association)))?,
        dissociation: assemble(&curves, |c| (&c.dissociation, origin(&c.association)))?,
        time_break,
    };
    apply_blank_policy(&mut dataset, blank, &config.blank);
    debug!(
        curves = dataset.concentrations.len(),
        baseline_rows = dataset.baseline.rows(),
        association_rows = dataset.association.rows(),
        dissociation_rows = dataset.dissociation.rows(),
        "segmented dataset"
    );
    Ok(dataset)
}

fn origin(phase: &Phase) -> f64 {
    phase.time.first().copied().unwrap_or(0.0)
}

fn curve_time_break(curve: &SegmentedCurve) -> f64 {
    let t0 = origin(&curve.association);
    match curve.dissociation.time.first() {
        Some(&t) => t - t0,
        None => curve.association.time.last().map_or(0.0, |&t| t - t0),
    }
}

/// Build one phase matrix on the merged relative-time axis of every curve.
///
/// Each sample lands on the row of its own time; cells a curve has no sample
/// for stay `NaN`.
fn assemble<F>(curves: &[SegmentedCurve], pick: F) -> Result<SignalMatrix>
where
    F: Fn(&SegmentedCurve) -> (&Phase, f64),
{
    let n_cols = curves.len();
    let relative: Vec<Vec<f64>> = curves
        .iter()
        .map(|c| {
            let (phase, t0) = pick(c);
            phase.time.iter().map(|t| t - t0).collect()
        })
        .collect();
    let time = merge_time_axes(relative.iter().map(Vec::as_slice));
    if time.is_empty() {
        return Ok(SignalMatrix::empty(n_cols));
    }

    let mut values = nalgebra::DMatrix::from_element(time.len(), n_cols, f64::NAN);
    for (col, (curve, times)) in curves.iter().zip(&relative).enumerate() {
        place_on_axis(&mut values, &time, col, times, &pick(curve).0.response)?;
    }
    Ok(SignalMatrix { time, values })
}

/// Relative spacing below which two sample times share a row.
const TIME_TOLERANCE: f64 = 1e-9;

fn same_time(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIME_TOLERANCE * a.abs().max(b.abs()).max(1.0)
}

/// Sorted union of several time axes; near-equal times collapse into one entry.
pub(crate) fn merge_time_axes<'a, I>(axes: I) -> Vec<f64>
where
    I: IntoIterator<Item = &'a [f64]>,
{
    let mut merged: Vec<f64> = axes
        .into_iter()
        .flat_map(|axis| axis.iter().copied())
        .filter(|t| t.is_finite())
        .collect();
    merged.sort_by(f64::total_cmp);
    merged.dedup_by(|later, kept| same_time(*kept, *later));
    merged
}

fn row_at(axis: &[f64], t: f64) -> Option<usize> {
    let idx = axis.partition_point(|&x| x < t);
    [idx.checked_sub(1), Some(idx)]
        .into_iter()
        .flatten()
        .find(|&i| i < axis.len() && same_time(axis[i], t))
}

/// Write one curve's samples into column `col` at the rows matching their times.
///
/// Missing (`NaN`) samples are skipped; two samples on the same row are an error.
pub(crate) fn place_on_axis(
    values: &mut nalgebra::DMatrix<f64>,
    axis: &[f64],
    col: usize,
    times: &[f64],
    response: &[f64],
) -> Result<()> {
    for (&t, &v) in times.iter().zip(response) {
        if v.is_nan() {
            continue;
        }
        let row = row_at(axis, t)
            .ok_or_else(|| KineticsError::value(format!("Sample time {t} is not on the merged time axis.")))?;
        if !values[(row, col)].is_nan() {
            return Err(KineticsError::value(format!(
                "Two samples of curve {col} fall on the same time ({t})."
            )));
        }
        values[(row, col)] = v;
    }
    Ok(())
}

fn apply_blank_policy(dataset: &mut SegmentedDataset, blank: Option<usize>, policy: &BlankPolicy) {
    if policy.expansion != 1.0 {
        for phase in [
            &mut dataset.baseline,
            &mut dataset.association,
            &mut dataset.dissociation,
        ] {
            phase.values *= policy.expansion;
        }
    }

    let Some(col) = blank else {
        if policy.zero_signal || policy.drop_column {
            warn!("no zero-concentration curve found; blank policy not applied");
        }
        return;
    };

    if policy.zero_signal {
        for phase in [
            &mut dataset.baseline,
            &mut dataset.association,
            &mut dataset.dissociation,
        ] {
            for v in phase.values.column_mut(col).iter_mut() {
                if !v.is_nan() {
                    *v = 0.0;
                }
            }
        }
    }

    if policy.drop_column {
        dataset.baseline.remove_column(col);
        dataset.association.remove_column(col);
        dataset.dissociation.remove_column(col);
        dataset.concentrations.remove(col);
        if let TimeBreak::PerCurve(ts) = &mut dataset.time_break {
            ts.remove(col);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_sample(concentration: f64, n: usize, assoc: usize, dissoc: usize) -> RawSample {
        RawSample {
            concentration,
            time: (0..n).map(|i| i as f64).collect(),
            response: (0..n).map(|i| i as f64 * 0.5).collect(),
            markers: PhaseMarkers::Indices {
                association_start: assoc,
                dissociation_start: dissoc,
            },
        }
    }

    #[test]
    fn split_preserves_total_length_for_every_format() {
        let indexed = ramp_sample(1e-9, 40, 10, 25);
        for format in [DeviceFormat::SingleCurveExport, DeviceFormat::StructuredJson] {
            let curve = format.split(&indexed).unwrap();
            assert_eq!(curve.total_len(), 40);
            assert_eq!(curve.association.len(), 15);
        }

        let mut timed = ramp_sample(1e-9, 40, 0, 0);
        timed.markers = PhaseMarkers::Times {
            association_start: 9.5,
            dissociation_start: 30.0,
        };
        let curve = DeviceFormat::ZippedExport.split(&timed).unwrap();
        assert_eq!(curve.total_len(), 40);
        assert_eq!(curve.baseline.len(), 10);
        assert_eq!(curve.association.len(), 20);
        assert_eq!(curve.dissociation.len(), 10);
    }

    #[test]
    fn marker_kind_must_match_format() {
        let sample = ramp_sample(1e-9, 20, 5, 10);
        let err = DeviceFormat::ZippedExport.split(&sample).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn truncation_drops_artifacts_and_caps_dissociation() {
        let sample = ramp_sample(1e-9, 100, 10, 30);
        let mut curve = DeviceFormat::SingleCurveExport.split(&sample).unwrap();
        assert!(curve.truncate_injection_artifacts());
        assert_eq!(curve.association.len(), 15);
        assert_eq!(curve.association.time[0], 15.0);
        assert_eq!(curve.dissociation.len(), 30);
    }

    #[test]
    fn short_association_skips_truncation() {
        let sample = ramp_sample(1e-9, 20, 5, 9);
        let mut curve = DeviceFormat::SingleCurveExport.split(&sample).unwrap();
        assert!(!curve.truncate_injection_artifacts());
        assert_eq!(curve.association.len(), 4);
        assert_eq!(curve.dissociation.len(), 8);
    }

    #[test]
    fn segment_builds_matrices_and_shared_break() {
        let samples = vec![ramp_sample(0.0, 60, 10, 30), ramp_sample(1e-8, 60, 10, 30)];
        let mut config = SegmentConfig::new(DeviceFormat::StructuredJson);
        config.blank.zero_signal = true;
        let ds = segment(&samples, &config).unwrap();
        assert_eq!(ds.association.cols(), 2);
        assert_eq!(ds.association.rows(), 20);
        assert_eq!(ds.dissociation.time[0], 20.0);
        assert_eq!(ds.time_break, TimeBreak::Shared(20.0));
        assert!(ds.association.values.column(0).iter().all(|v| *v == 0.0));
        assert!(ds.association.values[(0, 1)] > 0.0);
    }

    #[test]
    fn blank_column_can_be_dropped() {
        let samples = vec![ramp_sample(1e-9, 60, 10, 30), ramp_sample(0.0, 60, 10, 30)];
        let mut config = SegmentConfig::new(DeviceFormat::StructuredJson);
        config.cycle = CycleKind::SingleCycle;
        config.blank.drop_column = true;
        config.blank.expansion = 2.0;
        let ds = segment(&samples, &config).unwrap();
        assert_eq!(ds.concentrations, vec![1e-9]);
        assert_eq!(ds.association.cols(), 1);
        assert_eq!(ds.time_break, TimeBreak::PerCurve(vec![20.0]));
        assert_eq!(ds.association.values[(0, 0)], 10.0);
    }

    #[test]
    fn two_blanks_fail_before_segmentation() {
        let samples = vec![ramp_sample(0.0, 60, 10, 30), ramp_sample(0.0, 60, 10, 30)];
        let err = segment(&samples, &SegmentConfig::new(DeviceFormat::StructuredJson)).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn ragged_curves_pad_with_missing() {
        let samples = vec![ramp_sample(1e-9, 60, 10, 30), ramp_sample(1e-8, 50, 10, 30)];
        let ds = segment(&samples, &SegmentConfig::new(DeviceFormat::StructuredJson)).unwrap();
        assert_eq!(ds.dissociation.rows(), 30);
        assert_eq!(ds.dissociation.present_in(1), 20);
        assert!(ds.dissociation.values[(25, 1)].is_nan());
    }

    fn first_time_in(m: &SignalMatrix, col: usize) -> Option<f64> {
        m.values
            .column(col)
            .iter()
            .position(|v| !v.is_nan())
            .map(|row| m.time[row])
    }

    fn value_at(m: &SignalMatrix, col: usize, t: f64) -> f64 {
        let row = m.time.iter().position(|&x| x == t).unwrap();
        m.values[(row, col)]
    }

    #[test]
    fn truncated_curves_of_different_lengths_keep_their_own_times() {
        // Association of 20 vs 15 samples: after truncation 15 vs 10, dissociation capped at 30 vs 20.
        let samples = vec![ramp_sample(1e-9, 100, 10, 30), ramp_sample(1e-8, 100, 10, 25)];
        let mut config = SegmentConfig::new(DeviceFormat::SingleCurveExport);
        config.cycle = CycleKind::SingleCycle;
        let ds = segment(&samples, &config).unwrap();

        assert_eq!(ds.time_break, TimeBreak::PerCurve(vec![15.0, 10.0]));
        assert_eq!(ds.association.time, (0..15).map(f64::from).collect::<Vec<_>>());
        assert_eq!(ds.dissociation.time, (10..45).map(f64::from).collect::<Vec<_>>());
        for col in 0..2 {
            assert_eq!(first_time_in(&ds.dissociation, col), Some(ds.time_break.at(col)));
        }
        // Raw response is 0.5 per sample index; dissociation starts at index 30 and 25.
        assert_eq!(value_at(&ds.dissociation, 0, 15.0), 15.0);
        assert_eq!(value_at(&ds.dissociation, 1, 10.0), 12.5);
        assert_eq!(ds.dissociation.present_in(0), 30);
        assert_eq!(ds.dissociation.present_in(1), 20);
        assert!(value_at(&ds.dissociation, 1, 30.0).is_nan());
    }

    #[test]
    fn zipped_markers_at_different_times_line_up_by_time() {
        let timed = |c: f64, assoc: f64, dissoc: f64| {
            let mut s = ramp_sample(c, 40, 0, 0);
            s.markers = PhaseMarkers::Times {
                association_start: assoc,
                dissociation_start: dissoc,
            };
            s
        };
        let samples = vec![timed(1e-9, 9.5, 30.0), timed(1e-8, 5.0, 20.0)];
        let mut config = SegmentConfig::new(DeviceFormat::ZippedExport);
        config.cycle = CycleKind::SingleCycle;
        let ds = segment(&samples, &config).unwrap();

        assert_eq!(ds.time_break, TimeBreak::PerCurve(vec![20.0, 15.0]));
        assert_eq!(ds.association.rows(), 20);
        assert_eq!(ds.association.present_in(1), 15);
        assert_eq!(first_time_in(&ds.dissociation, 0), Some(20.0));
        assert_eq!(first_time_in(&ds.dissociation, 1), Some(15.0));
        assert_eq!(value_at(&ds.dissociation, 0, 20.0), 15.0);
        assert_eq!(value_at(&ds.dissociation, 1, 15.0), 10.0);
        // Baselines of 10 and 5 samples share their leading rows.
        assert_eq!(ds.baseline.rows(), 10);
        assert!(value_at(&ds.baseline, 1, 5.0).is_nan());
    }

    #[test]
    fn merged_axis_collapses_near_equal_times() {
        let a = [0.0, 1.0, 2.0];
        let b = [1.0 + 1e-12, 2.5];
        assert_eq!(merge_time_axes([&a[..], &b[..]]), vec![0.0, 1.0, 2.0, 2.5]);
    }
}
