//! Baseline zeroing and phase stitching.
//!
//! For each curve:
//!
//! ```text
//! baseline'    = baseline - baseline[0]
//! assoc_trade  = association[0] - baseline'[last]
//! association' = association - assoc_trade
//! fast: dissociation' = dissociation - assoc_trade
//! slow: dissociation' = dissociation - (dissociation[0] - association'[last])
//! ```
//!
//! "first"/"last" skip missing (`NaN`) samples so ragged columns align on the
//! data they actually have.

use tracing::debug;

use crate::domain::{AlignMode, ResponseMatrix, SignalMatrix, TimeBreak};
use crate::error::{KineticsError, Result};
use crate::signal::segment::{SegmentedDataset, merge_time_axes, place_on_axis};

/// Aligned copies of the three phases of one curve.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedCurve {
    pub baseline: Vec<f64>,
    pub association: Vec<f64>,
    pub dissociation: Vec<f64>,
}

/// Align the three phases of a single curve.
pub fn align(baseline: &[f64], association: &[f64], dissociation: &[f64], mode: AlignMode) -> AlignedCurve {
    let base0 = first_present(baseline).unwrap_or(0.0);
    let baseline: Vec<f64> = baseline.iter().map(|v| v - base0).collect();
    let base_end = last_present(&baseline).unwrap_or(0.0);

    let assoc_trade = first_present(association).map_or(0.0, |a0| a0 - base_end);
    let association: Vec<f64> = association.iter().map(|v| v - assoc_trade).collect();

    let dissoc_trade = match mode {
        AlignMode::Fast => assoc_trade,
        AlignMode::Slow => {
            let anchor = last_present(&association).unwrap_or(base_end);
            first_present(dissociation).map_or(0.0, |d0| d0 - anchor)
        }
    };
    let dissociation: Vec<f64> = dissociation.iter().map(|v| v - dissoc_trade).collect();

    AlignedCurve {
        baseline,
        association,
        dissociation,
    }
}

/// Align with the mode given as text (`"fast"` / `"slow"`).
pub fn align_with(
    baseline: &[f64],
    association: &[f64],
    dissociation: &[f64],
    mode: &str,
) -> Result<AlignedCurve> {
    let mode: AlignMode = mode.parse()?;
    Ok(align(baseline, association, dissociation, mode))
}

/// A segmented dataset after alignment, ready to be stitched for fitting.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedDataset {
    pub concentrations: Vec<f64>,
    pub baseline: SignalMatrix,
    pub association: SignalMatrix,
    pub dissociation: SignalMatrix,
    pub time_break: TimeBreak,
    pub mode: AlignMode,
}

/// Align every column of a segmented dataset.
pub fn align_dataset(dataset: SegmentedDataset, mode: AlignMode) -> Result<AlignedDataset> {
    let n = dataset.concentrations.len();
    for (name, phase) in [
        ("baseline", &dataset.baseline),
        ("association", &dataset.association),
        ("dissociation", &dataset.dissociation),
    ] {
        if phase.cols() != n {
            return Err(KineticsError::config(format!(
                "{name} phase has {} columns, expected {n}.",
                phase.cols()
            )));
        }
    }

    let SegmentedDataset {
        concentrations,
        mut baseline,
        mut association,
        mut dissociation,
        time_break,
    } = dataset;

    for col in 0..n {
        let b: Vec<f64> = baseline.values.column(col).iter().copied().collect();
        let a: Vec<f64> = association.values.column(col).iter().copied().collect();
        let d: Vec<f64> = dissociation.values.column(col).iter().copied().collect();
        let aligned = align(&b, &a, &d, mode);
        write_column(&mut baseline, col, &aligned.baseline);
        write_column(&mut association, col, &aligned.association);
        write_column(&mut dissociation, col, &aligned.dissociation);
    }
    debug!(curves = n, ?mode, "aligned dataset");

    Ok(AlignedDataset {
        concentrations,
        baseline,
        association,
        dissociation,
        time_break,
        mode,
    })
}

fn write_column(matrix: &mut SignalMatrix, col: usize, values: &[f64]) {
    for (dst, src) in matrix.values.column_mut(col).iter_mut().zip(values) {
        *dst = *src;
    }
}

impl AlignedDataset {
    /// Stitch association + dissociation into the response matrix fitted by the driver.
    ///
    /// Time zero is the association start; the baseline is not part of the fit.
    /// Both phases are placed on the union of their time axes so every column
    /// keeps its own break, even when curves differ in length.
    pub fn into_response(self) -> Result<ResponseMatrix> {
        let n = self.concentrations.len();
        let time = merge_time_axes([self.association.time.as_slice(), self.dissociation.time.as_slice()]);

        let mut values = nalgebra::DMatrix::from_element(time.len(), n, f64::NAN);
        for phase in [&self.association, &self.dissociation] {
            for col in 0..n {
                let column: Vec<f64> = phase.values.column(col).iter().copied().collect();
                place_on_axis(&mut values, &time, col, &phase.time, &column)?;
            }
        }

        ResponseMatrix::new(time, self.concentrations, values, self.time_break)
    }
}

fn first_present(values: &[f64]) -> Option<f64> {
    values.iter().copied().find(|v| !v.is_nan())
}

fn last_present(values: &[f64]) -> Option<f64> {
    values.iter().rev().copied().find(|v| !v.is_nan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DeviceFormat;
    use crate::signal::segment::{PhaseMarkers, RawSample, SegmentConfig, segment};

    const B: [f64; 4] = [3.0, 3.2, 2.9, 3.1];
    const A: [f64; 5] = [7.0, 9.0, 11.0, 12.0, 12.5];
    const D: [f64; 4] = [20.0, 19.0, 18.5, 18.0];

    #[test]
    fn baseline_starts_at_zero() {
        let out = align(&B, &A, &D, AlignMode::Fast);
        assert_eq!(out.baseline[0], 0.0);
    }

    #[test]
    fn fast_mode_joins_baseline_and_association() {
        let out = align(&B, &A, &D, AlignMode::Fast);
        let junction = out.association[0] - out.baseline[out.baseline.len() - 1];
        assert!(junction.abs() < 1e-9);
        // Same offset on both phases.
        assert!(((A[0] - out.association[0]) - (D[0] - out.dissociation[0])).abs() < 1e-12);
    }

    #[test]
    fn slow_mode_joins_association_and_dissociation() {
        let out = align(&B, &A, &D, AlignMode::Slow);
        let junction = out.dissociation[0] - out.association[out.association.len() - 1];
        assert!(junction.abs() < 1e-9);
        let junction = out.association[0] - out.baseline[out.baseline.len() - 1];
        assert!(junction.abs() < 1e-9);
    }

    #[test]
    fn empty_baseline_anchors_association_at_zero() {
        let out = align(&[], &A, &D, AlignMode::Slow);
        assert!(out.association[0].abs() < 1e-12);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = align_with(&B, &A, &D, "turbo").unwrap_err();
        assert!(err.to_string().contains("fast"));
    }

    #[test]
    fn dataset_stitches_into_response_matrix() {
        let sample = |c: f64| RawSample {
            concentration: c,
            time: (0..30).map(|i| i as f64).collect(),
            response: (0..30).map(|i| 100.0 + i as f64).collect(),
            markers: PhaseMarkers::Indices {
                association_start: 5,
                dissociation_start: 15,
            },
        };
        let ds = segment(
            &[sample(1e-9), sample(1e-8)],
            &SegmentConfig::new(DeviceFormat::StructuredJson),
        )
        .unwrap();
        let aligned = align_dataset(ds, AlignMode::Slow).unwrap();
        let response = aligned.into_response().unwrap();
        assert_eq!(response.time().len(), 25);
        assert_eq!(response.time()[10], 10.0);
        assert_eq!(response.time_break(), &TimeBreak::Shared(10.0));
        // Baseline ends at 4 after zeroing, so association starts at 4.
        assert!((response.values()[(0, 0)] - 4.0).abs() < 1e-12);
        assert!((response.values()[(10, 1)] - response.values()[(9, 1)]).abs() < 1e-12);
    }

    fn ramp(concentration: f64, n: usize, assoc: usize, dissoc: usize) -> RawSample {
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
    fn uneven_single_cycle_curves_stitch_by_time() {
        let mut config = SegmentConfig::new(DeviceFormat::StructuredJson);
        config.cycle = crate::domain::CycleKind::SingleCycle;

        for second_len in [60, 45] {
            let samples = [ramp(1e-9, 60, 10, 30), ramp(1e-8, second_len, 10, 25)];
            let response = crate::signal::prepare(&samples, &config, AlignMode::Fast).unwrap();
            assert_eq!(response.time_break(), &TimeBreak::PerCurve(vec![20.0, 15.0]));
            assert_eq!(response.time().len(), 50);
            assert_eq!(
                response.values().column(1).iter().filter(|v| !v.is_nan()).count(),
                second_len - 10
            );

            // Zeroed ramps rise 0.5 per second from 4.5 at association start.
            for col in 0..2 {
                for (row, &t) in response.time().iter().enumerate() {
                    let v = response.values()[(row, col)];
                    if !v.is_nan() {
                        assert!((v - (4.5 + 0.5 * t)).abs() < 1e-9, "col {col} t {t}: {v}");
                    }
                }
            }
            let tb = response.time_break().at(1);
            let row = response.time().iter().position(|&t| t == tb).unwrap();
            assert!((response.values()[(row, 1)] - (4.5 + 0.5 * tb)).abs() < 1e-9);
        }
    }
}
