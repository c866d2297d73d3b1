//! Synthetic 1:1 sensorgrams with seeded Gaussian noise.
//!
//! Two shapes are produced:
//!
//! - a fit-ready `ResponseMatrix` (time zero at association start)
//! - raw per-sample records with a baseline and an instrument offset, for
//!   exercising segmentation and alignment end to end

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;
use tracing::debug;

use crate::domain::{ResponseMatrix, TimeBreak};
use crate::error::{KineticsError, Result};
use crate::models::{KineticParams, evaluate};
use crate::signal::{PhaseMarkers, RawSample};

/// What to simulate.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorgramSpec {
    /// Molar concentrations, one curve each.
    pub concentrations: Vec<f64>,
    pub params: KineticParams,
    /// Seconds from association start to dissociation start.
    pub time_break: f64,
    /// Seconds from association start to the last sample.
    pub duration: f64,
    /// Sampling interval in seconds.
    pub dt: f64,
    /// Standard deviation of the additive noise (response units).
    pub noise_sd: f64,
    pub seed: u64,
}

/// Baseline and offset applied to raw records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawLayout {
    /// Seconds of baseline before injection.
    pub baseline_duration: f64,
    /// Constant instrument offset added to every reading of curve `i` (times `i + 1`).
    pub offset: f64,
}

impl Default for RawLayout {
    fn default() -> Self {
        Self {
            baseline_duration: 30.0,
            offset: 5.0,
        }
    }
}

impl SensorgramSpec {
    fn validate(&self) -> Result<()> {
        if self.concentrations.is_empty() {
            return Err(KineticsError::config("At least one concentration is required."));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(KineticsError::config("Sampling interval must be > 0."));
        }
        if !(self.time_break.is_finite() && self.time_break > 0.0 && self.duration > self.time_break) {
            return Err(KineticsError::config(format!(
                "Need 0 < time_break < duration (got time_break={}, duration={}).",
                self.time_break, self.duration
            )));
        }
        if !(self.noise_sd.is_finite() && self.noise_sd >= 0.0) {
            return Err(KineticsError::config("Noise standard deviation must be >= 0."));
        }
        Ok(())
    }

    fn time_axis(&self) -> Vec<f64> {
        let n = (self.duration / self.dt).round() as usize;
        (0..=n).map(|i| i as f64 * self.dt).collect()
    }
}

/// Generate a fit-ready response matrix.
pub fn synthesize(spec: &SensorgramSpec) -> Result<ResponseMatrix> {
    spec.validate()?;
    let mut noise = NoiseSource::new(spec.noise_sd, spec.seed)?;
    let time = spec.time_axis();

    let mut values = nalgebra::DMatrix::zeros(time.len(), spec.concentrations.len());
    for (col, &c) in spec.concentrations.iter().enumerate() {
        let curve = evaluate(c, &time, &spec.params, spec.time_break, 0.0);
        for (row, v) in curve.into_iter().enumerate() {
            values[(row, col)] = v + noise.draw();
        }
    }
    debug!(
        curves = spec.concentrations.len(),
        samples = time.len(),
        noise_sd = spec.noise_sd,
        "synthesized response matrix"
    );
    ResponseMatrix::new(time, spec.concentrations.clone(), values, TimeBreak::Shared(spec.time_break))
}

/// Generate raw records (baseline, association, dissociation) with index markers.
pub fn synthesize_samples(spec: &SensorgramSpec, layout: &RawLayout) -> Result<Vec<RawSample>> {
    spec.validate()?;
    if !(layout.baseline_duration.is_finite() && layout.baseline_duration >= spec.dt) {
        return Err(KineticsError::config("Baseline must cover at least one sample."));
    }
    let mut noise = NoiseSource::new(spec.noise_sd, spec.seed)?;

    let n_base = (layout.baseline_duration / spec.dt).round() as usize;
    let relative = spec.time_axis();
    let dissociation_start = n_base
        + relative
            .iter()
            .position(|&t| t >= spec.time_break)
            .unwrap_or(relative.len());
    let time: Vec<f64> = (0..n_base + relative.len()).map(|i| i as f64 * spec.dt).collect();

    let mut samples = Vec::with_capacity(spec.concentrations.len());
    for (i, &c) in spec.concentrations.iter().enumerate() {
        let offset = layout.offset * (i + 1) as f64;
        let model = evaluate(c, &relative, &spec.params, spec.time_break, 0.0);
        let response = std::iter::repeat_n(0.0, n_base)
            .chain(model)
            .map(|v| v + offset + noise.draw())
            .collect();
        samples.push(RawSample {
            concentration: c,
            time: time.clone(),
            response,
            markers: PhaseMarkers::Indices {
                association_start: n_base,
                dissociation_start,
            },
        });
    }
    Ok(samples)
}

/// Zero-mean Gaussian noise; silent when the standard deviation is zero.
struct NoiseSource {
    rng: StdRng,
    normal: Option<Normal<f64>>,
}

impl NoiseSource {
    fn new(sd: f64, seed: u64) -> Result<Self> {
        let normal = if sd > 0.0 {
            Some(Normal::new(0.0, sd).map_err(|e| KineticsError::config(format!("Noise distribution error: {e}")))?)
        } else {
            None
        };
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            normal,
        })
    }

    fn draw(&mut self) -> f64 {
        match &self.normal {
            Some(n) => n.sample(&mut self.rng),
            None => 0.0,
        }
    }
}
