//! Concentration unit conversion to molar.
//!
//! Instruments and users label concentrations in many ways (`"100 nM"`,
//! `"2.5e-3 mg/ml"`, `"1e9 vp/ml"`). We parse the leading numeric token of each
//! label and apply a fixed factor for the selected unit:
//!
//! | unit | factor |
//! | - | - |
//! | `M` | 1 |
//! | `mg/ml` | ÷ mass |
//! | `µg/ml`, `ug/ml` | ÷ 1e3 ÷ mass |
//! | `ng/ml` | ÷ 1e6 ÷ mass |
//! | `pg/ml` | ÷ 1e9 ÷ mass |
//! | `mM` | ÷ 1e3 |
//! | `µM`, `uM` | ÷ 1e6 |
//! | `nM` | ÷ 1e9 |
//! | `particles/ml`, `vp/ml` | ÷ 6.02e20 |

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{KineticsError, Result};

/// Avogadro's number scaled from per-ml to per-litre (6.02e23 / 1e3).
const PARTICLES_PER_ML_TO_MOLAR: f64 = 6.02e20;

/// Mass used when the caller passes a zero reference mass.
pub const FALLBACK_REFERENCE_MASS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
pub enum ConcentrationUnit {
    #[serde(rename = "M")]
    #[value(name = "M")]
    Molar,
    #[serde(rename = "mg/ml")]
    #[value(name = "mg/ml")]
    MgPerMl,
    #[serde(rename = "ug/ml", alias = "µg/ml")]
    #[value(name = "ug/ml", alias = "µg/ml")]
    UgPerMl,
    #[serde(rename = "ng/ml")]
    #[value(name = "ng/ml")]
    NgPerMl,
    #[serde(rename = "pg/ml")]
    #[value(name = "pg/ml")]
    PgPerMl,
    #[serde(rename = "mM")]
    #[value(name = "mM")]
    MilliMolar,
    #[serde(rename = "uM", alias = "µM")]
    #[value(name = "uM", alias = "µM")]
    MicroMolar,
    #[serde(rename = "nM")]
    #[value(name = "nM")]
    NanoMolar,
    #[serde(rename = "particles/ml", alias = "vp/ml")]
    #[value(name = "particles/ml", alias = "vp/ml")]
    ParticlesPerMl,
}

impl ConcentrationUnit {
    pub fn label(self) -> &'static str {
        match self {
            ConcentrationUnit::Molar => "M",
            ConcentrationUnit::MgPerMl => "mg/ml",
            ConcentrationUnit::UgPerMl => "ug/ml",
            ConcentrationUnit::NgPerMl => "ng/ml",
            ConcentrationUnit::PgPerMl => "pg/ml",
            ConcentrationUnit::MilliMolar => "mM",
            ConcentrationUnit::MicroMolar => "uM",
            ConcentrationUnit::NanoMolar => "nM",
            ConcentrationUnit::ParticlesPerMl => "particles/ml",
        }
    }

    /// Whether the factor depends on the reference mass.
    pub fn is_mass_based(self) -> bool {
        matches!(
            self,
            ConcentrationUnit::MgPerMl
                | ConcentrationUnit::UgPerMl
                | ConcentrationUnit::NgPerMl
                | ConcentrationUnit::PgPerMl
        )
    }

    /// Divisor `d` such that `molar = value / d`.
    fn divisor(self, mass: f64) -> f64 {
        match self {
            ConcentrationUnit::Molar => 1.0,
            ConcentrationUnit::MgPerMl => mass,
            ConcentrationUnit::UgPerMl => 1e3 * mass,
            ConcentrationUnit::NgPerMl => 1e6 * mass,
            ConcentrationUnit::PgPerMl => 1e9 * mass,
            ConcentrationUnit::MilliMolar => 1e3,
            ConcentrationUnit::MicroMolar => 1e6,
            ConcentrationUnit::NanoMolar => 1e9,
            ConcentrationUnit::ParticlesPerMl => PARTICLES_PER_ML_TO_MOLAR,
        }
    }
}

impl FromStr for ConcentrationUnit {
    type Err = KineticsError;

    fn from_str(s: &str) -> Result<Self> {
        let unit = match s.trim() {
            "M" => ConcentrationUnit::Molar,
            "mg/ml" => ConcentrationUnit::MgPerMl,
            "µg/ml" | "ug/ml" => ConcentrationUnit::UgPerMl,
            "ng/ml" => ConcentrationUnit::NgPerMl,
            "pg/ml" => ConcentrationUnit::PgPerMl,
            "mM" => ConcentrationUnit::MilliMolar,
            "µM" | "uM" => ConcentrationUnit::MicroMolar,
            "nM" => ConcentrationUnit::NanoMolar,
            "particles/ml" | "vp/ml" => ConcentrationUnit::ParticlesPerMl,
            other => {
                return Err(KineticsError::config(format!(
                    "Unsupported concentration unit '{other}'."
                )));
            }
        };
        Ok(unit)
    }
}

impl fmt::Display for ConcentrationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Converted concentrations plus the labels that could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Conversion {
    pub molar: Vec<f64>,
    /// Input positions that were kept (parallel to `molar`).
    pub kept: Vec<usize>,
    pub dropped: Vec<String>,
}

/// Convert concentration labels to molar.
///
/// Labels without a leading number are dropped (with a warning). A
/// `reference_mass` of exactly zero is replaced by
/// [`FALLBACK_REFERENCE_MASS`] and logged; this keeps existing batch analyses
/// reproducible, but it silently changes the meaning of mass-based units.
pub fn convert<S: AsRef<str>>(
    values: &[S],
    unit: ConcentrationUnit,
    reference_mass: f64,
) -> Result<Conversion> {
    let mass = effective_mass(unit, reference_mass)?;
    let divisor = unit.divisor(mass);

    let mut molar = Vec::with_capacity(values.len());
    let mut kept = Vec::with_capacity(values.len());
    let mut dropped = Vec::new();
    for (idx, raw) in values.iter().enumerate() {
        match leading_number(raw.as_ref()) {
            Some(v) => {
                molar.push(v / divisor);
                kept.push(idx);
            }
            None => dropped.push(raw.as_ref().to_string()),
        }
    }

    if !dropped.is_empty() {
        warn!(
            dropped = dropped.len(),
            labels = ?dropped,
            "dropped concentration labels without a leading number"
        );
    }

    Ok(Conversion {
        molar,
        kept,
        dropped,
    })
}

/// Convenience form of [`convert`] taking the unit as a string.
pub fn convert_labels<S: AsRef<str>>(values: &[S], unit: &str, reference_mass: f64) -> Result<Conversion> {
    convert(values, unit.parse()?, reference_mass)
}

/// Inverse of the unit factor: express a molar value in `unit`.
pub fn from_molar(molar: f64, unit: ConcentrationUnit, reference_mass: f64) -> Result<f64> {
    let mass = effective_mass(unit, reference_mass)?;
    Ok(molar * unit.divisor(mass))
}

fn effective_mass(unit: ConcentrationUnit, reference_mass: f64) -> Result<f64> {
    if reference_mass == 0.0 {
        if unit.is_mass_based() {
            warn!(
                unit = unit.label(),
                fallback = FALLBACK_REFERENCE_MASS,
                "reference mass is 0; substituting the fallback mass"
            );
        }
        return Ok(FALLBACK_REFERENCE_MASS);
    }
    if !reference_mass.is_finite() || reference_mass < 0.0 {
        return Err(KineticsError::config(format!(
            "Reference mass must be finite and > 0 (got {reference_mass})."
        )));
    }
    Ok(reference_mass)
}

/// Parse the leading numeric token of a label (`"1.5e-9 M"` → `1.5e-9`).
pub fn leading_number(label: &str) -> Option<f64> {
    let s = label.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;

    if end < bytes.len() && (bytes[end] == b'+' || bytes[end] == b'-') {
        end += 1;
    }
    let int_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let mut digits = end - int_start;
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        let frac_start = end;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        digits += end - frac_start;
    }
    if digits == 0 {
        return None;
    }

    // Exponent only counts when it is complete ("1e" keeps just "1").
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp_end = end + 1;
        if exp_end < bytes.len() && (bytes[exp_end] == b'+' || bytes[exp_end] == b'-') {
            exp_end += 1;
        }
        let exp_digits_start = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits_start {
            end = exp_end;
        }
    }

    s[..end].parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_UNITS: [ConcentrationUnit; 9] = [
        ConcentrationUnit::Molar,
        ConcentrationUnit::MgPerMl,
        ConcentrationUnit::UgPerMl,
        ConcentrationUnit::NgPerMl,
        ConcentrationUnit::PgPerMl,
        ConcentrationUnit::MilliMolar,
        ConcentrationUnit::MicroMolar,
        ConcentrationUnit::NanoMolar,
        ConcentrationUnit::ParticlesPerMl,
    ];

    #[test]
    fn leading_number_handles_scientific_and_suffixes() {
        assert_eq!(leading_number("100 nM"), Some(100.0));
        assert_eq!(leading_number("  1.5e-9M"), Some(1.5e-9));
        assert_eq!(leading_number("-2.5E+3 ug/ml"), Some(-2500.0));
        assert_eq!(leading_number(".5"), Some(0.5));
        assert_eq!(leading_number("3e"), Some(3.0));
        assert_eq!(leading_number("blank"), None);
        assert_eq!(leading_number(""), None);
        assert_eq!(leading_number("-"), None);
    }

    #[test]
    fn every_unit_round_trips_through_molar() {
        let mass = 150_000.0;
        for unit in ALL_UNITS {
            let label = "123.456";
            let conv = convert(&[label], unit, mass).unwrap();
            let back = from_molar(conv.molar[0], unit, mass).unwrap();
            assert!(
                ((back - 123.456) / 123.456).abs() < 1e-12,
                "{unit}: got {back}"
            );
        }
    }

    #[test]
    fn documented_factors() {
        let c = convert(&["10 nM", "2 uM", "1e9"], ConcentrationUnit::NanoMolar, 1.0).unwrap();
        assert!((c.molar[0] - 1e-8).abs() < 1e-20);
        let c = convert(&["6.02e20"], ConcentrationUnit::ParticlesPerMl, 1.0).unwrap();
        assert!((c.molar[0] - 1.0).abs() < 1e-12);
        let c = convert(&["5"], ConcentrationUnit::UgPerMl, 50.0).unwrap();
        assert!((c.molar[0] - 1e-4).abs() < 1e-16);
    }

    #[test]
    fn unparseable_labels_are_dropped() {
        let c = convert(&["1 nM", "n/a", "3 nM"], ConcentrationUnit::NanoMolar, 1.0).unwrap();
        assert_eq!(c.molar.len(), 2);
        assert_eq!(c.kept, vec![0, 2]);
        assert_eq!(c.dropped, vec!["n/a".to_string()]);
    }

    #[test]
    fn zero_mass_falls_back_to_one() {
        let a = convert(&["2"], ConcentrationUnit::MgPerMl, 0.0).unwrap();
        let b = convert(&["2"], ConcentrationUnit::MgPerMl, 1.0).unwrap();
        assert_eq!(a.molar, b.molar);
    }

    #[test]
    fn unsupported_unit_is_a_configuration_error() {
        let err = convert_labels(&["1"], "furlongs", 1.0).unwrap_err();
        assert!(err.is_configuration());
        assert_eq!("µM".parse::<ConcentrationUnit>().unwrap(), ConcentrationUnit::MicroMolar);
        assert_eq!("vp/ml".parse::<ConcentrationUnit>().unwrap(), ConcentrationUnit::ParticlesPerMl);
    }
}
