//! Concentration units: label parsing and conversion to molar.

pub mod converter;

pub use converter::*;
