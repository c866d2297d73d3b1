//! 1:1 Langmuir binding model.
//!
//! Evaluation is a pure function of concentration, time and parameters so the
//! driver, the simulator and the exporters share one implementation.

pub mod kinetics;

pub use kinetics::*;
