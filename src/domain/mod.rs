//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - configuration enums (`AlignMode`, `DeviceFormat`, `CycleKind`, `Topology`)
//! - signal containers (`SignalMatrix`, `ResponseMatrix`, `TimeBreak`)
//! - fit outputs (`KineticsResult`, `PredictedCurveMatrix`, etc.)

pub mod types;

pub use types::*;
