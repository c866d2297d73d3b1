//! `spr-kinetics` library crate.
//!
//! Fits 1:1 binding kinetics (Rmax, kon, koff, KD) to surface plasmon
//! resonance sensorgrams. The binary (`spr`) is a thin wrapper around this
//! library so that:
//!
//! - core logic is testable without spawning processes
//! - the signal pipeline and fitting driver are reusable on their own

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
pub mod signal;
pub mod units;
