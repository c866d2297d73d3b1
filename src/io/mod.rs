//! Input/output helpers.
//!
//! - wide CSV response tables (`table`)
//! - structured per-sample JSON records (`records`)
//! - result JSON and predicted-curve CSV exports (`export`)

pub mod export;
pub mod records;
pub mod table;

pub use export::*;
pub use records::*;
pub use table::*;
