//! Reporting: fit statistics, residual summaries and terminal output.

pub mod format;
pub mod residuals;
pub mod stats;

pub use format::*;
pub use residuals::*;
pub use stats::*;
