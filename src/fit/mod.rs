//! Kinetic parameter estimation.
//!
//! Responsibilities:
//!
//! - validated fitting configuration (`options`)
//! - loss, penalty and constraint terms (`loss`)
//! - projected Levenberg–Marquardt (`optimizer`)
//! - Global / Local / Partial orchestration (`driver`)

pub mod driver;
pub mod loss;
pub mod optimizer;
pub mod options;

pub use driver::*;
pub use loss::*;
pub use optimizer::*;
pub use options::*;
