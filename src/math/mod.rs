//! Mathematical utilities: SVD least squares.

pub mod ols;

pub use ols::*;
