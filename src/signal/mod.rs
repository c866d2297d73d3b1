//! Raw signal → response matrix.
//!
//! - phase segmentation per export family (`segment`)
//! - baseline zeroing and phase stitching (`align`)

pub mod align;
pub mod segment;

pub use align::*;
pub use segment::*;

use crate::domain::{AlignMode, ResponseMatrix};
use crate::error::Result;

/// Segment, align and stitch raw samples into a fit-ready response matrix.
pub fn prepare(samples: &[RawSample], config: &SegmentConfig, mode: AlignMode) -> Result<ResponseMatrix> {
    let segmented = segment(samples, config)?;
    align_dataset(segmented, mode)?.into_response()
}
