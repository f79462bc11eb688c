//! Host-side reference dispatch of the add kernel.
//!
//! Every index is an independent unit of work, so the elements are handed out
//! to rayon's pool as one-element windows. Each unit sees only its own lane,
//! which is the same view a GPU invocation has of the disjoint writes.

use crate::add_offset;
use rayon::prelude::*;
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("accumulator has {accumulator} elements but offsets has {offsets}")]
pub struct LengthMismatch {
    pub accumulator: usize,
    pub offsets: usize,
}

/// Runs one dispatch of the kernel over `accumulator.len()` invocations.
pub fn dispatch(accumulator: &mut [i32], offsets: &[i32]) -> Result<(), LengthMismatch> {
    if accumulator.len() != offsets.len() {
        return Err(LengthMismatch {
            accumulator: accumulator.len(),
            offsets: offsets.len(),
        });
    }
    accumulator
        .par_chunks_mut(1)
        .zip(offsets.par_chunks(1))
        .for_each(|(lane, offset)| add_offset(0, lane, offset));
    Ok(())
}
