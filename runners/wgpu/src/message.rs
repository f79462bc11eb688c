//! Packing text into kernel lanes and back.
//!
//! The kernel works on `i32` lanes only, so each byte of the message is
//! widened into its own lane before upload and truncated back to a byte after
//! readback. Lanes past the end of the text are zero, and decoding stops at
//! the first zero lane like a C string would.

use crate::error::{Error, Result};

/// Widens each byte of `text` into one lane, zero-padded to `width` lanes.
pub fn pack(text: &str, width: usize) -> Result<Vec<i32>> {
    let bytes = text.as_bytes();
    if bytes.len() > width {
        return Err(Error::MessageTooLong {
            len: bytes.len(),
            width,
        });
    }
    let mut lanes: Vec<i32> = bytes.iter().map(|&b| i32::from(b)).collect();
    lanes.resize(width, 0);
    Ok(lanes)
}

/// Keeps the low byte of each lane up to the first zero lane.
pub fn unpack(lanes: &[i32]) -> String {
    let bytes: Vec<u8> = lanes
        .iter()
        .map(|&lane| lane as u8)
        .take_while(|&b| b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

/// Zero-pads `values` to `width` lanes.
pub fn pad_lanes(values: &[i32], width: usize) -> Result<Vec<i32>> {
    if values.len() > width {
        return Err(Error::Config {
            msg: format!("{} offsets given but the kernel is {width} wide", values.len()),
        });
    }
    let mut lanes = values.to_vec();
    lanes.resize(width, 0);
    Ok(lanes)
}
