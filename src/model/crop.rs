//! Centre-crop along the time axis.

use candle_core::{D, Tensor};

use crate::{Error, Result};

/// Crop `x` to the length of `target`, discarding equal amounts at both ends.
///
/// Returns `x` unchanged when it is not longer than `target`, so
/// `crop(a, b)` and `crop(b, a)` always end up with the same length.
pub fn crop(x: &Tensor, target: &Tensor) -> Result<Tensor> {
    let len = x.dim(D::Minus1)?;
    let target_len = target.dim(D::Minus1)?;
    crop_to(x, len.min(target_len))
}

/// Crop `x` to exactly `len` frames (no-op when already that short).
pub fn crop_to(x: &Tensor, len: usize) -> Result<Tensor> {
    let current = x.dim(D::Minus1)?;
    if current <= len {
        return Ok(x.clone());
    }
    let diff = current - len;
    if diff % 2 != 0 {
        return Err(Error::CropParity {
            longer: current,
            shorter: len,
        });
    }
    Ok(x.narrow(D::Minus1, diff / 2, len)?)
}
