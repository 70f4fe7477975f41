//! Wave-U-Net model components.
//!
//! ## Components
//!
//! - [`conv`] — valid (unpadded) 1-D convolution / transposed convolution layer
//! - [`resample`] — fixed windowed-sinc up/down-sampler
//! - [`crop`] — centre-crop helper used to align skip connections
//! - [`blocks`] — downsampling and upsampling blocks
//! - [`body`] — one full encoder/bottleneck/decoder stack
//! - [`size`] — exact input/output size solver
//! - [`waveunet`] — source-separation model (one body per source or shared)
//! - [`lyrics`] — classification variant producing per-frame log-probabilities
//!
//! ## Shape bookkeeping
//!
//! No layer pads its input, so every layer shrinks (or, when upsampling,
//! stretches) the time axis by a fixed rule. Each layer exposes that rule and
//! its inverse through [`LengthTransform`]; the size solver chains them to find
//! the exact input length that yields a requested output length.

pub mod blocks;
pub mod body;
pub mod conv;
pub mod crop;
pub mod lyrics;
pub mod resample;
pub mod size;
pub mod waveunet;

use crate::Result;

/// Pure length arithmetic of a layer or block along the time axis.
pub trait LengthTransform {
    /// Output length for an input of `input_length` frames.
    ///
    /// Fails with [`Error::InvalidLength`](crate::Error::InvalidLength) when no
    /// valid output exists (too short, or not aligned to the stride).
    fn output_length(&self, input_length: usize) -> Result<usize>;

    /// Input length that produces exactly `output_length` frames.
    fn input_length(&self, output_length: usize) -> Result<usize>;
}
