//! Fixed-filter resampling with a windowed-sinc low-pass.
//!
//! Decimation low-passes at `0.5 / stride` and keeps every `stride`-th
//! sample; upsampling inserts `stride - 1` zeros between samples (transposed
//! conv) and low-passes with the same filter. Inputs are reflect-padded by
//! half the filter width, so only the stride changes the length:
//!
//! ```text
//! down:  n → (n - 1) / s + 1      (n - 1 must be a multiple of s)
//! up:    n → (n - 1) * s + 1
//! ```

use std::f64::consts::PI;

use candle_core::{D, DType, Device, Module, Tensor};

use crate::model::LengthTransform;
use crate::{Error, Result};

/// Blackman-windowed sinc low-pass filter with unit DC gain.
///
/// `cutoff` is relative to the sample rate (0.5 = Nyquist).
pub fn sinc_lowpass(kernel_size: usize, cutoff: f64) -> Vec<f32> {
    let m = (kernel_size - 1) as f64;
    let center = (kernel_size / 2) as f64;
    let taps: Vec<f64> = (0..kernel_size)
        .map(|i| {
            let t = i as f64 - center;
            let sinc = if t == 0.0 {
                2.0 * PI * cutoff
            } else {
                (2.0 * PI * cutoff * t).sin() / t
            };
            let phase = i as f64 / m;
            let window = 0.42 - 0.5 * (2.0 * PI * phase).cos() + 0.08 * (4.0 * PI * phase).cos();
            sinc * window
        })
        .collect();
    let sum: f64 = taps.iter().sum();
    taps.iter().map(|&t| (t / sum) as f32).collect()
}

/// Indices that reflect-pad a sequence of `len` samples by `pad` on each side.
///
/// Reflection is periodic, so `pad` may exceed `len - 1`.
fn reflect_indices(len: usize, pad: usize) -> Vec<u32> {
    if len == 1 {
        return vec![0; 1 + 2 * pad];
    }
    let period = 2 * (len as i64 - 1);
    (-(pad as i64)..(len + pad) as i64)
        .map(|i| {
            let r = i.rem_euclid(period);
            let r = if r >= len as i64 { period - r } else { r };
            r as u32
        })
        .collect()
}

/// Reflect-pad the last axis of a `[B, C, T]` tensor.
pub fn reflect_pad(xs: &Tensor, pad: usize) -> candle_core::Result<Tensor> {
    if pad == 0 {
        return Ok(xs.clone());
    }
    let len = xs.dim(D::Minus1)?;
    let indices = reflect_indices(len, pad);
    let indices = Tensor::from_vec(indices, len + 2 * pad, xs.device())?;
    xs.index_select(&indices, 2)
}

/// Depthwise fixed-filter resampler over `channels` channels.
#[derive(Debug, Clone)]
pub struct Resample1d {
    /// `[channels, 1, kernel_size]`, shared by conv and transposed conv.
    filter: Tensor,
    channels: usize,
    kernel_size: usize,
    stride: usize,
    transpose: bool,
}

impl Resample1d {
    pub fn new(
        channels: usize,
        kernel_size: usize,
        stride: usize,
        transpose: bool,
        device: &Device,
        dtype: DType,
    ) -> Result<Self> {
        if kernel_size < 3 || kernel_size % 2 == 0 {
            return Err(Error::Config(format!(
                "resampling filter size must be odd and greater than 2, got {kernel_size}"
            )));
        }
        if stride < 2 {
            return Err(Error::Config(format!(
                "resampling stride must be greater than 1, got {stride}"
            )));
        }
        let taps = sinc_lowpass(kernel_size, 0.5 / stride as f64);
        let taps: Vec<f32> = std::iter::repeat_n(taps, channels).flatten().collect();
        let filter = Tensor::from_vec(taps, (channels, 1, kernel_size), device)?.to_dtype(dtype)?;
        Ok(Self {
            filter,
            channels,
            kernel_size,
            stride,
            transpose,
        })
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_transposed(&self) -> bool {
        self.transpose
    }

    fn pad(&self) -> usize {
        (self.kernel_size - 1) / 2
    }

    fn invalid(&self, length: usize) -> Error {
        Error::InvalidLength {
            length,
            layer: if self.transpose {
                "upsampler"
            } else {
                "downsampler"
            },
        }
    }
}

impl Module for Resample1d {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let input_len = xs.dim(D::Minus1)?;
        let padded = reflect_pad(xs, self.pad())?;
        if self.transpose {
            let out =
                padded.conv_transpose1d(&self.filter, 0, 0, self.stride, 1, self.channels)?;
            // Padding stretched into 2 * pad * (stride + 1) extra frames, split evenly.
            let expected = (input_len - 1) * self.stride + 1;
            let extra = out.dim(D::Minus1)? - expected;
            out.narrow(D::Minus1, extra / 2, expected)
        } else {
            padded.conv1d(&self.filter, 0, self.stride, 1, self.channels)
        }
    }
}

impl LengthTransform for Resample1d {
    fn output_length(&self, input_length: usize) -> Result<usize> {
        if input_length < 2 {
            return Err(self.invalid(input_length));
        }
        if self.transpose {
            Ok((input_length - 1) * self.stride + 1)
        } else {
            // Keep the first and the last sample.
            if (input_length - 1) % self.stride != 0 {
                return Err(self.invalid(input_length));
            }
            Ok((input_length - 1) / self.stride + 1)
        }
    }

    fn input_length(&self, output_length: usize) -> Result<usize> {
        if output_length == 0 {
            return Err(self.invalid(output_length));
        }
        if self.transpose {
            if (output_length - 1) % self.stride != 0 {
                return Err(self.invalid(output_length));
            }
            Ok((output_length - 1) / self.stride + 1)
        } else {
            Ok((output_length - 1) * self.stride + 1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sinc_filter_unit_gain_and_symmetric() {
        let taps = sinc_lowpass(15, 0.25);
        assert_eq!(taps.len(), 15);
        let sum: f32 = taps.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5, "sum = {sum}");
        for i in 0..15 {
            assert!((taps[i] - taps[14 - i]).abs() < 1e-6);
        }
        // Centre tap dominates.
        let max = taps.iter().cloned().fold(f32::MIN, f32::max);
        assert_eq!(max, taps[7]);
    }

    #[test]
    fn reflect_indices_short_and_long() {
        assert_eq!(reflect_indices(4, 2), vec![2, 1, 0, 1, 2, 3, 2, 1]);
        // Padding wider than the signal keeps bouncing between the ends.
        assert_eq!(reflect_indices(2, 3), vec![1, 0, 1, 0, 1, 0, 1, 0]);
        assert_eq!(reflect_indices(1, 2), vec![0; 5]);
    }

    #[test]
    fn downsample_length_matches_forward() {
        let device = Device::Cpu;
        let down = Resample1d::new(3, 15, 4, false, &device, DType::F32).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 3, 33), &device).unwrap();
        let y = down.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 3, 9]);
        assert_eq!(down.output_length(33).unwrap(), 9);
        assert_eq!(down.input_length(9).unwrap(), 33);
        assert!(down.output_length(32).is_err());
    }

    #[test]
    fn upsample_length_matches_forward() {
        let device = Device::Cpu;
        let up = Resample1d::new(2, 15, 2, true, &device, DType::F32).unwrap();
        // Shorter than the filter's half-width: reflection wraps.
        let x = Tensor::randn(0f32, 1.0, (1, 2, 4), &device).unwrap();
        let y = up.forward(&x).unwrap();
        assert_eq!(y.dims(), &[1, 2, 7]);
        assert_eq!(up.output_length(4).unwrap(), 7);
        assert_eq!(up.input_length(7).unwrap(), 4);
        assert!(up.input_length(8).is_err());
        assert!(up.output_length(1).is_err());
    }

    #[test]
    fn downsample_preserves_dc() {
        let device = Device::Cpu;
        let down = Resample1d::new(1, 15, 2, false, &device, DType::F32).unwrap();
        let x = Tensor::ones((1, 1, 41), DType::F32, &device).unwrap();
        let y = down.forward(&x).unwrap();
        let values: Vec<f32> = y.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values.len(), 21);
        for v in values {
            assert!((v - 1.0).abs() < 1e-4, "value = {v}");
        }
    }

    #[test]
    fn even_filter_rejected() {
        let device = Device::Cpu;
        assert!(Resample1d::new(1, 14, 2, false, &device, DType::F32).is_err());
        assert!(Resample1d::new(1, 15, 1, false, &device, DType::F32).is_err());
    }
}
