//! Valid 1-D convolution layer with normalisation and activation.
//!
//! Plain layers run an unpadded `Conv1d`; transposed layers run a
//! `ConvTranspose1d` padded by `kernel_size - 1`, which is the exact adjoint of
//! an unpadded strided convolution:
//!
//! ```text
//! plain:       n → ((n - k + 1) - 1) / s + 1
//! transposed:  n → (n - 1) * s + 1 - k + 1
//! ```

use candle_core::{Module, Tensor};
use candle_nn::{
    Activation, BatchNorm, BatchNormConfig, Conv1d, Conv1dConfig, ConvTranspose1d,
    ConvTranspose1dConfig, GroupNorm, VarBuilder,
};

use crate::config::{ConvType, NORM_CHANNELS};
use crate::model::LengthTransform;
use crate::{Error, Result};

const LEAKY_RELU_SLOPE: f64 = 0.01;
const GROUP_NORM_EPS: f64 = 1e-5;

#[derive(Debug, Clone)]
enum Filter {
    Plain(Conv1d),
    Transposed(ConvTranspose1d),
}

#[derive(Debug, Clone)]
enum Norm {
    None,
    Group(GroupNorm),
    Batch(BatchNorm),
}

/// Convolution → (norm) → activation, with exact length bookkeeping.
#[derive(Debug, Clone)]
pub struct ConvLayer {
    filter: Filter,
    norm: Norm,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    transpose: bool,
}

impl ConvLayer {
    /// Build a layer, loading `filter.*` (and `norm.*`) from `vb`.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        conv_type: ConvType,
        transpose: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        if kernel_size == 0 || stride == 0 {
            return Err(Error::Config(format!(
                "conv layer needs positive kernel size and stride, got k={kernel_size} s={stride}"
            )));
        }

        let filter = if transpose {
            let cfg = ConvTranspose1dConfig {
                stride,
                padding: kernel_size - 1,
                ..Default::default()
            };
            Filter::Transposed(candle_nn::conv_transpose1d(
                in_channels,
                out_channels,
                kernel_size,
                cfg,
                vb.pp("filter"),
            )?)
        } else {
            let cfg = Conv1dConfig {
                stride,
                ..Default::default()
            };
            Filter::Plain(candle_nn::conv1d(
                in_channels,
                out_channels,
                kernel_size,
                cfg,
                vb.pp("filter"),
            )?)
        };

        let norm = match conv_type {
            ConvType::Normal => Norm::None,
            ConvType::Gn => {
                if out_channels % NORM_CHANNELS != 0 {
                    return Err(Error::Config(format!(
                        "group norm needs output channels divisible by {NORM_CHANNELS}, got {out_channels}"
                    )));
                }
                Norm::Group(candle_nn::group_norm(
                    out_channels / NORM_CHANNELS,
                    out_channels,
                    GROUP_NORM_EPS,
                    vb.pp("norm"),
                )?)
            }
            ConvType::Bn => {
                let cfg = BatchNormConfig {
                    momentum: 0.01,
                    ..Default::default()
                };
                Norm::Batch(candle_nn::batch_norm(out_channels, cfg, vb.pp("norm"))?)
            }
        };

        Ok(Self {
            filter,
            norm,
            in_channels,
            out_channels,
            kernel_size,
            stride,
            transpose,
        })
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn is_transposed(&self) -> bool {
        self.transpose
    }

    fn invalid(&self, length: usize) -> Error {
        Error::InvalidLength {
            length,
            layer: if self.transpose {
                "transposed conv"
            } else {
                "conv"
            },
        }
    }
}

impl Module for ConvLayer {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let ys = match &self.filter {
            Filter::Plain(conv) => xs.apply(conv)?,
            Filter::Transposed(conv) => xs.apply(conv)?,
        };
        match &self.norm {
            Norm::None => ys.apply(&Activation::LeakyRelu(LEAKY_RELU_SLOPE)),
            Norm::Group(norm) => ys.apply(norm)?.relu(),
            // Inference statistics only; training is out of scope.
            Norm::Batch(norm) => ys.apply_t(norm, false)?.relu(),
        }
    }
}

impl LengthTransform for ConvLayer {
    fn output_length(&self, input_length: usize) -> Result<usize> {
        let (k, s) = (self.kernel_size, self.stride);
        if self.transpose {
            if input_length < 2 {
                return Err(self.invalid(input_length));
            }
            let stretched = (input_length - 1) * s + 1;
            if stretched < k {
                return Err(self.invalid(input_length));
            }
            Ok(stretched - k + 1)
        } else {
            if input_length < k {
                return Err(self.invalid(input_length));
            }
            let valid = input_length - k + 1;
            // First and last sample must both land on a stride step.
            if (valid - 1) % s != 0 {
                return Err(self.invalid(input_length));
            }
            Ok((valid - 1) / s + 1)
        }
    }

    fn input_length(&self, output_length: usize) -> Result<usize> {
        if output_length == 0 {
            return Err(self.invalid(output_length));
        }
        let (k, s) = (self.kernel_size, self.stride);
        if self.transpose {
            let stretched = output_length + k - 1;
            if (stretched - 1) % s != 0 {
                return Err(self.invalid(output_length));
            }
            Ok((stretched - 1) / s + 1)
        } else {
            Ok((output_length - 1) * s + 1 + k - 1)
        }
    }
}
