//! One complete Wave-U-Net: downsampling path, bottleneck, upsampling path
//! and output projection.
//!
//! ## Channel layout
//!
//! With channel widths `c[0..=L]`:
//!
//! ```text
//! down i:      (i == 0 ? num_inputs : c[i-1]) → c[i]      shortcut: c[i]
//! bottleneck:  c[L-1] → c[L], then c[L] → c[L]
//! up j:        c[L-j] + shortcut c[L-1-j]    → c[L-1-j]
//! output:      1×1 conv c[0] → outputs
//! ```

use candle_core::{D, Module, Tensor};
use candle_nn::{Conv1d, VarBuilder};

use crate::Result;
use crate::config::NetworkConfig;
use crate::model::LengthTransform;
use crate::model::blocks::{BlockParams, DownsamplingBlock, UpsamplingBlock};
use crate::model::conv::ConvLayer;

/// Final nonlinearity applied after the output projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputHead {
    /// Clip to the valid waveform range `[-1, 1]` (source separation).
    Clamp,
    /// Log-probabilities over the channel axis (per-frame classification).
    LogSoftmax,
}

/// Down/bottleneck/up stack with typed, fixed-size block lists.
#[derive(Debug, Clone)]
pub struct NetworkBody {
    downsampling_blocks: Vec<DownsamplingBlock>,
    bottlenecks: Vec<ConvLayer>,
    upsampling_blocks: Vec<UpsamplingBlock>,
    output_conv: Conv1d,
    output_channels: usize,
    head: OutputHead,
}

impl NetworkBody {
    /// Build a body whose projection emits `output_channels` channels.
    ///
    /// `config` must already be validated.
    pub fn new(
        config: &NetworkConfig,
        output_channels: usize,
        head: OutputHead,
        vb: VarBuilder,
    ) -> Result<Self> {
        let channels = &config.channels;
        let levels = config.num_levels();
        let down = BlockParams::down(config);
        let up = BlockParams::up(config);

        let vb_down = vb.pp("downsampling_blocks");
        let downsampling_blocks = (0..levels)
            .map(|i| {
                let in_ch = if i == 0 {
                    config.num_inputs
                } else {
                    channels[i - 1]
                };
                DownsamplingBlock::new(in_ch, channels[i], &down, vb_down.pp(i.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        let vb_bottleneck = vb.pp("bottlenecks");
        let bottlenecks = (0..config.depth)
            .map(|i| {
                let in_ch = if i == 0 {
                    channels[levels - 1]
                } else {
                    channels[levels]
                };
                ConvLayer::new(
                    in_ch,
                    channels[levels],
                    down.kernel_size,
                    1,
                    config.conv_type,
                    false,
                    vb_bottleneck.pp(i.to_string()),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let vb_up = vb.pp("upsampling_blocks");
        let upsampling_blocks = (0..levels)
            .map(|j| {
                let skip = channels[levels - 1 - j];
                let vb = vb_up.pp(j.to_string());
                UpsamplingBlock::new(channels[levels - j], skip, skip, &up, vb)
            })
            .collect::<Result<Vec<_>>>()?;

        let output_conv = candle_nn::conv1d(
            channels[0],
            output_channels,
            1,
            Default::default(),
            vb.pp("output_conv"),
        )?;

        Ok(Self {
            downsampling_blocks,
            bottlenecks,
            upsampling_blocks,
            output_conv,
            output_channels,
            head,
        })
    }

    /// Run the full stack on `[B, num_inputs, T]`.
    ///
    /// Output: `[B, output_channels, T']` with `T' = output_length(T)`.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let mut shortcuts = Vec::with_capacity(self.downsampling_blocks.len());
        let mut out = xs.clone();

        for (i, block) in self.downsampling_blocks.iter().enumerate() {
            let (decimated, shortcut) = block.forward(&out)?;
            tracing::debug!(
                level = i,
                out = ?decimated.dims(),
                shortcut = ?shortcut.dims(),
                "downsampling block"
            );
            shortcuts.push(shortcut);
            out = decimated;
        }

        for conv in &self.bottlenecks {
            out = out.apply(conv)?;
        }
        tracing::debug!(out = ?out.dims(), "bottleneck");

        for (j, block) in self.upsampling_blocks.iter().enumerate() {
            out = block.forward(&out, &shortcuts[shortcuts.len() - 1 - j])?;
            tracing::debug!(level = j, out = ?out.dims(), "upsampling block");
        }

        let out = self.output_conv.forward(&out)?;
        let out = match self.head {
            OutputHead::Clamp => out.clamp(-1f32, 1f32)?,
            OutputHead::LogSoftmax => candle_nn::ops::log_softmax(&out, 1)?,
        };
        tracing::debug!(out = ?out.dims(), "output");
        Ok(out)
    }

    pub fn downsampling_blocks(&self) -> &[DownsamplingBlock] {
        &self.downsampling_blocks
    }

    pub fn bottlenecks(&self) -> &[ConvLayer] {
        &self.bottlenecks
    }

    pub fn upsampling_blocks(&self) -> &[UpsamplingBlock] {
        &self.upsampling_blocks
    }

    pub fn output_channels(&self) -> usize {
        self.output_channels
    }

    pub fn head(&self) -> OutputHead {
        self.head
    }

    /// Length of the decimated signal entering the bottleneck.
    pub fn bottleneck_input_length(&self, input_length: usize) -> Result<usize> {
        let mut size = input_length;
        for block in &self.downsampling_blocks {
            size = block.output_length(size)?;
        }
        Ok(size)
    }
}

impl LengthTransform for NetworkBody {
    fn output_length(&self, input_length: usize) -> Result<usize> {
        let mut size = self.bottleneck_input_length(input_length)?;
        for conv in &self.bottlenecks {
            size = conv.output_length(size)?;
        }
        for block in &self.upsampling_blocks {
            size = block.output_length(size)?;
        }
        Ok(size)
    }

    fn input_length(&self, output_length: usize) -> Result<usize> {
        let mut size = output_length;
        for block in self.upsampling_blocks.iter().rev() {
            size = block.input_length(size)?;
        }
        for conv in self.bottlenecks.iter().rev() {
            size = conv.input_length(size)?;
        }
        for block in self.downsampling_blocks.iter().rev() {
            size = block.input_length(size)?;
        }
        Ok(size)
    }
}

/// Time length of a `[B, C, T]` tensor.
pub(crate) fn frames(xs: &Tensor) -> Result<usize> {
    Ok(xs.dim(D::Minus1)?)
}
