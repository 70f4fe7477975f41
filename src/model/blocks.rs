//! Downsampling and upsampling blocks of the U-Net.
//!
//! ```text
//! DownsamplingBlock:  x ─→ depth × ConvLayer ─┬─→ decimate ─→ out
//!                                             └─→ shortcut
//!
//! UpsamplingBlock:    x ─→ upsample ─┐
//!                                     ├─→ crop + concat ─→ depth × ConvLayer ─→ out
//!                     shortcut ───────┘
//! ```

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;

use crate::config::{ConvType, NetworkConfig, Resampling};
use crate::model::LengthTransform;
use crate::model::conv::ConvLayer;
use crate::model::crop::crop;
use crate::model::resample::Resample1d;
use crate::{Error, Result};

/// Hyper-parameters shared by every block on one path.
#[derive(Debug, Clone, Copy)]
pub struct BlockParams {
    pub kernel_size: usize,
    pub stride: usize,
    pub depth: usize,
    pub conv_type: ConvType,
    pub resampling: Resampling,
    pub resample_filter_size: usize,
}

impl BlockParams {
    /// Parameters of the downsampling path (and bottleneck).
    pub fn down(config: &NetworkConfig) -> Self {
        Self::with_kernel(config, config.kernel_size_down)
    }

    /// Parameters of the upsampling path.
    pub fn up(config: &NetworkConfig) -> Self {
        Self::with_kernel(config, config.kernel_size_up)
    }

    fn with_kernel(config: &NetworkConfig, kernel_size: usize) -> Self {
        Self {
            kernel_size,
            stride: config.stride,
            depth: config.depth,
            conv_type: config.conv_type,
            resampling: config.resampling,
            resample_filter_size: config.resample_filter_size,
        }
    }
}

/// Strided resolution change: fixed sinc filter or learned convolution.
#[derive(Debug, Clone)]
pub enum Resampler {
    Fixed(Resample1d),
    Learned(ConvLayer),
}

impl Resampler {
    fn new(channels: usize, params: &BlockParams, transpose: bool, vb: VarBuilder) -> Result<Self> {
        match params.resampling {
            Resampling::Fixed => Ok(Self::Fixed(Resample1d::new(
                channels,
                params.resample_filter_size,
                params.stride,
                transpose,
                vb.device(),
                vb.dtype(),
            )?)),
            Resampling::Learned => Ok(Self::Learned(ConvLayer::new(
                channels,
                channels,
                params.kernel_size,
                params.stride,
                params.conv_type,
                transpose,
                vb,
            )?)),
        }
    }
}

impl Module for Resampler {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Fixed(resample) => resample.forward(xs),
            Self::Learned(conv) => conv.forward(xs),
        }
    }
}

impl LengthTransform for Resampler {
    fn output_length(&self, input_length: usize) -> Result<usize> {
        match self {
            Self::Fixed(resample) => resample.output_length(input_length),
            Self::Learned(conv) => conv.output_length(input_length),
        }
    }

    fn input_length(&self, output_length: usize) -> Result<usize> {
        match self {
            Self::Fixed(resample) => resample.input_length(output_length),
            Self::Learned(conv) => conv.input_length(output_length),
        }
    }
}

fn conv_stack(
    first_in: usize,
    out: usize,
    params: &BlockParams,
    vb: VarBuilder,
) -> Result<Vec<ConvLayer>> {
    (0..params.depth)
        .map(|i| {
            let in_channels = if i == 0 { first_in } else { out };
            ConvLayer::new(
                in_channels,
                out,
                params.kernel_size,
                1,
                params.conv_type,
                false,
                vb.pp(i.to_string()),
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// DownsamplingBlock
// ---------------------------------------------------------------------------

/// Local convolutions followed by decimation; keeps the full-rate features
/// as the skip connection.
#[derive(Debug, Clone)]
pub struct DownsamplingBlock {
    pre_shortcut_convs: Vec<ConvLayer>,
    downconv: Resampler,
    n_inputs: usize,
    n_outputs: usize,
}

impl DownsamplingBlock {
    pub fn new(
        n_inputs: usize,
        n_outputs: usize,
        params: &BlockParams,
        vb: VarBuilder,
    ) -> Result<Self> {
        let pre_shortcut_convs =
            conv_stack(n_inputs, n_outputs, params, vb.pp("pre_shortcut_convs"))?;
        if params.resampling == Resampling::Learned {
            // Older checkpoints declared this layer as 1 → 29 channels; here it
            // keeps the block width. Needs confirmation before loading them.
            tracing::warn!(
                n_outputs,
                "learned decimation maps {n_outputs} -> {n_outputs} channels; unverified against trained weights"
            );
        }
        let downconv = Resampler::new(n_outputs, params, false, vb.pp("downconv"))?;
        Ok(Self {
            pre_shortcut_convs,
            downconv,
            n_inputs,
            n_outputs,
        })
    }

    /// Returns `(decimated, shortcut)`.
    pub fn forward(&self, xs: &Tensor) -> Result<(Tensor, Tensor)> {
        let mut shortcut = xs.clone();
        for conv in &self.pre_shortcut_convs {
            shortcut = shortcut.apply(conv)?;
        }
        let out = shortcut.apply(&self.downconv)?;
        Ok((out, shortcut))
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    /// Channels of both the decimated output and the shortcut.
    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }
}

impl LengthTransform for DownsamplingBlock {
    fn output_length(&self, input_length: usize) -> Result<usize> {
        let mut size = input_length;
        for conv in &self.pre_shortcut_convs {
            size = conv.output_length(size)?;
        }
        self.downconv.output_length(size)
    }

    fn input_length(&self, output_length: usize) -> Result<usize> {
        let mut size = self.downconv.input_length(output_length)?;
        for conv in self.pre_shortcut_convs.iter().rev() {
            size = conv.input_length(size)?;
        }
        Ok(size)
    }
}

// ---------------------------------------------------------------------------
// UpsamplingBlock
// ---------------------------------------------------------------------------

/// Upsampling followed by fusion with the matching shortcut.
#[derive(Debug, Clone)]
pub struct UpsamplingBlock {
    upconv: Resampler,
    post_shortcut_convs: Vec<ConvLayer>,
    n_inputs: usize,
    n_shortcut: usize,
    n_outputs: usize,
}

impl UpsamplingBlock {
    pub fn new(
        n_inputs: usize,
        n_shortcut: usize,
        n_outputs: usize,
        params: &BlockParams,
        vb: VarBuilder,
    ) -> Result<Self> {
        let upconv = Resampler::new(n_inputs, params, true, vb.pp("upconv"))?;
        let post_shortcut_convs = conv_stack(
            n_inputs + n_shortcut,
            n_outputs,
            params,
            vb.pp("post_shortcut_convs"),
        )?;
        Ok(Self {
            upconv,
            post_shortcut_convs,
            n_inputs,
            n_shortcut,
            n_outputs,
        })
    }

    /// Upsample `xs`, align it with `shortcut` and fuse the two.
    pub fn forward(&self, xs: &Tensor, shortcut: &Tensor) -> Result<Tensor> {
        let (_, shortcut_channels, _) = shortcut.dims3()?;
        if shortcut_channels != self.n_shortcut {
            return Err(Error::Config(format!(
                "upsampling block expects a {}-channel shortcut, got {shortcut_channels}",
                self.n_shortcut
            )));
        }

        let upsampled = xs.apply(&self.upconv)?;
        let shortcut = crop(shortcut, &upsampled)?;
        let upsampled = crop(&upsampled, &shortcut)?;

        let mut combined = Tensor::cat(&[&shortcut, &upsampled], 1)?;
        for conv in &self.post_shortcut_convs {
            combined = combined.apply(conv)?;
        }
        Ok(combined)
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_shortcut(&self) -> usize {
        self.n_shortcut
    }

    pub fn n_outputs(&self) -> usize {
        self.n_outputs
    }
}

impl LengthTransform for UpsamplingBlock {
    fn output_length(&self, input_length: usize) -> Result<usize> {
        let mut size = self.upconv.output_length(input_length)?;
        for conv in &self.post_shortcut_convs {
            size = conv.output_length(size)?;
        }
        Ok(size)
    }

    fn input_length(&self, output_length: usize) -> Result<usize> {
        let mut size = output_length;
        for conv in self.post_shortcut_convs.iter().rev() {
            size = conv.input_length(size)?;
        }
        self.upconv.input_length(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn make_vb(device: &Device) -> (VarMap, VarBuilder<'static>) {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        (varmap, vb)
    }

    fn params(resampling: Resampling, depth: usize) -> BlockParams {
        BlockParams {
            kernel_size: 5,
            stride: 2,
            depth,
            conv_type: ConvType::Normal,
            resampling,
            resample_filter_size: 15,
        }
    }

    #[test]
    fn downsampling_block_shapes() {
        let device = Device::Cpu;
        let (_vm, vb) = make_vb(&device);
        let block = DownsamplingBlock::new(1, 8, &params(Resampling::Fixed, 2), vb).unwrap();
        // 45 → 41 → 37 → 19
        let x = Tensor::randn(0f32, 1.0, (1, 1, 45), &device).unwrap();
        let (out, shortcut) = block.forward(&x).unwrap();
        assert_eq!(shortcut.dims(), &[1, 8, 37]);
        assert_eq!(out.dims(), &[1, 8, 19]);
        assert_eq!(block.output_length(45).unwrap(), 19);
        assert_eq!(block.input_length(19).unwrap(), 45);
    }

    #[test]
    fn learned_downsampling_block_shapes() {
        let device = Device::Cpu;
        let (_vm, vb) = make_vb(&device);
        let block = DownsamplingBlock::new(2, 4, &params(Resampling::Learned, 1), vb).unwrap();
        // 25 → 21 → (21 - 5 + 1 - 1) / 2 + 1 = 9
        let x = Tensor::randn(0f32, 1.0, (1, 2, 25), &device).unwrap();
        let (out, shortcut) = block.forward(&x).unwrap();
        assert_eq!(shortcut.dims(), &[1, 4, 21]);
        assert_eq!(out.dims(), &[1, 4, 9]);
        assert_eq!(block.output_length(25).unwrap(), 9);
        assert_eq!(block.input_length(9).unwrap(), 25);
    }

    #[test]
    fn input_length_round_trip_is_stable() {
        let device = Device::Cpu;
        let (_vm, vb) = make_vb(&device);
        for resampling in [Resampling::Fixed, Resampling::Learned] {
            let vb = vb.pp(format!("{resampling:?}"));
            let block = DownsamplingBlock::new(1, 4, &params(resampling, 1), vb).unwrap();
            for n in 1..200 {
                let Ok(out) = block.output_length(n) else {
                    continue;
                };
                let back = block.input_length(out).unwrap();
                assert!(back >= n, "n={n} out={out} back={back}");
                let again = block.input_length(block.output_length(back).unwrap()).unwrap();
                assert_eq!(again, back);
            }
        }
    }

    #[test]
    fn upsampling_block_crops_shortcut() {
        let device = Device::Cpu;
        let (_vm, vb) = make_vb(&device);
        let block = UpsamplingBlock::new(16, 8, 8, &params(Resampling::Fixed, 1), vb).unwrap();
        // 4 → 7, shortcut 15 cropped to 7, conv → 3
        let x = Tensor::randn(0f32, 1.0, (2, 16, 4), &device).unwrap();
        let shortcut = Tensor::randn(0f32, 1.0, (2, 8, 15), &device).unwrap();
        let out = block.forward(&x, &shortcut).unwrap();
        assert_eq!(out.dims(), &[2, 8, 3]);
        assert_eq!(block.output_length(4).unwrap(), 3);
        assert_eq!(block.input_length(3).unwrap(), 4);
    }

    #[test]
    fn learned_upsampling_block_shapes() {
        let device = Device::Cpu;
        let (_vm, vb) = make_vb(&device);
        let block = UpsamplingBlock::new(4, 4, 2, &params(Resampling::Learned, 2), vb).unwrap();
        // 10 → (9 * 2 + 1) - 4 = 15 → 11 → 7
        let x = Tensor::randn(0f32, 1.0, (1, 4, 10), &device).unwrap();
        let shortcut = Tensor::randn(0f32, 1.0, (1, 4, 21), &device).unwrap();
        let out = block.forward(&x, &shortcut).unwrap();
        assert_eq!(out.dims(), &[1, 2, 7]);
        assert_eq!(block.output_length(10).unwrap(), 7);
    }

    #[test]
    fn shortcut_channel_mismatch_rejected() {
        let device = Device::Cpu;
        let (_vm, vb) = make_vb(&device);
        let block = UpsamplingBlock::new(16, 8, 8, &params(Resampling::Fixed, 1), vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 16, 4), &device).unwrap();
        let shortcut = Tensor::randn(0f32, 1.0, (1, 4, 15), &device).unwrap();
        assert!(matches!(block.forward(&x, &shortcut), Err(Error::Config(_))));
    }

    #[test]
    fn odd_shortcut_difference_rejected() {
        let device = Device::Cpu;
        let (_vm, vb) = make_vb(&device);
        let block = UpsamplingBlock::new(16, 8, 8, &params(Resampling::Fixed, 1), vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (1, 16, 4), &device).unwrap();
        let shortcut = Tensor::randn(0f32, 1.0, (1, 8, 14), &device).unwrap();
        let err = block.forward(&x, &shortcut).unwrap_err();
        assert!(matches!(
            err,
            Error::CropParity {
                longer: 14,
                shorter: 7
            }
        ));
    }
}
