//! Wave-U-Net variant producing per-frame class log-probabilities.

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::config::NetworkConfig;
use crate::model::LengthTransform;
use crate::model::body::{NetworkBody, OutputHead};
use crate::model::size::ShapeSpec;
use crate::model::waveunet::{check_input, solve_shapes};
use crate::{Error, Result};

/// Single-body Wave-U-Net with a log-softmax head over `num_outputs` classes.
#[derive(Debug, Clone)]
pub struct WaveunetLyrics {
    config: NetworkConfig,
    body: NetworkBody,
    shapes: ShapeSpec,
}

impl WaveunetLyrics {
    /// Build the body and solve sizes for `config.target_output_size`.
    pub fn new(config: &NetworkConfig, vb: VarBuilder) -> Result<Self> {
        let body = Self::build_body(config, vb)?;
        let shapes = solve_shapes(config, &body, config.target_output_size)?;
        Self::finish(config, body, shapes)
    }

    /// Build with an explicitly chosen input/output pair.
    ///
    /// `output_size` must be exactly what the network produces from
    /// `input_size` frames.
    pub fn with_sizes(
        config: &NetworkConfig,
        input_size: usize,
        output_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let body = Self::build_body(config, vb)?;
        let produced = body.output_length(input_size)?;
        if produced != output_size {
            return Err(Error::Config(format!(
                "{input_size} input frames produce {produced} output frames, not {output_size}"
            )));
        }
        let shapes = ShapeSpec::new(input_size, output_size)?;
        Self::finish(config, body, shapes)
    }

    fn build_body(config: &NetworkConfig, vb: VarBuilder) -> Result<NetworkBody> {
        config.validate()?;
        NetworkBody::new(
            config,
            config.num_outputs,
            OutputHead::LogSoftmax,
            vb.pp("waveunets"),
        )
    }

    fn finish(config: &NetworkConfig, body: NetworkBody, shapes: ShapeSpec) -> Result<Self> {
        tracing::info!(
            classes = config.num_outputs,
            "using valid convolutions with {} inputs and {} outputs",
            shapes.input_frames,
            shapes.output_frames
        );
        Ok(Self {
            config: config.clone(),
            body,
            shapes,
        })
    }

    /// `[B, num_inputs, input_size]` to `[B, num_outputs, output_size]`
    /// log-probabilities.
    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        check_input(xs, self.config.num_inputs, self.shapes.input_frames)?;
        self.body.forward(xs)
    }

    pub fn input_size(&self) -> usize {
        self.shapes.input_frames
    }

    pub fn output_size(&self) -> usize {
        self.shapes.output_frames
    }

    pub fn shapes(&self) -> &ShapeSpec {
        &self.shapes
    }

    pub fn num_classes(&self) -> usize {
        self.config.num_outputs
    }

    pub fn body(&self) -> &NetworkBody {
        &self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConvType, Resampling};
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn config() -> NetworkConfig {
        NetworkConfig {
            num_inputs: 1,
            channels: vec![1, 8, 16],
            num_outputs: 6,
            kernel_size_down: 5,
            kernel_size_up: 3,
            stride: 2,
            depth: 1,
            conv_type: ConvType::Normal,
            resampling: Resampling::Fixed,
            separate: false,
            target_output_size: 10,
            ..Default::default()
        }
    }

    #[test]
    fn classifies_every_output_frame() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = WaveunetLyrics::new(&config(), vb).unwrap();
        assert!(model.output_size() >= 10);
        assert_eq!(model.num_classes(), 6);

        let x = Tensor::randn(0f32, 1.0, (2, 1, model.input_size()), &device).unwrap();
        let y = model.forward(&x).unwrap();
        assert_eq!(y.dims(), &[2, 6, model.output_size()]);
        let totals: Vec<f32> = y
            .exp()
            .unwrap()
            .sum(1)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        for total in totals {
            assert!((total - 1.0).abs() < 1e-4, "total = {total}");
        }
    }

    #[test]
    fn explicit_sizes_must_agree() {
        let solved = {
            let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
            WaveunetLyrics::new(&config(), vb).unwrap()
        };
        let (input, output) = (solved.input_size(), solved.output_size());

        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let model = WaveunetLyrics::with_sizes(&config(), input, output, vb).unwrap();
        assert_eq!(model.shapes(), solved.shapes());

        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let err = WaveunetLyrics::with_sizes(&config(), input, output + 2, vb).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn wrong_length_rejected_before_compute() {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        let model = WaveunetLyrics::new(&config(), vb).unwrap();
        let x = Tensor::zeros((1, 1, model.input_size() - 1), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            model.forward(&x),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
