//! Exact input/output size solver.
//!
//! Valid convolutions make the output shorter than the input, and strided
//! layers only accept lengths aligned to their stride. Rather than inverting
//! the whole network in closed form, the solver scans bottleneck lengths
//! `b = 1, 2, ...`: each candidate is pushed forward through the upsampling
//! path (giving the output length) and backward through the bottleneck and
//! downsampling path (giving the input length). The first candidate whose
//! output covers the target wins, so the input is the shortest that works.

use serde::{Deserialize, Serialize};

use crate::model::LengthTransform;
use crate::model::body::NetworkBody;
use crate::{Error, Result};

/// How the model's output frames line up with its input frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeSpec {
    pub input_frames: usize,
    pub output_frames: usize,
    /// First input frame covered by the output.
    pub output_start_frame: usize,
    /// One past the last input frame covered by the output.
    pub output_end_frame: usize,
}

impl ShapeSpec {
    /// Centre an output of `output_frames` inside an input of `input_frames`.
    pub fn new(input_frames: usize, output_frames: usize) -> Result<Self> {
        if output_frames > input_frames {
            return Err(Error::Config(format!(
                "output ({output_frames} frames) cannot be longer than input ({input_frames} frames)"
            )));
        }
        let context = input_frames - output_frames;
        if context % 2 != 0 {
            return Err(Error::CropParity {
                longer: input_frames,
                shorter: output_frames,
            });
        }
        let output_start_frame = context / 2;
        Ok(Self {
            input_frames,
            output_frames,
            output_start_frame,
            output_end_frame: output_start_frame + output_frames,
        })
    }

    /// Context frames consumed on each side of the output.
    pub fn context_frames(&self) -> usize {
        self.output_start_frame
    }
}

/// Linear-scan bottleneck search, capped at `max_bottleneck`.
#[derive(Debug, Clone, Copy)]
pub struct SizeSolver {
    max_bottleneck: usize,
}

impl SizeSolver {
    pub fn new(max_bottleneck: usize) -> Self {
        Self { max_bottleneck }
    }

    pub fn max_bottleneck(&self) -> usize {
        self.max_bottleneck
    }

    /// Output length produced from a bottleneck of `bottleneck` frames.
    pub fn output_for_bottleneck(body: &NetworkBody, bottleneck: usize) -> Result<usize> {
        let mut size = bottleneck;
        for block in body.upsampling_blocks() {
            size = block.output_length(size)?;
        }
        Ok(size)
    }

    /// Input length that decimates to exactly `bottleneck` frames after the
    /// bottleneck convolutions.
    pub fn input_for_bottleneck(body: &NetworkBody, bottleneck: usize) -> Result<usize> {
        let mut size = bottleneck;
        for conv in body.bottlenecks().iter().rev() {
            size = conv.input_length(size)?;
        }
        for block in body.downsampling_blocks().iter().rev() {
            size = block.input_length(size)?;
        }
        Ok(size)
    }

    /// Smallest `(input_size, output_size)` with `output_size >= target`.
    pub fn solve(&self, body: &NetworkBody, target_output_size: usize) -> Result<(usize, usize)> {
        for bottleneck in 1..=self.max_bottleneck {
            let output_size = match Self::output_for_bottleneck(body, bottleneck) {
                Ok(size) if size >= target_output_size => size,
                // Too short, or not a length the upsampling path can produce.
                Ok(_) | Err(Error::InvalidLength { .. }) => continue,
                Err(err) => return Err(err),
            };
            let input_size = Self::input_for_bottleneck(body, bottleneck)?;
            tracing::debug!(
                bottleneck,
                input_size,
                output_size,
                target_output_size,
                "size solver found bottleneck"
            );
            return Ok((input_size, output_size));
        }
        Err(Error::SizeInfeasible {
            target: target_output_size,
            max_bottleneck: self.max_bottleneck,
        })
    }

    /// [`solve`](Self::solve), packaged as a centred [`ShapeSpec`].
    pub fn shapes(&self, body: &NetworkBody, target_output_size: usize) -> Result<ShapeSpec> {
        let (input_size, output_size) = self.solve(body, target_output_size)?;
        ShapeSpec::new(input_size, output_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConvType, NetworkConfig, Resampling};
    use crate::model::body::OutputHead;
    use candle_core::{DType, Device};
    use candle_nn::VarBuilder;

    fn body(config: &NetworkConfig) -> NetworkBody {
        let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
        NetworkBody::new(config, config.num_outputs, OutputHead::Clamp, vb).unwrap()
    }

    fn small_config() -> NetworkConfig {
        NetworkConfig {
            num_inputs: 1,
            channels: vec![1, 8, 16],
            num_outputs: 1,
            kernel_size_down: 5,
            kernel_size_up: 5,
            stride: 2,
            depth: 1,
            conv_type: ConvType::Normal,
            resampling: Resampling::Fixed,
            ..Default::default()
        }
    }

    #[test]
    fn shape_spec_centres_output() {
        let shape = ShapeSpec::new(41, 1).unwrap();
        assert_eq!(shape.output_start_frame, 20);
        assert_eq!(shape.output_end_frame, 21);
        assert_eq!(shape.context_frames(), 20);
        assert!(matches!(ShapeSpec::new(10, 3), Err(Error::CropParity { .. })));
        assert!(ShapeSpec::new(3, 10).is_err());
    }

    #[test]
    fn two_level_network_target_one() {
        let body = body(&small_config());
        let (input, output) = SizeSolver::new(1000).solve(&body, 1).unwrap();
        assert_eq!((input, output), (41, 1));
        assert_eq!((input - output) % 2, 0);
        assert_eq!(body.output_length(input).unwrap(), output);
    }

    #[test]
    fn solution_is_minimal() {
        let configs = [
            small_config(),
            NetworkConfig {
                stride: 4,
                ..small_config()
            },
            NetworkConfig {
                channels: vec![8, 8, 16, 16],
                kernel_size_up: 3,
                depth: 2,
                ..small_config()
            },
            NetworkConfig {
                resampling: Resampling::Learned,
                ..small_config()
            },
        ];
        for config in &configs {
            let body = body(config);
            let solver = SizeSolver::new(10_000);
            for target in [1, 7, 100, 1000] {
                let shape = solver.shapes(&body, target).unwrap();
                assert!(shape.output_frames >= target);
                assert_eq!(
                    body.output_length(shape.input_frames).unwrap(),
                    shape.output_frames
                );

                // Every smaller bottleneck is either infeasible or too short.
                let decimated = body.bottleneck_input_length(shape.input_frames).unwrap();
                let bottleneck = body
                    .bottlenecks()
                    .iter()
                    .try_fold(decimated, |n, conv| conv.output_length(n))
                    .unwrap();
                for smaller in 1..bottleneck {
                    match SizeSolver::output_for_bottleneck(&body, smaller) {
                        Ok(out) => assert!(out < target, "b={smaller} gives {out} >= {target}"),
                        Err(err) => assert!(matches!(err, Error::InvalidLength { .. })),
                    }
                }
                assert_eq!(
                    SizeSolver::input_for_bottleneck(&body, bottleneck).unwrap(),
                    shape.input_frames
                );
            }
        }
    }

    #[test]
    fn cap_reports_infeasible_target() {
        let body = body(&small_config());
        let err = SizeSolver::new(8).solve(&body, 10_000).unwrap_err();
        assert!(matches!(
            err,
            Error::SizeInfeasible {
                target: 10_000,
                max_bottleneck: 8
            }
        ));
    }
}
