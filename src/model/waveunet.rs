//! Source-separation Wave-U-Net.
//!
//! Either one [`NetworkBody`] per instrument (`separate = true`) or a single
//! shared body whose output channels are split into one slice per instrument.
//! All bodies share the architecture, so sizes are solved once on the first
//! and apply to every body.

use std::collections::HashMap;

use candle_core::Tensor;
use candle_nn::VarBuilder;

use crate::config::NetworkConfig;
use crate::model::body::{NetworkBody, OutputHead, frames};
use crate::model::size::{ShapeSpec, SizeSolver};
use crate::{Error, Result};

/// Body key used when all instruments share one body.
pub const SHARED_BODY: &str = "ALL";

/// Multi-instrument Wave-U-Net with exact valid-convolution sizes.
#[derive(Debug, Clone)]
pub struct Waveunet {
    config: NetworkConfig,
    bodies: HashMap<String, NetworkBody>,
    target_output_size: usize,
    shapes: ShapeSpec,
}

impl Waveunet {
    /// Build every body and solve the input/output sizes for
    /// `config.target_output_size`.
    ///
    /// Weights are read from `waveunets.{instrument}.*` (or
    /// `waveunets.ALL.*` for the shared body).
    pub fn new(config: &NetworkConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let body_names: Vec<&str> = if config.separate {
            config.instruments.iter().map(String::as_str).collect()
        } else {
            vec![SHARED_BODY]
        };
        let vb = vb.pp("waveunets");
        let mut bodies = HashMap::with_capacity(body_names.len());
        for name in &body_names {
            let body = NetworkBody::new(
                config,
                config.projection_channels(),
                OutputHead::Clamp,
                vb.pp(*name),
            )?;
            bodies.insert(name.to_string(), body);
        }

        let shapes = solve_shapes(config, &bodies[body_names[0]], config.target_output_size)?;
        tracing::info!(
            bodies = bodies.len(),
            "using valid convolutions with {} inputs and {} outputs",
            shapes.input_frames,
            shapes.output_frames
        );

        Ok(Self {
            config: config.clone(),
            bodies,
            target_output_size: config.target_output_size,
            shapes,
        })
    }

    /// Re-solve sizes for a new minimum output length.
    pub fn set_output_size(&mut self, target_output_size: usize) -> Result<()> {
        let shapes = solve_shapes(&self.config, self.first_body()?, target_output_size)?;
        tracing::info!(
            "using valid convolutions with {} inputs and {} outputs",
            shapes.input_frames,
            shapes.output_frames
        );
        self.target_output_size = target_output_size;
        self.shapes = shapes;
        Ok(())
    }

    /// Separate `xs` (`[B, num_inputs, input_size]`) into sources.
    ///
    /// With per-instrument bodies, `instrument` selects the single body to run
    /// (all bodies when `None`). With a shared body, the output is split per
    /// instrument and `instrument` optionally keeps just one slice. Every
    /// returned tensor is `[B, num_outputs, output_size]`.
    pub fn forward(
        &self,
        xs: &Tensor,
        instrument: Option<&str>,
    ) -> Result<HashMap<String, Tensor>> {
        self.check_input(xs)?;
        if let Some(name) = instrument
            && !self.config.instruments.iter().any(|i| i == name)
        {
            return Err(Error::UnknownInstrument(name.to_string()));
        }

        if self.config.separate {
            let names: Vec<&str> = match instrument {
                Some(name) => vec![name],
                None => self.config.instruments.iter().map(String::as_str).collect(),
            };
            let mut outputs = HashMap::with_capacity(names.len());
            for name in names {
                let body = self
                    .bodies
                    .get(name)
                    .ok_or_else(|| Error::UnknownInstrument(name.to_string()))?;
                outputs.insert(name.to_string(), body.forward(xs)?);
            }
            return Ok(outputs);
        }

        let body = self
            .bodies
            .get(SHARED_BODY)
            .ok_or_else(|| Error::UnknownInstrument(SHARED_BODY.to_string()))?;
        let out = body.forward(xs)?;

        let n = self.config.num_outputs;
        let mut outputs = HashMap::with_capacity(self.config.instruments.len());
        for (idx, name) in self.config.instruments.iter().enumerate() {
            if instrument.is_some_and(|wanted| wanted != name) {
                continue;
            }
            outputs.insert(name.clone(), out.narrow(1, idx * n, n)?);
        }
        Ok(outputs)
    }

    fn check_input(&self, xs: &Tensor) -> Result<()> {
        check_input(xs, self.config.num_inputs, self.shapes.input_frames)
    }

    fn first_body(&self) -> Result<&NetworkBody> {
        let name = if self.config.separate {
            self.config.instruments.first().map(String::as_str)
        } else {
            Some(SHARED_BODY)
        };
        name.and_then(|name| self.bodies.get(name))
            .ok_or_else(|| Error::Config("model has no network body".into()))
    }

    /// Exact input length `forward` accepts.
    pub fn input_size(&self) -> usize {
        self.shapes.input_frames
    }

    /// Output length `forward` produces (at least the target).
    pub fn output_size(&self) -> usize {
        self.shapes.output_frames
    }

    pub fn target_output_size(&self) -> usize {
        self.target_output_size
    }

    pub fn shapes(&self) -> &ShapeSpec {
        &self.shapes
    }

    pub fn instruments(&self) -> &[String] {
        &self.config.instruments
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Body serving `instrument` (the shared body when not separating).
    pub fn body(&self, instrument: &str) -> Option<&NetworkBody> {
        if self.config.separate {
            self.bodies.get(instrument)
        } else if self.config.instruments.iter().any(|i| i == instrument) {
            self.bodies.get(SHARED_BODY)
        } else {
            None
        }
    }
}

pub(crate) fn solve_shapes(
    config: &NetworkConfig,
    body: &NetworkBody,
    target_output_size: usize,
) -> Result<ShapeSpec> {
    SizeSolver::new(config.max_bottleneck).shapes(body, target_output_size)
}

/// Fail fast, before any computation, on a wrongly shaped input.
pub(crate) fn check_input(xs: &Tensor, num_inputs: usize, input_size: usize) -> Result<()> {
    let (_, channels, _) = xs.dims3()?;
    if channels != num_inputs {
        return Err(Error::Config(format!(
            "input has {channels} channels, model expects {num_inputs}"
        )));
    }
    let actual = frames(xs)?;
    if actual != input_size {
        return Err(Error::ShapeMismatch {
            expected: input_size,
            actual,
        });
    }
    Ok(())
}
