//! Network configuration.
//!
//! Defaults follow the usual MUSDB-style separation setup: stereo input
//! and output, six levels of doubling channel widths, kernel 5, stride 4 and
//! one Wave-U-Net per source.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Channels normalised together by one group when group norm is active.
pub const NORM_CHANNELS: usize = 8;

/// Normalisation / activation variant of every [`ConvLayer`](crate::model::conv::ConvLayer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvType {
    /// Plain convolution followed by leaky ReLU.
    Normal,
    /// Group norm (groups of [`NORM_CHANNELS`]) followed by ReLU.
    Gn,
    /// Batch norm followed by ReLU.
    Bn,
}

/// How the blocks change the time resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resampling {
    /// Fixed windowed-sinc low-pass filter.
    Fixed,
    /// Trainable strided (transposed) convolution.
    Learned,
}

/// Immutable construction parameters shared by every network body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Channels of the raw input waveform.
    #[serde(default = "default_num_inputs")]
    pub num_inputs: usize,

    /// Channel width per level, shallowest first. `channels.len() - 1`
    /// downsampling levels are built; the last width is the bottleneck's.
    #[serde(default = "default_channels")]
    pub channels: Vec<usize>,

    /// Output channels (or classes) per instrument.
    #[serde(default = "default_num_outputs")]
    pub num_outputs: usize,

    /// Source names, in output order.
    #[serde(default = "default_instruments")]
    pub instruments: Vec<String>,

    /// Kernel size of the downsampling path and bottleneck.
    #[serde(default = "default_kernel_size")]
    pub kernel_size_down: usize,

    /// Kernel size of the upsampling path.
    #[serde(default = "default_kernel_size")]
    pub kernel_size_up: usize,

    /// Decimation factor of every level.
    #[serde(default = "default_stride")]
    pub stride: usize,

    /// Convolutions per block.
    #[serde(default = "default_depth")]
    pub depth: usize,

    #[serde(default = "default_conv_type")]
    pub conv_type: ConvType,

    #[serde(default = "default_resampling")]
    pub resampling: Resampling,

    /// Taps of the fixed resampling filter.
    #[serde(default = "default_resample_filter_size")]
    pub resample_filter_size: usize,

    /// One body per instrument instead of a single shared body.
    #[serde(default = "default_separate")]
    pub separate: bool,

    /// Minimum number of output frames the model must produce.
    #[serde(default = "default_target_output_size")]
    pub target_output_size: usize,

    /// Largest bottleneck length the size solver tries.
    #[serde(default = "default_max_bottleneck")]
    pub max_bottleneck: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            num_inputs: default_num_inputs(),
            channels: default_channels(),
            num_outputs: default_num_outputs(),
            instruments: default_instruments(),
            kernel_size_down: default_kernel_size(),
            kernel_size_up: default_kernel_size(),
            stride: default_stride(),
            depth: default_depth(),
            conv_type: default_conv_type(),
            resampling: default_resampling(),
            resample_filter_size: default_resample_filter_size(),
            separate: default_separate(),
            target_output_size: default_target_output_size(),
            max_bottleneck: default_max_bottleneck(),
        }
    }
}

impl NetworkConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Number of downsampling (and upsampling) levels.
    pub fn num_levels(&self) -> usize {
        self.channels.len().saturating_sub(1)
    }

    /// Channels emitted by the output projection of one body.
    pub fn projection_channels(&self) -> usize {
        if self.separate {
            self.num_outputs
        } else {
            self.num_outputs * self.instruments.len()
        }
    }

    /// Reject configurations that cannot produce a valid network.
    pub fn validate(&self) -> Result<()> {
        if self.kernel_size_down % 2 == 0 || self.kernel_size_up % 2 == 0 {
            return Err(Error::Config(format!(
                "only odd kernel sizes are allowed, got down={} up={}",
                self.kernel_size_down, self.kernel_size_up
            )));
        }
        if self.stride < 2 {
            return Err(Error::Config(format!(
                "stride must be greater than 1, got {}",
                self.stride
            )));
        }
        if self.depth == 0 {
            return Err(Error::Config("depth must be at least 1".into()));
        }
        if self.channels.len() < 2 {
            return Err(Error::Config(format!(
                "need at least two channel widths (one level plus bottleneck), got {:?}",
                self.channels
            )));
        }
        if self.num_inputs == 0 || self.num_outputs == 0 || self.channels.contains(&0) {
            return Err(Error::Config("channel counts must be non-zero".into()));
        }
        if self.instruments.is_empty() {
            return Err(Error::Config("at least one instrument is required".into()));
        }
        let mut seen = HashSet::new();
        for name in &self.instruments {
            if !seen.insert(name.as_str()) {
                return Err(Error::Config(format!("duplicate instrument name: {name}")));
            }
        }
        if self.conv_type == ConvType::Gn
            && let Some(width) = self.channels.iter().find(|&&c| c % NORM_CHANNELS != 0)
        {
            return Err(Error::Config(format!(
                "group norm needs channel widths divisible by {NORM_CHANNELS}, got {width}"
            )));
        }
        if self.resampling == Resampling::Fixed
            && (self.resample_filter_size < 3 || self.resample_filter_size % 2 == 0)
        {
            return Err(Error::Config(format!(
                "resample filter size must be odd and greater than 2, got {}",
                self.resample_filter_size
            )));
        }
        if self.max_bottleneck == 0 {
            return Err(Error::Config("max_bottleneck must be positive".into()));
        }
        Ok(())
    }
}

fn default_num_inputs() -> usize {
    2
}
fn default_channels() -> Vec<usize> {
    (0..6).map(|i| 32 << i).collect()
}
fn default_num_outputs() -> usize {
    2
}
fn default_instruments() -> Vec<String> {
    ["bass", "drums", "other", "vocals"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_kernel_size() -> usize {
    5
}
fn default_stride() -> usize {
    4
}
fn default_depth() -> usize {
    1
}
fn default_conv_type() -> ConvType {
    ConvType::Gn
}
fn default_resampling() -> Resampling {
    Resampling::Fixed
}
fn default_resample_filter_size() -> usize {
    15
}
fn default_separate() -> bool {
    true
}
fn default_target_output_size() -> usize {
    // 2 s at 44.1 kHz
    88_200
}
fn default_max_bottleneck() -> usize {
    10_000
}
