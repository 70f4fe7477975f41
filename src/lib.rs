//! Wave-U-Net audio source separation in pure Rust.
//!
//! A candle-based implementation of the Wave-U-Net family of 1-D U-Nets
//! operating directly on raw waveforms. Every convolution is *valid*
//! (unpadded), so the network consumes context around the region it predicts:
//! the model solves, at construction time, the exact input length that yields
//! at least the requested output length.
//!
//! ## Architecture
//!
//! ```text
//! waveform [B, num_inputs, input_size]
//!        ↓
//!   downsampling blocks (conv stack → shortcut, then decimate) ──┐
//!        ↓                                                        │ skip
//!   bottleneck convs                                              │ (centre
//!        ↓                                                        │  cropped)
//!   upsampling blocks (upsample, concat shortcut, conv stack) ←──┘
//!        ↓
//!   1×1 projection → clamp [-1, 1] (separation) or log-softmax (classes)
//!        ↓
//! per source [B, num_outputs, output_size]
//! ```
//!
//! ## Modules
//!
//! - [`config`] — network hyperparameters, JSON loading and validation
//! - [`model`] — layers, blocks, size solver and the two model variants

pub mod config;
pub mod model;

mod error;

pub use config::NetworkConfig;
pub use error::{Error, Result};
pub use model::lyrics::WaveunetLyrics;
pub use model::size::ShapeSpec;
pub use model::waveunet::Waveunet;
