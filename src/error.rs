//! Error types for waveunet-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid network configuration, detected at construction.
    #[error("config: {0}")]
    Config(String),

    /// A layer's shape function is undefined for this length.
    #[error("{layer} cannot map a length of {length}")]
    InvalidLength { length: usize, layer: &'static str },

    /// No bottleneck size below the solver cap reaches the target output.
    #[error(
        "no bottleneck size up to {max_bottleneck} produces at least {target} output frames"
    )]
    SizeInfeasible { target: usize, max_bottleneck: usize },

    /// Input length differs from the solved input size.
    #[error("input has {actual} frames, model expects exactly {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Two feature maps cannot be centre-aligned (odd length difference).
    #[error("cannot centre-crop {longer} frames to {shorter}: length difference is odd")]
    CropParity { longer: usize, shorter: usize },

    /// Requested instrument has no body / output slice.
    #[error("unknown instrument: {0}")]
    UnknownInstrument(String),

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
