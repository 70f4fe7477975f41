//! Wave-U-Net size inspector.
//!
//! Builds a model with zero weights on the CPU and prints the solved input
//! and output sizes as one JSON line on stdout:
//!
//! ```json
//! {"input_frames":41,"output_frames":1,"output_start_frame":20,"output_end_frame":21}
//! ```
//!
//! Exit code 0 on success, non-zero when the configuration is invalid or no
//! size satisfies the target.

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use clap::Parser;
use waveunet_rs::{NetworkConfig, Waveunet, WaveunetLyrics};

#[derive(Parser, Debug)]
#[command(
    name = "waveunet-shapes",
    about = "Solve Wave-U-Net input/output sizes",
    long_about = "Solve the exact input length a Wave-U-Net configuration needs to\n\
                  produce at least the target number of output frames.\n\
                  Prints the resulting shape as a JSON line on stdout."
)]
struct Args {
    /// JSON network configuration. Defaults are used for missing fields.
    #[arg(long, short = 'c')]
    config: Option<std::path::PathBuf>,

    /// Override the minimum number of output frames.
    #[arg(long, short = 't')]
    target_output_size: Option<usize>,

    /// Override the largest bottleneck length the solver tries.
    #[arg(long)]
    max_bottleneck: Option<usize>,

    /// Solve for the classification (log-softmax) variant.
    #[arg(long)]
    lyrics: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NetworkConfig::from_file(path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?,
        None => NetworkConfig::default(),
    };
    if let Some(target) = args.target_output_size {
        config.target_output_size = target;
    }
    if let Some(max_bottleneck) = args.max_bottleneck {
        config.max_bottleneck = max_bottleneck;
    }

    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let shapes = if args.lyrics {
        *WaveunetLyrics::new(&config, vb)?.shapes()
    } else {
        *Waveunet::new(&config, vb)?.shapes()
    };

    println!("{}", serde_json::to_string(&shapes)?);
    Ok(())
}
