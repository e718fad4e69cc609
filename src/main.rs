//! Channel selection, metadata extraction, registration and export of
//! OME-TIFF files.
//!
//! ```text
//! ometiff-prep --input /data/sample_tiff --BFchannel 1 --channels 2 --reg --png
//! ```

use clap::{Parser, ValueEnum};
use ometiff_prep::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Motion {
    /// Rotation + translation
    Euclidean,
    /// Translation only
    Translation,
}

impl From<Motion> for MotionType {
    fn from(m: Motion) -> Self {
        match m {
            Motion::Euclidean => MotionType::Euclidean,
            Motion::Translation => MotionType::Translation,
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    version,
    about = "Channel selection, metadata extraction, registration and export of OME-TIFF files"
)]
struct Args {
    /// Directory containing the OME-TIFF files
    #[arg(short, long, value_name = "/path/to/images-directory/")]
    input: PathBuf,

    /// Output images and metadata directory (default=<input>/output/)
    #[arg(short, long, value_name = "/path/to/output/")]
    output: Option<PathBuf>,

    /// Indicates which channel is the bright field
    #[arg(short = 'c', long = "BFchannel", default_value_t = 0)]
    bf_channel: usize,

    /// Exports metadata in a separate file
    #[arg(short, long)]
    metadata: bool,

    /// Enables registration, each frame onto the previous one
    #[arg(short, long)]
    reg: bool,

    /// Exports the bright field channel (registered if required) to 8-bit PNGs
    #[arg(short, long)]
    png: bool,

    /// Number of channels interleaved in each file
    #[arg(long, default_value_t = 1)]
    channels: usize,

    /// Rigid motion model used for registration
    #[arg(long, value_enum, default_value_t = Motion::Euclidean)]
    motion: Motion,

    /// Iteration cap of the ECC optimizer for every frame pair
    #[arg(long, default_value_t = 200)]
    max_iterations: i32,

    /// ECC convergence threshold
    #[arg(long, default_value_t = 1e-6)]
    epsilon: f64,

    /// Frame pairs below this correlation fall back to the identity
    #[arg(long, default_value_t = 0.5)]
    min_correlation: f64,

    /// Reuse transforms saved by a previous run instead of estimating them
    #[arg(long)]
    reuse_tmats: bool,

    /// Worker threads (default: one per core)
    #[arg(short, long)]
    jobs: Option<usize>,
}

impl Args {
    fn into_config(self) -> PreprocessConfig {
        let mut config = PreprocessConfig::new(self.input);
        if let Some(output) = self.output {
            config.output_dir = output;
        }
        config.bf_channel = self.bf_channel;
        config.channel_count = self.channels;
        config.export_metadata = self.metadata;
        config.register = self.reg;
        config.export_png = self.png;
        config.reuse_transforms = self.reuse_tmats;
        config.jobs = self.jobs;
        config.ecc = EccMatchParameters {
            motion_type: self.motion.into(),
            max_count: self.max_iterations,
            epsilon: Some(self.epsilon),
            min_correlation: self.min_correlation,
            ..Default::default()
        };
        config
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(Some(env_logger::fmt::TimestampPrecision::Seconds))
        .init();

    let config = Args::parse().into_config();
    log::info!("Input directory: {}", config.input_dir.display());
    log::info!("Output directory: {}", config.output_dir.display());
    log::info!("Bright field channel: {}", config.bf_channel);
    if config.register {
        log::info!("Registration: {:?}", config.ecc.motion_type);
    }
    if config.export_metadata {
        log::info!("Saving metadata");
    }
    if config.export_png {
        log::info!("Exporting images to 8-bit PNG");
    }

    match BatchPreprocessor::new(config).run() {
        Ok(report) => {
            for (path, e) in &report.failed {
                eprintln!("Failed: {}: {}", path.display(), e);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
