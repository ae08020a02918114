// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use depthcap::Config;
use depthcap::constants::app_version;
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "depthcap")]
#[command(about = "Depth and video capture with recording playback")]
#[command(version = app_version())]
struct Cli {
    /// Configuration file (default: <config dir>/depthcap/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List recordings
    List {
        /// Directory to search (default: configured recordings directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Show a recording's metadata
    Info {
        /// Recording directory or metadata file
        recording: PathBuf,
    },

    /// Replay a recording
    Play {
        /// Recording directory or metadata file
        recording: PathBuf,

        /// Stop after this many frames (default: until Ctrl+C)
        #[arg(short, long)]
        frames: Option<u64>,

        /// Play once and pause on the last frame
        #[arg(long)]
        no_loop: bool,

        /// Request depth buffers
        #[arg(long)]
        depth: bool,

        /// Request video buffers
        #[arg(long)]
        video: bool,
    },

    /// Record from a Kinect
    #[cfg(all(feature = "kinect", target_arch = "x86_64"))]
    Record {
        /// Kinect index
        #[arg(short, long)]
        device: Option<usize>,

        /// Recording duration in seconds
        #[arg(short = 't', long, default_value = "10")]
        duration: u64,

        /// Recording name (default: current date and time)
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match cli.config.clone().or_else(depthcap::config::default_config_path) {
        Some(path) => Config::load_or_default(&path),
        None => Config::default(),
    };

    // RUST_LOG wins over the configured filter
    // Examples: RUST_LOG=debug, RUST_LOG=depthcap=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_filter)),
        )
        .with_target(true)
        .with_level(true)
        .init();

    match cli.command {
        Commands::List { dir } => cli::list_recordings(&dir.unwrap_or_else(|| config.recordings_dir())),
        Commands::Info { recording } => cli::show_info(&recording),
        Commands::Play {
            recording,
            frames,
            no_loop,
            depth,
            video,
        } => cli::play(&config, recording, frames, !no_loop, depth, video),
        #[cfg(all(feature = "kinect", target_arch = "x86_64"))]
        Commands::Record {
            device,
            duration,
            output,
        } => cli::record(&config, device, duration, output),
    }
}
