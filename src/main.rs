// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "camera-control")]
#[command(about = "Drive a camera session: list devices, take photos, record video")]
#[command(version)]
struct Cli {
    /// Hardware profile (JSON) for the virtual camera; built-in devices when omitted
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List available cameras and their capabilities
    List {
        /// Print the capability listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Take a photo
    Photo {
        /// Still image width (default from config)
        #[arg(long)]
        width: Option<u32>,

        /// Still image height (default from config)
        #[arg(long)]
        height: Option<u32>,

        /// Directory to save the photo in (default: ~/Pictures/Camera)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Record a video
    Video {
        /// Recording duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,

        /// Record at the highest fixed high-speed frame rate
        #[arg(long)]
        slow_motion: bool,

        /// Video width (default from config)
        #[arg(long)]
        width: Option<u32>,

        /// Video height (default from config)
        #[arg(long)]
        height: Option<u32>,

        /// Directory to save the video in (default: ~/Videos/Camera)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Set RUST_LOG to control the log level, e.g. RUST_LOG=camera_control=debug
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    match cli.command {
        Commands::List { json } => cli::list_cameras(cli.profile.as_deref(), json),
        Commands::Photo { width, height, output } => {
            runtime.block_on(cli::take_photo(cli.profile.as_deref(), width, height, output))
        }
        Commands::Video {
            duration,
            slow_motion,
            width,
            height,
            output,
        } => runtime.block_on(cli::record_video(
            cli.profile.as_deref(),
            duration,
            slow_motion,
            width,
            height,
            output,
        )),
    }
}
