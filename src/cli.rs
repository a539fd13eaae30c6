use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use vidopt::engine::{AccelPreference, Bitrate, Scale};

#[derive(Parser)]
#[command(name = "vidopt")]
#[command(
    about = "Transcode video with hardware encoder probing and software fallback",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Append logs to this file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Transcode a single file
    Transcode(TranscodeArgs),

    /// Show which hardware encoder families work on this machine
    Encoders {
        /// Print the availability map as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check if ffmpeg is installed
    CheckFfmpeg,

    /// Show config status and location, or create default config if missing
    InitConfig,
}

#[derive(Args, Debug)]
pub struct TranscodeArgs {
    /// Source video
    pub input: PathBuf,

    /// Destination; `.mp4` is appended unless it ends in mp4/mkv/webm/mov/avi
    pub output: PathBuf,

    /// Target codec: h264, hevc (h265) or av1
    #[arg(long)]
    pub codec: Option<String>,

    /// Constant rate factor (mapped to a bitrate for hardware encoders)
    #[arg(long)]
    pub crf: Option<u8>,

    /// Explicit target bitrate, e.g. 3000k or 2.5M
    #[arg(long)]
    pub bitrate: Option<Bitrate>,

    /// Hardware acceleration: none, auto, nvidia, amd or vaapi
    #[arg(long)]
    pub accel: Option<AccelPreference>,

    /// Output frame size as WIDTHxHEIGHT
    #[arg(long, value_name = "WxH")]
    pub scale: Option<Scale>,

    /// Apply the hqdn3d denoise filter
    #[arg(long)]
    pub denoise: bool,

    /// Two-pass encode (software encoders only)
    #[arg(long)]
    pub two_pass: bool,

    /// Encoder preset hint, e.g. fast or slow
    #[arg(long)]
    pub preset: Option<String>,

    /// Print the ffmpeg command(s) without running them
    #[arg(long)]
    pub dry_run: bool,

    /// Don't echo ffmpeg output or progress
    #[arg(short, long)]
    pub quiet: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}
