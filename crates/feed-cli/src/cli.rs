use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "feed", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Buffer tuning file (TOML)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the playable formats of a manifest
    Formats {
        /// Media manifest (TOML)
        manifest: PathBuf,
    },

    /// Stream a manifest into in-memory buffers driven by a simulated player
    Run(RunArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Media manifest (TOML)
    pub manifest: PathBuf,

    /// Video format index (as printed by `formats`)
    #[arg(long)]
    pub video: Option<usize>,

    /// Audio format index (as printed by `formats`)
    #[arg(long)]
    pub audio: Option<usize>,

    /// Playback speed of the simulated player
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,

    /// Per-track sink quota in bytes
    #[arg(long, default_value_t = 64 * 1024 * 1024)]
    pub capacity_bytes: usize,

    /// Byte rate assumed for formats without a bitrate (kbps)
    #[arg(long, default_value_t = 1000)]
    pub fallback_kbps: u32,

    /// Forward buffer that pauses the source (seconds)
    #[arg(long)]
    pub high_watermark: Option<f64>,

    /// Behind buffer that triggers eviction (seconds)
    #[arg(long)]
    pub low_watermark: Option<f64>,

    /// Seconds removed per eviction
    #[arg(long)]
    pub evict_chunk: Option<f64>,

    /// Re-evaluation tick (milliseconds)
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Source read size (bytes)
    #[arg(long)]
    pub chunk_bytes: Option<usize>,

    /// Status line interval (milliseconds)
    #[arg(long, default_value_t = 1000)]
    pub status_interval_ms: u64,

    /// Switch video to this format index once playback reaches `--switch-at`
    #[arg(long)]
    pub switch_video: Option<usize>,

    /// Switch audio to this format index once playback reaches `--switch-at`
    #[arg(long)]
    pub switch_audio: Option<usize>,

    /// Playback position (seconds) at which format switches happen
    #[arg(long, default_value_t = 10.0)]
    pub switch_at: f64,

    /// Seek to this position once playback reaches `--seek-at`
    #[arg(long)]
    pub seek_to: Option<f64>,

    /// Playback position (seconds) at which the seek happens
    #[arg(long, default_value_t = 5.0)]
    pub seek_at: f64,
}
