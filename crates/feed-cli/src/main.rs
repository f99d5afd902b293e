//! `feed` streams a media manifest through the adaptive buffer engine.
//!
//! ## Modes
//! - `formats`: list the playable video/audio formats of a manifest.
//! - `run`: stream the selected formats into quota-limited in-memory sinks
//!   while a simulated player consumes them, printing status as JSON lines.

mod cli;
mod config;
mod http_source;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,feed=info,media_feed=info")
        }))
        .with_writer(std::io::stderr)
        .init();

    match args.cmd {
        cli::Command::Formats { manifest } => runtime::run_formats(&manifest),
        cli::Command::Run(run) => {
            let mut buffer = config::load_buffer_config(args.config.as_deref())?;
            config::apply_overrides(&mut buffer, &run);
            runtime::run_stream(run, buffer)
        }
    }
}
