//! Configuration and manifest loading.

use std::path::Path;

use anyhow::{Context, Result};
use media_feed::{BufferConfig, MediaDescription};

use crate::cli::RunArgs;

/// Load buffer tuning from TOML, or defaults when no file is given.
pub fn load_buffer_config(path: Option<&Path>) -> Result<BufferConfig> {
    let Some(path) = path else {
        return Ok(BufferConfig::default());
    };
    let raw = std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
    let cfg = toml::from_str::<BufferConfig>(&raw).with_context(|| format!("parse config {:?}", path))?;
    Ok(cfg)
}

/// Apply command-line overrides on top of the loaded config.
pub fn apply_overrides(cfg: &mut BufferConfig, args: &RunArgs) {
    if let Some(v) = args.high_watermark {
        cfg.high_watermark_seconds = v;
    }
    if let Some(v) = args.low_watermark {
        cfg.low_watermark_seconds = v;
    }
    if let Some(v) = args.evict_chunk {
        cfg.evict_chunk_seconds = v;
    }
    if let Some(v) = args.tick_ms {
        cfg.tick_interval_ms = v;
    }
    if let Some(v) = args.chunk_bytes {
        cfg.source_chunk_bytes = v;
    }
}

/// Load a media manifest. Relative format locations resolve against the
/// manifest's directory.
pub fn load_manifest(path: &Path) -> Result<MediaDescription> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read manifest {:?}", path))?;
    let mut media =
        toml::from_str::<MediaDescription>(&raw).with_context(|| format!("parse manifest {:?}", path))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for format in &mut media.formats {
        if let Some(url) = format.url.as_mut() {
            if !is_remote(url) && Path::new(url.as_str()).is_relative() {
                *url = base.join(url.as_str()).to_string_lossy().into_owned();
            }
        }
    }
    Ok(media)
}

pub fn is_remote(location: &str) -> bool {
    location.starts_with("http://") || location.starts_with("https://")
}
