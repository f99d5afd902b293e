//! Buffering tuning parameters shared by every session of a feed.

use std::time::Duration;

use serde::Deserialize;

use crate::error::StreamError;
use crate::window::Watermarks;

/// Feed tuning parameters.
///
/// All durations are in seconds of media time except `tick_interval_ms`.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct BufferConfig {
    /// Forward buffer at or above which the source is held back.
    pub high_watermark_seconds: f64,
    /// Behind-position buffer above which a trailing region is evicted.
    pub low_watermark_seconds: f64,
    /// Length of a single trailing eviction.
    pub evict_chunk_seconds: f64,
    /// Period of the re-evaluation tick.
    pub tick_interval_ms: u64,
    /// Read size used by reader-backed sources.
    pub source_chunk_bytes: usize,
}

impl Default for BufferConfig {
    /// One minute ahead, half a minute behind, evicting in quarter minutes.
    fn default() -> Self {
        Self {
            high_watermark_seconds: 60.0,
            low_watermark_seconds: 30.0,
            evict_chunk_seconds: 15.0,
            tick_interval_ms: 500,
            source_chunk_bytes: 256 * 1024,
        }
    }
}

impl BufferConfig {
    /// Validated watermarks for the window policy.
    pub fn watermarks(&self) -> Result<Watermarks, StreamError> {
        Watermarks::new(
            self.high_watermark_seconds,
            self.low_watermark_seconds,
            self.evict_chunk_seconds,
        )
    }

    /// Tick period, never shorter than 10ms.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(10))
    }

    /// Source read size, never zero.
    pub fn source_chunk_bytes(&self) -> usize {
        self.source_chunk_bytes.max(1)
    }
}
