use std::fmt;

use serde::{Deserialize, Serialize};

/// Independent elementary track fed into its own sink.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    /// Stable lowercase label used in logs and status output.
    pub fn as_str(self) -> &'static str {
        match self {
            TrackKind::Video => "video",
            TrackKind::Audio => "audio",
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of a single streaming session.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No source attached yet.
    #[default]
    Idle,
    /// Source attached; data flows or is held back by backpressure.
    Streaming,
    /// A trailing-region removal is in flight.
    Evicting,
    /// An append is in flight; the source stays paused until it completes.
    Appending,
    /// Intake was resumed after a pause and no chunk has arrived yet.
    Resuming,
    /// A stale buffer is being dropped before the source restarts.
    Reconciling,
    /// Source ended; the sink is still finishing its last mutation.
    Draining,
    /// Source ended and every accepted chunk is in the sink.
    Ended,
    /// Terminal fault; the session does not retry.
    Errored,
}

impl SessionPhase {
    /// `true` for phases no further input can leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Errored)
    }
}

/// Reason why a feed stopped producing data.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Every track's source ended and the container was finalized.
    Eof,
    /// A session faulted.
    Error,
    /// The feed was shut down by its owner.
    Stopped,
}

/// Point-in-time view of one track's session.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackStatus {
    /// Track this session feeds, once known.
    pub track: Option<TrackKind>,
    /// Current state machine phase.
    pub phase: SessionPhase,
    /// Format switch / reconciliation counter.
    pub generation: u64,
    /// Declared content type of the sink.
    pub mime_type: Option<String>,
    /// Start of the resident interval in seconds.
    pub buffered_start: Option<f64>,
    /// End of the resident interval in seconds.
    pub buffered_end: Option<f64>,
    /// `true` when the sink reports more than one disjoint range.
    pub fragmented: bool,
    /// Last observed playback position in seconds.
    pub position: f64,
    /// Seconds buffered ahead of the position.
    pub forward_buffer: f64,
    /// Seconds buffered behind the position.
    pub behind_buffer: f64,
    /// Whether the source is currently held back.
    pub paused: bool,
    /// Whether the source reported its end.
    pub source_ended: bool,
    /// Size of a chunk parked after a capacity rejection.
    pub pending_quota_bytes: Option<usize>,
    /// Watermarks derived from the sink span after a capacity rejection.
    pub derived_high: Option<f64>,
    pub derived_low: Option<f64>,
    pub derived_evict_chunk: Option<f64>,
    /// Total bytes accepted by the sink.
    pub appended_bytes: u64,
    /// Total seconds removed from the sink.
    pub evicted_seconds: f64,
    /// Last fatal error message, if any.
    pub last_error: Option<String>,
}

/// Aggregate status reported by the buffer manager.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FeedStatus {
    /// One entry per configured track with a live session.
    pub tracks: Vec<TrackStatus>,
    /// `true` once the end-of-stream signal was delivered.
    pub finalized: bool,
    /// Terminal reason when the feed stopped.
    pub end_reason: Option<EndReason>,
}
