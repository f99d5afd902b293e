//! Error taxonomy for the feed engine.

use media_feed_types::TrackKind;
use thiserror::Error;

/// Errors surfaced by sessions and the buffer manager.
///
/// Capacity rejections and stale buffers are handled inside a session; only
/// the variants below ever cross the session boundary.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StreamError {
    /// The sink rejected a chunk again after an eviction freed space; the chunk is dropped.
    #[error("{track} sink out of capacity, dropped {bytes} byte chunk")]
    CapacityExhausted { track: TrackKind, bytes: usize },
    /// The sink failed a mutation for a reason other than capacity.
    #[error("{track} sink fault: {message}")]
    SinkFault { track: TrackKind, message: String },
    /// The byte source failed.
    #[error("{track} source fault: {message}")]
    SourceFault { track: TrackKind, message: String },
    /// A format switch is already in progress for the track.
    #[error("{track} format switch already in progress")]
    Busy { track: TrackKind },
    /// No session exists for the track (sink not open yet, or track absent).
    #[error("{track} session not ready")]
    NotReady { track: TrackKind },
    /// The session actor is gone.
    #[error("{track} session closed")]
    SessionClosed { track: TrackKind },
    /// Watermarks must satisfy `0 < evict_chunk < low < high`.
    #[error("invalid watermarks: high={high} low={low} evict_chunk={evict_chunk}")]
    InvalidWatermarks { high: f64, low: f64, evict_chunk: f64 },
    /// Neither a video-only nor an audio-only format is usable.
    #[error("no playable formats")]
    NoPlayableFormats,
    /// Live content cannot be fed through an append-only buffer.
    #[error("live content is not supported")]
    LiveUnsupported,
    /// A session or coordinator thread could not be started.
    #[error("failed to spawn {name} thread: {message}")]
    ThreadSpawn { name: String, message: String },
}

impl StreamError {
    /// `true` for errors that terminate a session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StreamError::CapacityExhausted { .. }
                | StreamError::SinkFault { .. }
                | StreamError::SourceFault { .. }
        )
    }
}

/// Outcome of a rejected sink mutation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SinkError {
    /// Storage quota reached; the caller may evict and retry.
    #[error("sink capacity exceeded")]
    CapacityExceeded,
    /// Any other failure.
    #[error("sink failure: {0}")]
    Fault(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_classification_matches_taxonomy() {
        let track = TrackKind::Video;
        assert!(StreamError::SinkFault { track, message: "x".into() }.is_fatal());
        assert!(StreamError::SourceFault { track, message: "x".into() }.is_fatal());
        assert!(StreamError::CapacityExhausted { track, bytes: 1 }.is_fatal());
        assert!(!StreamError::Busy { track }.is_fatal());
        assert!(!StreamError::NotReady { track }.is_fatal());
    }

    #[test]
    fn display_includes_track() {
        let err = StreamError::Busy { track: TrackKind::Audio };
        assert_eq!(err.to_string(), "audio format switch already in progress");
    }

    #[test]
    fn spawn_failure_names_the_thread() {
        let err = StreamError::ThreadSpawn {
            name: "feed-coordinator".to_string(),
            message: "resource temporarily unavailable".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to spawn feed-coordinator thread: resource temporarily unavailable"
        );
        assert!(!err.is_fatal());
    }
}
