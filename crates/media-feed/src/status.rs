use std::sync::{Arc, Mutex};

use media_feed_types::{SessionPhase, TrackKind, TrackStatus};

/// Status cell written by a session actor and read by the manager.
pub(crate) type SharedTrackStatus = Arc<Mutex<TrackStatus>>;

pub(crate) fn shared(track: TrackKind, mime_type: &str) -> SharedTrackStatus {
    Arc::new(Mutex::new(TrackStatus {
        track: Some(track),
        phase: SessionPhase::Idle,
        mime_type: Some(mime_type.to_string()),
        ..TrackStatus::default()
    }))
}

/// Copy out the current status, tolerating a poisoned lock.
pub(crate) fn snapshot(status: &SharedTrackStatus) -> TrackStatus {
    match status.lock() {
        Ok(g) => g.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_status_starts_idle_with_track() {
        let status = shared(TrackKind::Audio, "audio/mp4");
        let snap = snapshot(&status);
        assert_eq!(snap.track, Some(TrackKind::Audio));
        assert_eq!(snap.phase, SessionPhase::Idle);
        assert_eq!(snap.mime_type.as_deref(), Some("audio/mp4"));
    }
}
