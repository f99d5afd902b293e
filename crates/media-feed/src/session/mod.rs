//! Per-track stream sessions.
//!
//! Each session runs on its own thread and owns its sink. Everything that
//! touches a session (source chunks, sink completions, ticks, position
//! updates, format switches) arrives as a [`SessionMessage`] on one mailbox,
//! so the state machine is only ever entered by one caller at a time.

mod machine;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::clock::PlaybackClock;
use crate::error::StreamError;
use crate::format::FormatDescriptor;
use crate::sink::{MutationNotifier, SinkFactory};
use crate::source::{SourceEvent, SourceFactory};
use crate::status::{self, SharedTrackStatus};
use crate::window::Watermarks;
use machine::SessionCore;
use media_feed_types::{TrackKind, TrackStatus};

/// Mailbox message for a session actor.
#[derive(Debug)]
pub(crate) enum SessionMessage {
    /// Event from the source opened for `generation`.
    Source { generation: u64, event: SourceEvent },
    /// The sink finished the in-flight mutation.
    MutationComplete,
    /// The sink failed the in-flight mutation.
    MutationFailed(String),
    Tick,
    Position { position: f64, seek: bool },
    SwitchFormat {
        format: FormatDescriptor,
        reply: Sender<Result<u64, StreamError>>,
    },
    Stop,
}

/// Notification from a session to its manager.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionEvent {
    SourceEnded { track: TrackKind },
    Ended { track: TrackKind, generation: u64 },
    Restarted { track: TrackKind, generation: u64 },
    Switched { track: TrackKind, generation: u64 },
    Failed { track: TrackKind, error: StreamError },
}

/// Everything needed to start one session.
pub(crate) struct SessionSetup {
    pub track: TrackKind,
    pub format: FormatDescriptor,
    pub watermarks: Watermarks,
    pub tick: Duration,
    pub sources: Arc<dyn SourceFactory>,
    pub sinks: Arc<dyn SinkFactory>,
    pub clock: Arc<dyn PlaybackClock>,
    pub events: Sender<SessionEvent>,
}

/// Owner-side handle of a running session.
pub(crate) struct SessionHandle {
    track: TrackKind,
    tx: Sender<SessionMessage>,
    status: SharedTrackStatus,
    switching: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Create the track's sink and start its actor thread.
pub(crate) fn spawn_session(setup: SessionSetup) -> Result<SessionHandle, StreamError> {
    let SessionSetup {
        track,
        format,
        watermarks,
        tick,
        sources,
        sinks,
        clock,
        events,
    } = setup;

    let (tx, rx) = crossbeam_channel::unbounded();
    let sink = sinks
        .create(track, &format, MutationNotifier::new(tx.clone()))
        .map_err(|e| StreamError::SinkFault {
            track,
            message: format!("{e:#}"),
        })?;
    let status = status::shared(track, format.mime());
    let core = SessionCore::new(
        track,
        format,
        sources,
        clock,
        sink,
        tx.clone(),
        events,
        status.clone(),
        watermarks,
    );

    let name = format!("feed-session-{track}");
    let join = thread::Builder::new()
        .name(name.clone())
        .spawn(move || run_session(core, rx, tick))
        .map_err(|e| StreamError::ThreadSpawn {
            name,
            message: e.to_string(),
        })?;

    Ok(SessionHandle {
        track,
        tx,
        status,
        switching: AtomicBool::new(false),
        join: Mutex::new(Some(join)),
    })
}

fn run_session(mut core: SessionCore, rx: Receiver<SessionMessage>, tick: Duration) {
    core.start();
    let ticker = crossbeam_channel::tick(tick);
    loop {
        crossbeam_channel::select! {
            recv(rx) -> msg => match msg {
                Ok(SessionMessage::Stop) | Err(_) => break,
                Ok(msg) => core.handle(msg),
            },
            recv(ticker) -> _ => core.handle(SessionMessage::Tick),
        }
    }
    core.shutdown();
}

impl SessionHandle {
    /// Ask the session to switch formats and wait for the new generation.
    ///
    /// A second caller arriving while one switch is outstanding gets `Busy`
    /// without touching the session.
    pub(crate) fn switch_format(&self, format: FormatDescriptor) -> Result<u64, StreamError> {
        if self
            .switching
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StreamError::Busy { track: self.track });
        }
        let result = self.request_switch(format);
        self.switching.store(false, Ordering::Release);
        result
    }

    fn request_switch(&self, format: FormatDescriptor) -> Result<u64, StreamError> {
        let closed = StreamError::SessionClosed { track: self.track };
        let (reply, reply_rx) = crossbeam_channel::bounded(1);
        self.tx
            .send(SessionMessage::SwitchFormat { format, reply })
            .map_err(|_| closed.clone())?;
        reply_rx.recv().map_err(|_| closed)?
    }

    pub(crate) fn notify_position(&self, position: f64, seek: bool) {
        let _ = self.tx.send(SessionMessage::Position { position, seek });
    }

    pub(crate) fn status(&self) -> TrackStatus {
        status::snapshot(&self.status)
    }

    #[cfg(test)]
    pub(crate) fn mark_switching(&self) {
        self.switching.store(true, Ordering::Release);
    }

    /// Stop the actor and wait for it. Idempotent.
    pub(crate) fn stop(&self) {
        let _ = self.tx.send(SessionMessage::Stop);
        let join = match self.join.lock() {
            Ok(mut g) => g.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(join) = join {
            if join.join().is_err() {
                tracing::warn!(track = %self.track, "session thread panicked");
            }
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    use crate::clock::ManualClock;
    use crate::sink::MemorySinkFactory;
    use crate::source::{ByteSource, ReaderSource, SourceEvents};
    use media_feed_types::SessionPhase;

    struct BytesFactory {
        len: usize,
    }

    impl SourceFactory for BytesFactory {
        fn open(
            &self,
            _track: TrackKind,
            _format: &FormatDescriptor,
            events: SourceEvents,
        ) -> anyhow::Result<Box<dyn ByteSource>> {
            Ok(Box::new(ReaderSource::spawn(Cursor::new(vec![0u8; self.len]), 16, events)?))
        }
    }

    fn setup(len: usize, events: Sender<SessionEvent>) -> SessionSetup {
        SessionSetup {
            track: TrackKind::Audio,
            format: FormatDescriptor {
                id: "140".to_string(),
                mime_type: Some("audio/mp4".to_string()),
                has_audio: true,
                ..FormatDescriptor::default()
            },
            watermarks: Watermarks::new(60.0, 30.0, 15.0).unwrap(),
            tick: Duration::from_millis(10),
            sources: Arc::new(BytesFactory { len }),
            sinks: Arc::new(MemorySinkFactory {
                capacity_bytes: 1 << 20,
                fallback_bytes_per_second: 16.0,
            }),
            clock: Arc::new(ManualClock::new(0.0)),
            events,
        }
    }

    #[test]
    fn actor_streams_source_to_end() {
        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let handle = spawn_session(setup(64, events_tx)).unwrap();

        let mut saw_ended = false;
        while let Ok(event) = events_rx.recv_timeout(Duration::from_secs(5)) {
            if matches!(event, SessionEvent::Ended { .. }) {
                saw_ended = true;
                break;
            }
        }
        assert!(saw_ended);
        let mut status = handle.status();
        for _ in 0..200 {
            if status.phase == SessionPhase::Ended {
                break;
            }
            thread::sleep(Duration::from_millis(10));
            status = handle.status();
        }
        assert_eq!(status.phase, SessionPhase::Ended);
        assert_eq!(status.appended_bytes, 64);
        assert_eq!(status.buffered_end, Some(4.0));
        handle.stop();
        handle.stop();
    }

    #[test]
    fn concurrent_switch_is_rejected_as_busy() {
        let (events_tx, _events_rx) = crossbeam_channel::unbounded();
        let handle = spawn_session(setup(64, events_tx)).unwrap();
        handle.mark_switching();
        let format = FormatDescriptor {
            id: "251".to_string(),
            ..FormatDescriptor::default()
        };
        assert_eq!(
            handle.switch_format(format),
            Err(StreamError::Busy {
                track: TrackKind::Audio
            })
        );
    }

    #[test]
    fn switch_round_trips_generation() {
        let (events_tx, _events_rx) = crossbeam_channel::unbounded();
        let handle = spawn_session(setup(1 << 12, events_tx)).unwrap();
        let format = FormatDescriptor {
            id: "251".to_string(),
            mime_type: Some("audio/webm".to_string()),
            ..FormatDescriptor::default()
        };
        assert_eq!(handle.switch_format(format.clone()), Ok(1));
        assert_eq!(handle.switch_format(format), Ok(2));
    }

    #[test]
    fn stopped_session_rejects_switch() {
        let (events_tx, _events_rx) = crossbeam_channel::unbounded();
        let handle = spawn_session(setup(16, events_tx)).unwrap();
        handle.stop();
        assert_eq!(
            handle.switch_format(FormatDescriptor::default()),
            Err(StreamError::SessionClosed {
                track: TrackKind::Audio
            })
        );
    }
}
