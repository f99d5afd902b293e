//! Feed-level coordination across track sessions.
//!
//! The manager creates one session per selected track once the container
//! signals it is writable, routes position updates and format switches to
//! them, and declares end of stream exactly once when every present track
//! has ended.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender};

use crate::clock::PlaybackClock;
use crate::config::BufferConfig;
use crate::error::StreamError;
use crate::format::FormatDescriptor;
use crate::session::{self, SessionEvent, SessionHandle, SessionSetup};
use crate::sink::SinkFactory;
use crate::source::SourceFactory;
use crate::window::Watermarks;
use media_feed_types::{EndReason, FeedStatus, TrackKind};

/// Receives feed-level outcomes.
pub trait PlaybackObserver: Send + Sync {
    /// Every present track has ended. Called at most once per manager.
    fn end_of_stream(&self);
    /// A track failed and stopped streaming.
    fn fatal(&self, track: TrackKind, error: &StreamError);
}

/// Observer that only logs.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingObserver;

impl PlaybackObserver for LoggingObserver {
    fn end_of_stream(&self) {
        tracing::info!("end of stream");
    }

    fn fatal(&self, track: TrackKind, error: &StreamError) {
        tracing::error!(track = %track, "track failed: {error}");
    }
}

/// Collaborators shared by every session of a feed.
#[derive(Clone)]
pub struct FeedContext {
    pub sources: Arc<dyn SourceFactory>,
    pub sinks: Arc<dyn SinkFactory>,
    pub clock: Arc<dyn PlaybackClock>,
    pub observer: Arc<dyn PlaybackObserver>,
}

/// Per-track end flags. Finalization fires once, when every expected track
/// has ended.
#[derive(Debug)]
pub(crate) struct TrackEndFlags {
    expected: BTreeSet<TrackKind>,
    ended: BTreeSet<TrackKind>,
    finalized: bool,
}

impl TrackEndFlags {
    pub(crate) fn new(tracks: impl IntoIterator<Item = TrackKind>) -> Self {
        Self {
            expected: tracks.into_iter().collect(),
            ended: BTreeSet::new(),
            finalized: false,
        }
    }

    /// Record that `track` ended. Returns `true` exactly once: on the call
    /// that completes the set.
    pub(crate) fn mark_ended(&mut self, track: TrackKind) -> bool {
        if !self.expected.contains(&track) {
            return false;
        }
        self.ended.insert(track);
        if self.finalized || self.ended != self.expected {
            return false;
        }
        self.finalized = true;
        true
    }

    /// `track` is streaming again after a restart or switch.
    pub(crate) fn mark_active(&mut self, track: TrackKind) {
        self.ended.remove(&track);
    }

    pub(crate) fn is_finalized(&self) -> bool {
        self.finalized
    }
}

#[derive(Debug, Default)]
struct EndState {
    finalized: bool,
    reason: Option<EndReason>,
}

type SharedEndState = Arc<Mutex<EndState>>;

fn lock_end(state: &SharedEndState) -> std::sync::MutexGuard<'_, EndState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Owns the sessions of one feed.
pub struct BufferManager {
    config: BufferConfig,
    watermarks: Watermarks,
    tracks: Vec<(TrackKind, FormatDescriptor)>,
    ctx: FeedContext,
    sessions: Mutex<BTreeMap<TrackKind, Arc<SessionHandle>>>,
    events_tx: Mutex<Option<Sender<SessionEvent>>>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    end: SharedEndState,
}

impl BufferManager {
    /// Validate the configuration and start the end-of-stream coordinator.
    ///
    /// No session exists until [`BufferManager::sink_opened`] is called.
    pub fn new(
        config: BufferConfig,
        tracks: Vec<(TrackKind, FormatDescriptor)>,
        ctx: FeedContext,
    ) -> Result<Self, StreamError> {
        let watermarks = config.watermarks()?;
        if tracks.is_empty() {
            return Err(StreamError::NoPlayableFormats);
        }
        let mut tracks = tracks;
        tracks.sort_by_key(|(kind, _)| *kind);
        tracks.dedup_by_key(|(kind, _)| *kind);

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let end: SharedEndState = Arc::default();
        let flags = TrackEndFlags::new(tracks.iter().map(|(kind, _)| *kind));
        let observer = ctx.observer.clone();
        let end_for_thread = end.clone();
        let coordinator = thread::Builder::new()
            .name("feed-coordinator".to_string())
            .spawn(move || run_coordinator(events_rx, flags, end_for_thread, observer))
            .map_err(|e| StreamError::ThreadSpawn {
                name: "feed-coordinator".to_string(),
                message: e.to_string(),
            })?;

        let labels: Vec<String> = tracks.iter().map(|(k, f)| format!("{k}:{}", f.id)).collect();
        tracing::info!(
            tracks = ?labels,
            high = watermarks.high,
            low = watermarks.low,
            evict_chunk = watermarks.evict_chunk,
            "buffer manager created"
        );

        Ok(Self {
            config,
            watermarks,
            tracks,
            ctx,
            sessions: Mutex::new(BTreeMap::new()),
            events_tx: Mutex::new(Some(events_tx)),
            coordinator: Mutex::new(Some(coordinator)),
            end,
        })
    }

    /// The container is writable: create a session for every track.
    ///
    /// Calling it again is a no-op.
    pub fn sink_opened(&self) -> Result<(), StreamError> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        if !sessions.is_empty() {
            return Ok(());
        }
        let events_tx = {
            let guard = self.events_tx.lock().unwrap_or_else(|e| e.into_inner());
            match guard.as_ref() {
                Some(tx) => tx.clone(),
                None => return Err(StreamError::SessionClosed { track: self.tracks[0].0 }),
            }
        };

        let mut started = BTreeMap::new();
        for (track, format) in &self.tracks {
            let setup = SessionSetup {
                track: *track,
                format: format.clone(),
                watermarks: self.watermarks,
                tick: self.config.tick_interval(),
                sources: self.ctx.sources.clone(),
                sinks: self.ctx.sinks.clone(),
                clock: self.ctx.clock.clone(),
                events: events_tx.clone(),
            };
            // Already started sessions are stopped when `started` drops.
            let handle = session::spawn_session(setup)?;
            started.insert(*track, Arc::new(handle));
        }
        tracing::info!(sessions = started.len(), "sink opened, sessions started");
        *sessions = started;
        Ok(())
    }

    /// Switch `track` to `format`, returning the new session generation.
    pub fn switch_format(&self, track: TrackKind, format: FormatDescriptor) -> Result<u64, StreamError> {
        let handle = self.session(track).ok_or(StreamError::NotReady { track })?;
        handle.switch_format(format)
    }

    /// Regular playback progress.
    pub fn notify_position(&self, position: f64) {
        for handle in self.handles() {
            handle.notify_position(position, false);
        }
    }

    /// The player jumped to `position`.
    pub fn notify_seek(&self, position: f64) {
        tracing::info!(position, "seek");
        for handle in self.handles() {
            handle.notify_position(position, true);
        }
    }

    pub fn is_finalized(&self) -> bool {
        lock_end(&self.end).finalized
    }

    pub fn status(&self) -> FeedStatus {
        let end = lock_end(&self.end);
        FeedStatus {
            tracks: self.handles().iter().map(|h| h.status()).collect(),
            finalized: end.finalized,
            end_reason: end.reason,
        }
    }

    /// Stop every session and the coordinator. Idempotent.
    pub fn shutdown(&self) {
        let sessions = std::mem::take(&mut *self.sessions.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in sessions.values() {
            handle.stop();
        }
        drop(sessions);

        self.events_tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        let coordinator = self.coordinator.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(join) = coordinator {
            if join.join().is_err() {
                tracing::warn!("coordinator thread panicked");
            }
            let mut end = lock_end(&self.end);
            if end.reason.is_none() {
                end.reason = Some(EndReason::Stopped);
            }
            tracing::info!("buffer manager stopped");
        }
    }

    fn session(&self, track: TrackKind) -> Option<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&track)
            .cloned()
    }

    fn handles(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }
}

impl Drop for BufferManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_coordinator(
    rx: Receiver<SessionEvent>,
    mut flags: TrackEndFlags,
    end: SharedEndState,
    observer: Arc<dyn PlaybackObserver>,
) {
    while let Ok(event) = rx.recv() {
        match event {
            SessionEvent::SourceEnded { track } => {
                tracing::debug!(track = %track, "source exhausted, draining");
            }
            SessionEvent::Ended { track, generation } => {
                tracing::debug!(track = %track, generation, "track ended");
                if flags.mark_ended(track) {
                    tracing::info!("all tracks ended, finalizing stream");
                    observer.end_of_stream();
                    let mut state = lock_end(&end);
                    state.finalized = true;
                    state.reason.get_or_insert(EndReason::Eof);
                }
            }
            SessionEvent::Restarted { track, generation } | SessionEvent::Switched { track, generation } => {
                if flags.is_finalized() {
                    tracing::debug!(track = %track, generation, "track restarted after finalization");
                }
                flags.mark_active(track);
            }
            SessionEvent::Failed { track, error } if error.is_fatal() => {
                lock_end(&end).reason = Some(EndReason::Error);
                observer.fatal(track, &error);
            }
            SessionEvent::Failed { track, error } => {
                tracing::warn!(track = %track, "session stopped: {error}");
            }
        }
    }
}
