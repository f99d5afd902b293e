//! Session state machine.
//!
//! `SessionCore` owns everything one track needs: the sink, the current
//! source, the generation counter and the single in-flight mutation slot.
//! It is driven one message at a time by the session actor and never touches
//! shared state other than its status cell.

use std::collections::VecDeque;
use std::sync::Arc;

use crossbeam_channel::Sender;

use super::{SessionEvent, SessionMessage};
use crate::clock::PlaybackClock;
use crate::error::{SinkError, StreamError};
use crate::format::FormatDescriptor;
use crate::interval::{BufferSnapshot, BufferedInterval};
use crate::sink::MediaSink;
use crate::source::{ByteSource, SourceEvent, SourceEvents, SourceFactory};
use crate::status::SharedTrackStatus;
use crate::window::{self, Eviction, Watermarks};
use media_feed_types::{SessionPhase, TrackKind};

/// The one sink mutation allowed in flight.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Mutation {
    Append { bytes: usize },
    RetryAppend { bytes: usize },
    Evict(BufferedInterval),
    Reset(BufferedInterval),
}

struct PendingSwitch {
    format: FormatDescriptor,
    reply: Sender<Result<u64, StreamError>>,
}

pub(crate) struct SessionCore {
    track: TrackKind,
    format: FormatDescriptor,
    sources: Arc<dyn SourceFactory>,
    clock: Arc<dyn PlaybackClock>,
    sink: Box<dyn MediaSink>,
    source: Option<Box<dyn ByteSource>>,
    mailbox: Sender<SessionMessage>,
    events: Sender<SessionEvent>,
    status: SharedTrackStatus,
    watermarks: Watermarks,
    derived: Option<Watermarks>,
    generation: u64,
    phase: SessionPhase,
    in_flight: Option<Mutation>,
    staged: VecDeque<Vec<u8>>,
    pending_quota_chunk: Option<Vec<u8>>,
    pending_switch: Option<PendingSwitch>,
    paused: bool,
    source_ended: bool,
    end_reported: bool,
    closed: bool,
    position: f64,
    appended_bytes: u64,
    evicted_seconds: f64,
    last_error: Option<String>,
}

impl SessionCore {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        track: TrackKind,
        format: FormatDescriptor,
        sources: Arc<dyn SourceFactory>,
        clock: Arc<dyn PlaybackClock>,
        sink: Box<dyn MediaSink>,
        mailbox: Sender<SessionMessage>,
        events: Sender<SessionEvent>,
        status: SharedTrackStatus,
        watermarks: Watermarks,
    ) -> Self {
        Self {
            track,
            format,
            sources,
            clock,
            sink,
            source: None,
            mailbox,
            events,
            status,
            watermarks,
            derived: None,
            generation: 0,
            phase: SessionPhase::Idle,
            in_flight: None,
            staged: VecDeque::new(),
            pending_quota_chunk: None,
            pending_switch: None,
            paused: true,
            source_ended: false,
            end_reported: false,
            closed: false,
            position: 0.0,
            appended_bytes: 0,
            evicted_seconds: 0.0,
            last_error: None,
        }
    }

    /// Attach the first source: `Idle -> Streaming`.
    pub(crate) fn start(&mut self) {
        if self.phase == SessionPhase::Idle {
            self.position = self.clock.position();
            if let Err(err) = self.open_source() {
                self.fail(err);
            }
        }
        self.publish();
    }

    /// Process one inbound message.
    pub(crate) fn handle(&mut self, msg: SessionMessage) {
        if self.closed {
            if let SessionMessage::SwitchFormat { reply, .. } = msg {
                let _ = reply.send(Err(StreamError::SessionClosed { track: self.track }));
            }
            return;
        }
        match msg {
            SessionMessage::Source { generation, event } => self.on_source(generation, event),
            SessionMessage::MutationComplete => self.on_mutation_complete(),
            SessionMessage::MutationFailed(message) => self.fail(StreamError::SinkFault {
                track: self.track,
                message,
            }),
            SessionMessage::Tick => {
                self.position = self.clock.position();
                self.evaluate();
            }
            SessionMessage::Position { position, seek } => {
                if seek {
                    tracing::info!(track = %self.track, position, "seek");
                }
                self.position = position;
                self.evaluate();
            }
            SessionMessage::SwitchFormat { format, reply } => self.switch_format(format, reply),
            SessionMessage::Stop => self.shutdown(),
        }
        self.publish();
    }

    /// Detach the source and refuse further work. Idempotent.
    pub(crate) fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.close_source();
        self.closed = true;
        self.staged.clear();
        if let Some(pending) = self.pending_switch.take() {
            let _ = pending
                .reply
                .send(Err(StreamError::SessionClosed { track: self.track }));
        }
        tracing::debug!(track = %self.track, generation = self.generation, "session stopped");
        self.publish();
    }

    fn on_source(&mut self, generation: u64, event: SourceEvent) {
        if generation != self.generation {
            tracing::debug!(
                track = %self.track,
                stale = generation,
                current = self.generation,
                "stale source event ignored"
            );
            return;
        }
        if self.phase.is_terminal() {
            return;
        }
        match event {
            SourceEvent::Data(chunk) => {
                self.pause_source();
                self.staged.push_back(chunk);
                self.pump();
            }
            SourceEvent::End => {
                tracing::info!(track = %self.track, generation, "source ended");
                self.source_ended = true;
                let _ = self.events.send(SessionEvent::SourceEnded { track: self.track });
                self.settle();
            }
            SourceEvent::Error(message) => self.fail(StreamError::SourceFault {
                track: self.track,
                message,
            }),
        }
    }

    fn on_mutation_complete(&mut self) {
        let Some(done) = self.in_flight.take() else {
            tracing::debug!(track = %self.track, "completion without a mutation in flight");
            return;
        };
        if self.phase.is_terminal() {
            return;
        }
        match done {
            Mutation::Append { bytes } | Mutation::RetryAppend { bytes } => {
                self.appended_bytes += bytes as u64;
            }
            Mutation::Evict(range) | Mutation::Reset(range) => {
                self.evicted_seconds += range.len();
            }
        }

        if let Some(pending) = self.pending_switch.take() {
            self.finish_switch(pending);
            return;
        }

        match done {
            Mutation::Evict(_) => {
                if let Some(chunk) = self.pending_quota_chunk.take() {
                    tracing::debug!(track = %self.track, bytes = chunk.len(), "retrying parked chunk");
                    self.append(chunk, true);
                    return;
                }
            }
            Mutation::Reset(_) => {
                self.restart_after_reset();
                return;
            }
            Mutation::Append { .. } | Mutation::RetryAppend { .. } => {}
        }

        if !self.staged.is_empty() {
            self.pump();
        } else {
            self.evaluate();
        }
    }

    /// Append the next staged chunk if the mutation slot is free.
    fn pump(&mut self) {
        if self.in_flight.is_some()
            || self.pending_quota_chunk.is_some()
            || self.phase.is_terminal()
        {
            return;
        }
        if let Some(chunk) = self.staged.pop_front() {
            self.append(chunk, false);
        }
    }

    fn append(&mut self, chunk: Vec<u8>, retry: bool) {
        let bytes = chunk.len();
        match self.sink.append(&chunk) {
            Ok(()) => {
                self.in_flight = Some(if retry {
                    Mutation::RetryAppend { bytes }
                } else {
                    Mutation::Append { bytes }
                });
                self.phase = if self.source_ended {
                    SessionPhase::Draining
                } else {
                    SessionPhase::Appending
                };
                tracing::debug!(track = %self.track, bytes, retry, "append issued");
            }
            Err(SinkError::CapacityExceeded) => self.on_capacity_exceeded(chunk, retry),
            Err(SinkError::Fault(message)) => self.fail(StreamError::SinkFault {
                track: self.track,
                message,
            }),
        }
    }

    fn on_capacity_exceeded(&mut self, chunk: Vec<u8>, retry: bool) {
        let bytes = chunk.len();
        if retry {
            tracing::error!(track = %self.track, bytes, "retry rejected by sink, dropping chunk");
            self.fail(StreamError::CapacityExhausted {
                track: self.track,
                bytes,
            });
            return;
        }
        let span = BufferSnapshot::from_ranges(&self.sink.buffered()).span();
        let Some(derived) = Watermarks::from_observed_span(span) else {
            tracing::error!(track = %self.track, bytes, span, "chunk does not fit an empty sink");
            self.fail(StreamError::CapacityExhausted {
                track: self.track,
                bytes,
            });
            return;
        };
        tracing::warn!(
            track = %self.track,
            bytes,
            span,
            high = derived.high,
            low = derived.low,
            evict_chunk = derived.evict_chunk,
            "sink quota reached, watermarks derived from resident span"
        );
        self.derived = Some(derived);
        self.pending_quota_chunk = Some(chunk);
        self.pause_source();
        self.phase = SessionPhase::Streaming;
        self.evaluate();
    }

    /// Run the window policy against the sink's current contents.
    ///
    /// Requests made while a mutation is in flight are dropped; the
    /// evaluation that follows its completion supersedes them.
    fn evaluate(&mut self) {
        if self.phase == SessionPhase::Idle || self.phase.is_terminal() {
            return;
        }
        if self.in_flight.is_some() || self.sink.is_busy() {
            return;
        }

        let snapshot = BufferSnapshot::from_ranges(&self.sink.buffered());
        let decision = window::evaluate(&snapshot, self.position, &self.active_watermarks());

        match decision.eviction {
            Eviction::Reset(range) => {
                self.begin_reconcile(range);
                return;
            }
            Eviction::Trailing(range) => {
                self.remove(Mutation::Evict(range));
                return;
            }
            Eviction::Keep => {}
        }

        if self.pending_quota_chunk.is_some() {
            return;
        }
        if !self.staged.is_empty() {
            self.pump();
            return;
        }
        if self.source_ended {
            self.settle();
            return;
        }
        let resumed = decision.should_resume && self.resume_source();
        if !decision.should_resume {
            self.pause_source();
        }
        // `Resuming` lasts until the resumed source delivers its next chunk.
        let awaiting_intake = self.phase == SessionPhase::Resuming && !self.paused;
        self.phase = if resumed || awaiting_intake {
            SessionPhase::Resuming
        } else {
            SessionPhase::Streaming
        };
    }

    fn remove(&mut self, mutation: Mutation) {
        let (range, phase) = match mutation {
            Mutation::Evict(range) => (range, SessionPhase::Evicting),
            Mutation::Reset(range) => (range, SessionPhase::Reconciling),
            Mutation::Append { .. } | Mutation::RetryAppend { .. } => return,
        };
        match self.sink.remove(range.start, range.end) {
            Ok(()) => {
                self.in_flight = Some(mutation);
                self.phase = phase;
                tracing::debug!(
                    track = %self.track,
                    start = range.start,
                    end = range.end,
                    "remove issued"
                );
            }
            Err(err) => self.fail(StreamError::SinkFault {
                track: self.track,
                message: err.to_string(),
            }),
        }
    }

    /// The buffer lies entirely after the position (or is fragmented): drop
    /// it and restart from a fresh source.
    fn begin_reconcile(&mut self, range: BufferedInterval) {
        tracing::warn!(
            track = %self.track,
            position = self.position,
            start = range.start,
            end = range.end,
            "stale buffer for position, resetting"
        );
        self.close_source();
        self.generation += 1;
        self.staged.clear();
        if let Some(chunk) = self.pending_quota_chunk.take() {
            tracing::debug!(track = %self.track, bytes = chunk.len(), "parked chunk discarded by reset");
        }
        self.source_ended = false;
        self.end_reported = false;
        self.remove(Mutation::Reset(range));
    }

    fn restart_after_reset(&mut self) {
        match self.open_source() {
            Ok(()) => {
                let _ = self.events.send(SessionEvent::Restarted {
                    track: self.track,
                    generation: self.generation,
                });
            }
            Err(err) => self.fail(err),
        }
    }

    fn switch_format(
        &mut self,
        format: FormatDescriptor,
        reply: Sender<Result<u64, StreamError>>,
    ) {
        if self.phase.is_terminal() {
            let err = StreamError::SessionClosed { track: self.track };
            let _ = reply.send(Err(err));
            return;
        }
        if self.pending_switch.is_some() {
            let _ = reply.send(Err(StreamError::Busy { track: self.track }));
            return;
        }
        tracing::info!(
            track = %self.track,
            from = %self.format.id,
            to = %format.id,
            generation = self.generation,
            "format switch requested"
        );

        // Cleanup: nothing from the old generation is acted upon past here.
        self.close_source();
        self.generation += 1;
        self.staged.clear();
        self.pending_quota_chunk = None;

        let pending = PendingSwitch { format, reply };
        if self.in_flight.is_some() {
            self.pending_switch = Some(pending);
        } else {
            self.finish_switch(pending);
        }
    }

    fn finish_switch(&mut self, pending: PendingSwitch) {
        let PendingSwitch { format, reply } = pending;
        if let Err(err) = self.sink.change_type(&format) {
            let err = StreamError::SinkFault {
                track: self.track,
                message: err.to_string(),
            };
            self.fail(err.clone());
            let _ = reply.send(Err(err));
            return;
        }
        self.format = format;
        // Derived watermarks are seconds at the old format's bitrate.
        self.derived = None;
        self.source_ended = false;
        self.end_reported = false;
        match self.open_source() {
            Ok(()) => {
                tracing::info!(
                    track = %self.track,
                    format = %self.format.id,
                    generation = self.generation,
                    "format switched"
                );
                let _ = self.events.send(SessionEvent::Switched {
                    track: self.track,
                    generation: self.generation,
                });
                let _ = reply.send(Ok(self.generation));
            }
            Err(err) => {
                self.fail(err.clone());
                let _ = reply.send(Err(err));
            }
        }
    }

    /// Move to `Draining`/`Ended` once the source finished.
    fn settle(&mut self) {
        if !self.source_ended || self.phase.is_terminal() {
            return;
        }
        if self.in_flight.is_some() || !self.staged.is_empty() || self.pending_quota_chunk.is_some() {
            self.phase = SessionPhase::Draining;
            return;
        }
        self.phase = SessionPhase::Ended;
        if !self.end_reported {
            self.end_reported = true;
            tracing::info!(track = %self.track, generation = self.generation, "track ended");
            let _ = self.events.send(SessionEvent::Ended {
                track: self.track,
                generation: self.generation,
            });
        }
    }

    fn fail(&mut self, error: StreamError) {
        if self.phase.is_terminal() {
            return;
        }
        tracing::error!(track = %self.track, generation = self.generation, "session failed: {error}");
        self.close_source();
        self.phase = SessionPhase::Errored;
        self.staged.clear();
        self.pending_quota_chunk = None;
        self.last_error = Some(error.to_string());
        if let Some(pending) = self.pending_switch.take() {
            let _ = pending.reply.send(Err(error.clone()));
        }
        let _ = self.events.send(SessionEvent::Failed {
            track: self.track,
            error,
        });
    }

    fn open_source(&mut self) -> Result<(), StreamError> {
        let events = SourceEvents::new(self.track, self.generation, self.mailbox.clone());
        let mut source = self
            .sources
            .open(self.track, &self.format, events)
            .map_err(|e| StreamError::SourceFault {
                track: self.track,
                message: format!("{e:#}"),
            })?;
        source.resume();
        self.source = Some(source);
        self.paused = false;
        self.source_ended = false;
        self.phase = SessionPhase::Streaming;
        tracing::info!(
            track = %self.track,
            format = %self.format.id,
            generation = self.generation,
            "source attached"
        );
        Ok(())
    }

    fn close_source(&mut self) {
        if let Some(mut source) = self.source.take() {
            source.pause();
            source.close();
        }
        self.paused = true;
    }

    fn pause_source(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.pause();
        }
        self.paused = true;
    }

    /// Returns `true` when a paused source was resumed.
    fn resume_source(&mut self) -> bool {
        if !self.paused {
            return false;
        }
        let Some(source) = self.source.as_mut() else {
            return false;
        };
        source.resume();
        self.paused = false;
        tracing::debug!(track = %self.track, generation = self.generation, "intake resumed");
        true
    }

    fn active_watermarks(&self) -> Watermarks {
        self.derived.unwrap_or(self.watermarks)
    }

    fn publish(&self) {
        let snapshot = BufferSnapshot::from_ranges(&self.sink.buffered());
        let decision = window::evaluate(&snapshot, self.position, &self.active_watermarks());
        let hull = snapshot.hull();
        let Ok(mut s) = self.status.lock() else {
            return;
        };
        s.phase = self.phase;
        s.generation = self.generation;
        s.mime_type = Some(self.format.mime().to_string());
        s.buffered_start = hull.map(|r| r.start);
        s.buffered_end = hull.map(|r| r.end);
        s.fragmented = matches!(snapshot, BufferSnapshot::Fragmented(_));
        s.position = self.position;
        s.forward_buffer = decision.forward_buffer;
        s.behind_buffer = decision.behind_buffer;
        s.paused = self.paused;
        s.source_ended = self.source_ended;
        s.pending_quota_bytes = self.pending_quota_chunk.as_ref().map(Vec::len);
        s.derived_high = self.derived.map(|w| w.high);
        s.derived_low = self.derived.map(|w| w.low);
        s.derived_evict_chunk = self.derived.map(|w| w.evict_chunk);
        s.appended_bytes = self.appended_bytes;
        s.evicted_seconds = self.evicted_seconds;
        s.last_error = self.last_error.clone();
    }
}
