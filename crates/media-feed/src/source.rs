//! Byte sources feeding a session.
//!
//! A source pushes chunks into its session's mailbox through [`SourceEvents`]
//! and is flow-controlled with `pause`/`resume`. Sources are opened paused;
//! the session resumes them when the buffer window allows.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::Sender;

use crate::format::FormatDescriptor;
use crate::session::SessionMessage;
use media_feed_types::TrackKind;

/// Event emitted by a source.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Data(Vec<u8>),
    End,
    Error(String),
}

/// Generation-stamped event channel handed to a source when it is opened.
///
/// Terminal events (`end`/`error`) are delivered at most once, and nothing is
/// delivered after one of them.
#[derive(Clone, Debug)]
pub struct SourceEvents {
    track: TrackKind,
    generation: u64,
    tx: Sender<SessionMessage>,
    finished: Arc<AtomicBool>,
}

impl SourceEvents {
    pub(crate) fn new(track: TrackKind, generation: u64, tx: Sender<SessionMessage>) -> Self {
        Self {
            track,
            generation,
            tx,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn track(&self) -> TrackKind {
        self.track
    }

    /// Session generation this source belongs to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether a terminal event was already delivered.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Deliver a chunk. Returns `false` once the session is gone or the source finished.
    pub fn data(&self, chunk: Vec<u8>) -> bool {
        if self.is_finished() {
            return false;
        }
        self.send(SourceEvent::Data(chunk))
    }

    /// Signal the end of the stream.
    pub fn end(&self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            self.send(SourceEvent::End);
        }
    }

    /// Signal a source failure.
    pub fn error(&self, message: impl Into<String>) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            self.send(SourceEvent::Error(message.into()));
        }
    }

    fn send(&self, event: SourceEvent) -> bool {
        self.tx
            .send(SessionMessage::Source {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A pausable, push-based byte producer.
pub trait ByteSource: Send {
    /// Stop delivering chunks until `resume`.
    fn pause(&mut self);
    /// Continue delivering chunks.
    fn resume(&mut self);
    /// Stop for good and release resources. Idempotent.
    fn close(&mut self);
}

/// Opens a fresh source for a track in a given format.
///
/// Sources cannot seek; every restart opens a new one.
pub trait SourceFactory: Send + Sync {
    fn open(
        &self,
        track: TrackKind,
        format: &FormatDescriptor,
        events: SourceEvents,
    ) -> anyhow::Result<Box<dyn ByteSource>>;
}

#[derive(Debug)]
struct PumpState {
    paused: bool,
    closed: bool,
}

type PumpControl = Arc<(Mutex<PumpState>, Condvar)>;

/// Adapts any blocking reader into a [`ByteSource`] driven by a pump thread.
///
/// Delivering a chunk leaves the pump paused, so at most one chunk is in
/// flight until the session resumes it.
pub struct ReaderSource {
    control: PumpControl,
}

impl ReaderSource {
    /// Spawn the pump thread. The source starts paused.
    pub fn spawn<R>(reader: R, chunk_bytes: usize, events: SourceEvents) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let control: PumpControl = Arc::new((
            Mutex::new(PumpState {
                paused: true,
                closed: false,
            }),
            Condvar::new(),
        ));
        let control_for_thread = control.clone();
        thread::Builder::new()
            .name(format!("feed-source-{}", events.track()))
            .spawn(move || pump(reader, chunk_bytes.max(1), control_for_thread, events))?;
        Ok(Self { control })
    }

    fn update(&self, f: impl FnOnce(&mut PumpState)) {
        let (lock, cv) = &*self.control;
        let mut g = lock.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut g);
        drop(g);
        cv.notify_all();
    }
}

impl ByteSource for ReaderSource {
    fn pause(&mut self) {
        self.update(|s| s.paused = true);
    }

    fn resume(&mut self) {
        self.update(|s| s.paused = false);
    }

    fn close(&mut self) {
        self.update(|s| s.closed = true);
    }
}

impl Drop for ReaderSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Block while paused. Returns `false` once closed.
fn wait_until_running(control: &PumpControl) -> bool {
    let (lock, cv) = &**control;
    let mut g = lock.lock().unwrap_or_else(|e| e.into_inner());
    while g.paused && !g.closed {
        g = cv.wait(g).unwrap_or_else(|e| e.into_inner());
    }
    !g.closed
}

/// Mark paused after a delivery. Returns `false` once closed.
fn pause_after_delivery(control: &PumpControl) -> bool {
    let (lock, _) = &**control;
    let mut g = lock.lock().unwrap_or_else(|e| e.into_inner());
    g.paused = true;
    !g.closed
}

fn is_closed(control: &PumpControl) -> bool {
    let (lock, _) = &**control;
    lock.lock().unwrap_or_else(|e| e.into_inner()).closed
}

fn pump<R: Read>(mut reader: R, chunk_bytes: usize, control: PumpControl, events: SourceEvents) {
    let mut buf = vec![0u8; chunk_bytes];
    loop {
        if !wait_until_running(&control) {
            tracing::debug!(track = %events.track(), "source pump closed");
            return;
        }
        match reader.read(&mut buf) {
            Ok(0) => {
                if !is_closed(&control) {
                    events.end();
                }
                return;
            }
            Ok(n) => {
                if !pause_after_delivery(&control) {
                    return;
                }
                if !events.data(buf[..n].to_vec()) {
                    return;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if !is_closed(&control) {
                    tracing::warn!(track = %events.track(), "source read failed: {e}");
                    events.error(e.to_string());
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::time::Duration;

    fn recv_event(rx: &crossbeam_channel::Receiver<SessionMessage>) -> Option<SourceEvent> {
        match rx.recv_timeout(Duration::from_secs(2)).ok()? {
            SessionMessage::Source { event, .. } => Some(event),
            _ => None,
        }
    }

    #[test]
    fn events_deliver_at_most_one_terminal() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let events = SourceEvents::new(TrackKind::Audio, 3, tx);
        assert!(events.data(vec![1, 2]));
        events.end();
        events.error("late");
        assert!(!events.data(vec![3]));

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(got.len(), 2);
        assert!(matches!(
            &got[1],
            SessionMessage::Source { generation: 3, event: SourceEvent::End }
        ));
    }

    #[test]
    fn reader_source_pauses_after_each_chunk() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let events = SourceEvents::new(TrackKind::Video, 0, tx);
        let mut source = ReaderSource::spawn(Cursor::new(vec![7u8; 10]), 4, events).unwrap();

        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        source.resume();
        assert_eq!(recv_event(&rx), Some(SourceEvent::Data(vec![7; 4])));
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        source.resume();
        assert_eq!(recv_event(&rx), Some(SourceEvent::Data(vec![7; 4])));
        source.resume();
        assert_eq!(recv_event(&rx), Some(SourceEvent::Data(vec![7; 2])));
        source.resume();
        assert_eq!(recv_event(&rx), Some(SourceEvent::End));
    }

    #[test]
    fn closed_reader_source_emits_nothing() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let events = SourceEvents::new(TrackKind::Video, 0, tx);
        let mut source = ReaderSource::spawn(Cursor::new(vec![1u8; 8]), 4, events).unwrap();
        source.close();
        source.resume();
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    struct FailingReader;

    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    #[test]
    fn read_error_becomes_error_event() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let events = SourceEvents::new(TrackKind::Audio, 1, tx);
        let mut source = ReaderSource::spawn(FailingReader, 4, events).unwrap();
        source.resume();
        assert_eq!(recv_event(&rx), Some(SourceEvent::Error("reset".to_string())));
    }
}
