//! Append-only media sinks.
//!
//! A sink accepts chunks, removes time ranges, and reports what it holds.
//! Every accepted `append`/`remove` fires exactly one completion through its
//! [`MutationNotifier`]; the owning session never issues a second mutation
//! before that completion arrives.
//!
//! `change_type` is the third mutating call. It completes synchronously and
//! fires no completion; the session only issues it while no `append` or
//! `remove` is in flight, so it shares the same single slot.

use std::collections::VecDeque;

use crossbeam_channel::Sender;

use crate::error::SinkError;
use crate::format::FormatDescriptor;
use crate::interval::BufferedInterval;
use crate::session::SessionMessage;
use media_feed_types::TrackKind;

/// Completion channel handed to a sink when it is created.
#[derive(Clone, Debug)]
pub struct MutationNotifier {
    tx: Sender<SessionMessage>,
}

impl MutationNotifier {
    pub(crate) fn new(tx: Sender<SessionMessage>) -> Self {
        Self { tx }
    }

    /// The last accepted mutation finished.
    pub fn complete(&self) {
        let _ = self.tx.send(SessionMessage::MutationComplete);
    }

    /// The last accepted mutation failed after being accepted.
    pub fn fail(&self, message: impl Into<String>) {
        let _ = self.tx.send(SessionMessage::MutationFailed(message.into()));
    }
}

/// Platform buffer a session appends into.
pub trait MediaSink: Send {
    /// Queue a chunk. `CapacityExceeded` means nothing was stored.
    fn append(&mut self, chunk: &[u8]) -> Result<(), SinkError>;
    /// Remove media in `[start, end]` seconds.
    fn remove(&mut self, start: f64, end: f64) -> Result<(), SinkError>;
    /// Switch the declared content type for subsequent appends.
    ///
    /// Done when it returns. Never called with a mutation in flight.
    fn change_type(&mut self, format: &FormatDescriptor) -> Result<(), SinkError>;
    /// Currently resident ranges, in time order.
    fn buffered(&self) -> Vec<BufferedInterval>;
    /// Whether the last mutation is still being processed.
    fn is_busy(&self) -> bool;
}

/// Creates the sink for a track once the container is writable.
pub trait SinkFactory: Send + Sync {
    fn create(
        &self,
        track: TrackKind,
        format: &FormatDescriptor,
        notifier: MutationNotifier,
    ) -> anyhow::Result<Box<dyn MediaSink>>;
}

#[derive(Clone, Copy, Debug)]
struct Segment {
    start: f64,
    end: f64,
    bytes: usize,
}

impl Segment {
    fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// In-memory sink with a hard byte quota.
///
/// Media time is derived from byte counts at a fixed rate. Appends continue
/// from the end of the resident data; once everything is removed the
/// timeline restarts at zero, matching a freshly opened source.
pub struct MemorySink {
    capacity_bytes: usize,
    bytes_per_second: f64,
    mime_type: String,
    segments: VecDeque<Segment>,
    cursor: f64,
    notifier: MutationNotifier,
}

impl MemorySink {
    pub fn new(
        capacity_bytes: usize,
        bytes_per_second: f64,
        mime_type: impl Into<String>,
        notifier: MutationNotifier,
    ) -> Self {
        Self {
            capacity_bytes,
            bytes_per_second: sanitize_rate(bytes_per_second),
            mime_type: mime_type.into(),
            segments: VecDeque::new(),
            cursor: 0.0,
            notifier,
        }
    }

    /// Bytes currently held.
    pub fn resident_bytes(&self) -> usize {
        self.segments.iter().map(|s| s.bytes).sum()
    }

}

fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        1.0
    }
}

impl MediaSink for MemorySink {
    fn append(&mut self, chunk: &[u8]) -> Result<(), SinkError> {
        if self.resident_bytes().saturating_add(chunk.len()) > self.capacity_bytes {
            return Err(SinkError::CapacityExceeded);
        }
        if !chunk.is_empty() {
            let start = self.cursor;
            let end = start + chunk.len() as f64 / self.bytes_per_second;
            self.segments.push_back(Segment {
                start,
                end,
                bytes: chunk.len(),
            });
            self.cursor = end;
        }
        self.notifier.complete();
        Ok(())
    }

    fn remove(&mut self, start: f64, end: f64) -> Result<(), SinkError> {
        if !(start.is_finite() && end.is_finite()) || start > end {
            return Err(SinkError::Fault(format!("invalid remove range {start}..{end}")));
        }
        let mut kept = VecDeque::with_capacity(self.segments.len() + 1);
        for seg in self.segments.drain(..) {
            if seg.end <= start || seg.start >= end {
                kept.push_back(seg);
                continue;
            }
            let per_second = seg.bytes as f64 / seg.duration().max(f64::EPSILON);
            if seg.start < start {
                let head = Segment {
                    start: seg.start,
                    end: start,
                    bytes: ((start - seg.start) * per_second).round() as usize,
                };
                kept.push_back(head);
            }
            if seg.end > end {
                let tail = Segment {
                    start: end,
                    end: seg.end,
                    bytes: ((seg.end - end) * per_second).round() as usize,
                };
                kept.push_back(tail);
            }
        }
        self.segments = kept;
        if self.segments.is_empty() {
            self.cursor = 0.0;
        }
        self.notifier.complete();
        Ok(())
    }

    fn change_type(&mut self, format: &FormatDescriptor) -> Result<(), SinkError> {
        tracing::debug!(from = %self.mime_type, to = format.mime(), "sink type changed");
        self.mime_type = format.mime().to_string();
        if let Some(rate) = format.bytes_per_second() {
            self.bytes_per_second = sanitize_rate(rate);
        }
        Ok(())
    }

    fn buffered(&self) -> Vec<BufferedInterval> {
        let mut out: Vec<BufferedInterval> = Vec::new();
        for seg in &self.segments {
            match out.last_mut() {
                Some(last) if (seg.start - last.end).abs() < 1e-9 => last.end = seg.end,
                _ => out.push(BufferedInterval {
                    start: seg.start,
                    end: seg.end,
                }),
            }
        }
        out
    }

    fn is_busy(&self) -> bool {
        // Completions are queued before the mutating call returns.
        false
    }
}

/// Builds [`MemorySink`]s sized by a shared byte quota.
#[derive(Clone, Debug)]
pub struct MemorySinkFactory {
    /// Quota per sink.
    pub capacity_bytes: usize,
    /// Rate used when a format carries no bitrate.
    pub fallback_bytes_per_second: f64,
}

impl SinkFactory for MemorySinkFactory {
    fn create(
        &self,
        track: TrackKind,
        format: &FormatDescriptor,
        notifier: MutationNotifier,
    ) -> anyhow::Result<Box<dyn MediaSink>> {
        let rate = format
            .bytes_per_second()
            .unwrap_or(self.fallback_bytes_per_second);
        tracing::debug!(
            track = %track,
            capacity_bytes = self.capacity_bytes,
            bytes_per_second = rate,
            "memory sink created"
        );
        Ok(Box::new(MemorySink::new(
            self.capacity_bytes,
            rate,
            format.mime(),
            notifier,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sink(capacity: usize, rate: f64) -> (MemorySink, crossbeam_channel::Receiver<SessionMessage>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (MemorySink::new(capacity, rate, "video/mp4", MutationNotifier::new(tx)), rx)
    }

    fn completions(rx: &crossbeam_channel::Receiver<SessionMessage>) -> usize {
        rx.try_iter()
            .filter(|m| matches!(m, SessionMessage::MutationComplete))
            .count()
    }

    #[test]
    fn appends_extend_one_interval() {
        let (mut s, rx) = sink(1000, 10.0);
        s.append(&[0; 100]).unwrap();
        s.append(&[0; 50]).unwrap();
        assert_eq!(s.buffered(), vec![BufferedInterval { start: 0.0, end: 15.0 }]);
        assert_eq!(s.resident_bytes(), 150);
        assert_eq!(completions(&rx), 2);
    }

    #[test]
    fn append_over_quota_is_rejected_without_completion() {
        let (mut s, rx) = sink(100, 10.0);
        s.append(&[0; 80]).unwrap();
        assert_eq!(s.append(&[0; 30]), Err(SinkError::CapacityExceeded));
        assert_eq!(s.resident_bytes(), 80);
        assert_eq!(completions(&rx), 1);
    }

    #[test]
    fn trailing_remove_trims_front() {
        let (mut s, _rx) = sink(1000, 10.0);
        s.append(&[0; 400]).unwrap();
        s.remove(0.0, 15.0).unwrap();
        assert_eq!(s.buffered(), vec![BufferedInterval { start: 15.0, end: 40.0 }]);
        assert_eq!(s.resident_bytes(), 250);
    }

    #[test]
    fn middle_remove_fragments_the_buffer() {
        let (mut s, _rx) = sink(1000, 10.0);
        s.append(&[0; 300]).unwrap();
        s.remove(10.0, 20.0).unwrap();
        assert_eq!(
            s.buffered(),
            vec![
                BufferedInterval { start: 0.0, end: 10.0 },
                BufferedInterval { start: 20.0, end: 30.0 },
            ]
        );
    }

    #[test]
    fn full_remove_restarts_timeline() {
        let (mut s, _rx) = sink(1000, 10.0);
        s.append(&[0; 100]).unwrap();
        s.remove(0.0, 10.0).unwrap();
        assert!(s.buffered().is_empty());
        s.append(&[0; 20]).unwrap();
        assert_eq!(s.buffered(), vec![BufferedInterval { start: 0.0, end: 2.0 }]);
    }

    #[test]
    fn change_type_updates_rate_without_completion() {
        let (mut s, rx) = sink(1000, 10.0);
        let format = FormatDescriptor {
            id: "140".to_string(),
            mime_type: Some("audio/mp4".to_string()),
            bitrate_kbps: Some(8),
            ..FormatDescriptor::default()
        };
        s.change_type(&format).unwrap();
        assert_eq!(s.mime_type, "audio/mp4");
        assert!(rx.try_recv().is_err());
        s.append(&[0; 1000]).unwrap();
        assert_eq!(s.buffered(), vec![BufferedInterval { start: 0.0, end: 1.0 }]);
    }

    #[test]
    fn inverted_remove_is_a_fault() {
        let (mut s, _rx) = sink(1000, 10.0);
        assert!(matches!(s.remove(5.0, 1.0), Err(SinkError::Fault(_))));
    }
}
