//! Buffer window policy.
//!
//! Given one snapshot of what a sink holds and where playback is, decide
//! whether the source may run and which region, if any, must be removed.
//!
//! The decision is only valid for the snapshot it was computed from. Callers
//! evaluate it while no sink mutation is in flight and re-evaluate after every
//! completed mutation.

use crate::error::StreamError;
use crate::interval::{BufferSnapshot, BufferedInterval};

/// Forward/behind buffer thresholds, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Watermarks {
    /// Forward buffer at which intake stops.
    pub high: f64,
    /// Behind buffer above which the oldest data is evicted.
    pub low: f64,
    /// Length of one trailing eviction.
    pub evict_chunk: f64,
}

impl Watermarks {
    /// Validate `0 < evict_chunk < low < high`.
    pub fn new(high: f64, low: f64, evict_chunk: f64) -> Result<Self, StreamError> {
        let valid = [high, low, evict_chunk].iter().all(|v| v.is_finite())
            && evict_chunk > 0.0
            && evict_chunk < low
            && low < high;
        if !valid {
            return Err(StreamError::InvalidWatermarks {
                high,
                low,
                evict_chunk,
            });
        }
        Ok(Self {
            high,
            low,
            evict_chunk,
        })
    }

    /// Working watermarks inferred from the span a sink held when it first
    /// rejected an append.
    ///
    /// Capacity is unknown until that rejection, so the span is the only
    /// measurement available: `high = span - 1`, `low = high / 4`,
    /// `evict_chunk = low / 4`. Spans of one second or less yield `None`.
    pub fn from_observed_span(span: f64) -> Option<Self> {
        if !span.is_finite() || span <= 1.0 {
            return None;
        }
        let high = span - 1.0;
        let low = high / 4.0;
        let evict_chunk = low / 4.0;
        Some(Self {
            high,
            low,
            evict_chunk,
        })
    }
}

/// What to remove from the sink, if anything.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Eviction {
    /// Nothing to remove.
    Keep,
    /// Remove the oldest `evict_chunk` seconds.
    Trailing(BufferedInterval),
    /// The buffer is stale relative to the position: remove all of it and
    /// restart the source.
    Reset(BufferedInterval),
}

/// Output of one policy evaluation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WindowDecision {
    pub forward_buffer: f64,
    pub behind_buffer: f64,
    pub ahead_of_buffer: bool,
    pub should_resume: bool,
    pub eviction: Eviction,
}

/// Evaluate the window policy against a single snapshot.
pub fn evaluate(snapshot: &BufferSnapshot, position: f64, watermarks: &Watermarks) -> WindowDecision {
    match snapshot {
        BufferSnapshot::Empty => WindowDecision {
            forward_buffer: 0.0,
            behind_buffer: 0.0,
            ahead_of_buffer: false,
            should_resume: 0.0 < watermarks.high,
            eviction: Eviction::Keep,
        },
        BufferSnapshot::Contiguous(interval) => evaluate_interval(interval, position, watermarks),
        BufferSnapshot::Fragmented(_) => {
            // Disjoint ranges are not modelled; reset over their hull.
            let Some(hull) = snapshot.hull() else {
                return evaluate(&BufferSnapshot::Empty, position, watermarks);
            };
            let base = evaluate_interval(&hull, position, watermarks);
            WindowDecision {
                ahead_of_buffer: true,
                eviction: Eviction::Reset(hull),
                ..base
            }
        }
    }
}

fn evaluate_interval(
    interval: &BufferedInterval,
    position: f64,
    watermarks: &Watermarks,
) -> WindowDecision {
    let past_end = position > interval.end;
    let forward_buffer = if past_end {
        0.0
    } else {
        (interval.end - position).max(0.0)
    };
    let behind_buffer = if past_end {
        interval.len()
    } else {
        (position - interval.start).max(0.0)
    };
    let ahead_of_buffer = interval.start > position;
    let should_resume = forward_buffer < watermarks.high;

    let eviction = if ahead_of_buffer {
        Eviction::Reset(*interval)
    } else if behind_buffer > watermarks.low {
        let end = (interval.start + watermarks.evict_chunk).min(interval.end);
        Eviction::Trailing(BufferedInterval {
            start: interval.start,
            end,
        })
    } else {
        Eviction::Keep
    };

    WindowDecision {
        forward_buffer,
        behind_buffer,
        ahead_of_buffer,
        should_resume,
        eviction,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wm() -> Watermarks {
        Watermarks::new(60.0, 30.0, 15.0).unwrap()
    }

    fn contiguous(start: f64, end: f64) -> BufferSnapshot {
        BufferSnapshot::Contiguous(BufferedInterval::new(start, end).unwrap())
    }

    #[test]
    fn mid_buffer_position_resumes_without_evicting() {
        let d = evaluate(&contiguous(10.0, 40.0), 25.0, &wm());
        assert_eq!(d.forward_buffer, 15.0);
        assert_eq!(d.behind_buffer, 15.0);
        assert!(d.should_resume);
        assert_eq!(d.eviction, Eviction::Keep);
        assert!(!d.ahead_of_buffer);
    }

    #[test]
    fn full_forward_buffer_holds_source_back() {
        let d = evaluate(&contiguous(0.0, 70.0), 5.0, &wm());
        assert_eq!(d.forward_buffer, 65.0);
        assert!(!d.should_resume);
        assert_eq!(d.behind_buffer, 5.0);
        assert_eq!(d.eviction, Eviction::Keep);
    }

    #[test]
    fn seek_before_buffer_start_resets_whole_interval() {
        let d = evaluate(&contiguous(50.0, 90.0), 10.0, &wm());
        assert!(d.ahead_of_buffer);
        assert_eq!(
            d.eviction,
            Eviction::Reset(BufferedInterval { start: 50.0, end: 90.0 })
        );
    }

    #[test]
    fn position_past_end_counts_whole_interval_behind() {
        let d = evaluate(&contiguous(0.0, 40.0), 100.0, &wm());
        assert_eq!(d.forward_buffer, 0.0);
        assert_eq!(d.behind_buffer, 40.0);
        assert!(d.should_resume);
        assert_eq!(
            d.eviction,
            Eviction::Trailing(BufferedInterval { start: 0.0, end: 15.0 })
        );
    }

    #[test]
    fn empty_buffer_resumes() {
        let d = evaluate(&BufferSnapshot::Empty, 42.0, &wm());
        assert!(d.should_resume);
        assert_eq!(d.eviction, Eviction::Keep);
        assert_eq!(d.forward_buffer, 0.0);
    }

    #[test]
    fn fragmented_buffer_resets_hull() {
        let snap = BufferSnapshot::from_ranges(&[
            BufferedInterval { start: 0.0, end: 10.0 },
            BufferedInterval { start: 20.0, end: 35.0 },
        ]);
        let d = evaluate(&snap, 5.0, &wm());
        assert!(d.ahead_of_buffer);
        assert_eq!(
            d.eviction,
            Eviction::Reset(BufferedInterval { start: 0.0, end: 35.0 })
        );
    }

    #[test]
    fn touching_ranges_are_one_window() {
        let snap = BufferSnapshot::from_ranges(&[
            BufferedInterval { start: 0.0, end: 10.0 },
            BufferedInterval { start: 10.0, end: 20.0 },
        ]);
        let d = evaluate(&snap, 5.0, &wm());
        assert_eq!(d.eviction, Eviction::Keep);
        assert_eq!(d.forward_buffer, 15.0);
        assert!(!d.ahead_of_buffer);
    }

    #[test]
    fn resume_flips_exactly_at_high_watermark() {
        let w = wm();
        for forward in [0.0, 1.0, 30.0, 59.5, 59.75, 60.0, 60.25, 75.0, 500.0] {
            let d = evaluate(&contiguous(0.0, 1000.0), 1000.0 - forward, &w);
            assert_eq!(d.forward_buffer, forward);
            assert_eq!(d.should_resume, forward < w.high, "forward={forward}");
        }
    }

    #[test]
    fn eviction_range_never_exceeds_interval_end() {
        let w = wm();
        for (start, end, position) in [
            (0.0, 31.0, 30.5),
            (0.0, 40.0, 35.0),
            (10.0, 45.0, 44.0),
            (100.0, 500.0, 200.0),
        ] {
            let d = evaluate(&contiguous(start, end), position, &w);
            let Eviction::Trailing(range) = d.eviction else {
                panic!("expected trailing eviction for [{start},{end}] @ {position}");
            };
            assert_eq!(range.start, start);
            assert!(range.end <= end);
            assert!(range.end <= start + w.evict_chunk);
        }
    }

    #[test]
    fn evaluation_is_idempotent() {
        let snap = contiguous(3.0, 120.0);
        let first = evaluate(&snap, 48.0, &wm());
        let second = evaluate(&snap, 48.0, &wm());
        assert_eq!(first, second);
    }

    #[test]
    fn derived_watermarks_follow_observed_span() {
        let w = Watermarks::from_observed_span(40.0).unwrap();
        assert_eq!(w.high, 39.0);
        assert_eq!(w.low, 9.75);
        assert_eq!(w.evict_chunk, 2.4375);
        assert!(Watermarks::new(w.high, w.low, w.evict_chunk).is_ok());
        assert!(Watermarks::from_observed_span(1.0).is_none());
        assert!(Watermarks::from_observed_span(f64::NAN).is_none());
    }

    #[test]
    fn watermark_validation() {
        assert!(Watermarks::new(60.0, 30.0, 15.0).is_ok());
        assert!(Watermarks::new(60.0, 30.0, 30.0).is_err());
        assert!(Watermarks::new(30.0, 30.0, 15.0).is_err());
        assert!(Watermarks::new(60.0, 30.0, 0.0).is_err());
        assert!(Watermarks::new(f64::INFINITY, 30.0, 15.0).is_err());
    }
}
