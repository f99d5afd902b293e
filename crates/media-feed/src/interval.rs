//! Buffered time ranges as reported by a sink.

/// A contiguous span of decodable media, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BufferedInterval {
    pub start: f64,
    pub end: f64,
}

impl BufferedInterval {
    /// Build an interval, returning `None` for inverted or non-finite bounds.
    pub fn new(start: f64, end: f64) -> Option<Self> {
        if start.is_finite() && end.is_finite() && start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Length of the span in seconds.
    pub fn len(&self) -> f64 {
        self.end - self.start
    }

    /// `true` for a degenerate zero-length span.
    pub fn is_empty(&self) -> bool {
        self.len() <= 0.0
    }
}

/// What a sink holds at one instant.
///
/// Ranges that touch or overlap are merged first. Only a single contiguous
/// interval is reasoned about; disjoint ranges are reported as `Fragmented`
/// so the policy can reset them.
#[derive(Clone, Debug, PartialEq)]
pub enum BufferSnapshot {
    Empty,
    Contiguous(BufferedInterval),
    Fragmented(Vec<BufferedInterval>),
}

impl BufferSnapshot {
    /// Classify the ranges a sink reports. Degenerate ranges are ignored.
    pub fn from_ranges(ranges: &[BufferedInterval]) -> Self {
        let mut live: Vec<BufferedInterval> =
            ranges.iter().copied().filter(|r| !r.is_empty()).collect();
        live.sort_by(|a, b| a.start.total_cmp(&b.start));

        let mut merged: Vec<BufferedInterval> = Vec::with_capacity(live.len());
        for range in live {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }
        match merged.len() {
            0 => BufferSnapshot::Empty,
            1 => BufferSnapshot::Contiguous(merged[0]),
            _ => BufferSnapshot::Fragmented(merged),
        }
    }

    /// Smallest interval covering everything resident.
    pub fn hull(&self) -> Option<BufferedInterval> {
        match self {
            BufferSnapshot::Empty => None,
            BufferSnapshot::Contiguous(range) => Some(*range),
            BufferSnapshot::Fragmented(ranges) => {
                let start = ranges.iter().map(|r| r.start).fold(f64::INFINITY, f64::min);
                let end = ranges.iter().map(|r| r.end).fold(f64::NEG_INFINITY, f64::max);
                BufferedInterval::new(start, end)
            }
        }
    }

    /// Total seconds resident.
    pub fn span(&self) -> f64 {
        match self {
            BufferSnapshot::Empty => 0.0,
            BufferSnapshot::Contiguous(range) => range.len(),
            BufferSnapshot::Fragmented(ranges) => ranges.iter().map(BufferedInterval::len).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: f64, end: f64) -> BufferedInterval {
        BufferedInterval::new(start, end).unwrap()
    }

    #[test]
    fn new_rejects_inverted_and_nan() {
        assert!(BufferedInterval::new(5.0, 1.0).is_none());
        assert!(BufferedInterval::new(f64::NAN, 1.0).is_none());
        assert!(BufferedInterval::new(1.0, 1.0).is_some());
    }

    #[test]
    fn snapshot_classifies_ranges() {
        assert_eq!(BufferSnapshot::from_ranges(&[]), BufferSnapshot::Empty);
        assert_eq!(
            BufferSnapshot::from_ranges(&[iv(2.0, 2.0)]),
            BufferSnapshot::Empty
        );
        assert_eq!(
            BufferSnapshot::from_ranges(&[iv(0.0, 10.0)]),
            BufferSnapshot::Contiguous(iv(0.0, 10.0))
        );
        let fragmented = BufferSnapshot::from_ranges(&[iv(20.0, 30.0), iv(0.0, 10.0)]);
        assert_eq!(
            fragmented,
            BufferSnapshot::Fragmented(vec![iv(0.0, 10.0), iv(20.0, 30.0)])
        );
    }

    #[test]
    fn touching_and_overlapping_ranges_merge() {
        assert_eq!(
            BufferSnapshot::from_ranges(&[iv(10.0, 20.0), iv(0.0, 10.0)]),
            BufferSnapshot::Contiguous(iv(0.0, 20.0))
        );
        assert_eq!(
            BufferSnapshot::from_ranges(&[iv(0.0, 12.0), iv(5.0, 8.0), iv(11.0, 20.0), iv(30.0, 40.0)]),
            BufferSnapshot::Fragmented(vec![iv(0.0, 20.0), iv(30.0, 40.0)])
        );
    }

    #[test]
    fn hull_and_span_of_fragmented_snapshot() {
        let snap = BufferSnapshot::from_ranges(&[iv(0.0, 10.0), iv(20.0, 30.0)]);
        assert_eq!(snap.hull(), Some(iv(0.0, 30.0)));
        assert_eq!(snap.span(), 20.0);
        assert_eq!(BufferSnapshot::Empty.hull(), None);
    }
}
