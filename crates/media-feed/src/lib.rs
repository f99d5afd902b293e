//! Adaptive media feed.
//!
//! Streams bytes from pausable sources into capacity-limited sinks, one
//! session per track, keeping a bounded window of media around the playback
//! position.

pub mod clock;
pub mod config;
pub mod error;
pub mod format;
pub mod interval;
pub mod manager;
pub mod sink;
pub mod source;
pub mod window;

mod session;
mod status;

pub use clock::{ManualClock, PlaybackClock};
pub use config::BufferConfig;
pub use error::{SinkError, StreamError};
pub use format::{FormatCatalog, FormatDescriptor, MediaDescription, PlaybackPlan};
pub use interval::{BufferSnapshot, BufferedInterval};
pub use manager::{BufferManager, FeedContext, LoggingObserver, PlaybackObserver};
pub use sink::{MediaSink, MemorySink, MemorySinkFactory, MutationNotifier, SinkFactory};
pub use source::{ByteSource, ReaderSource, SourceEvent, SourceEvents, SourceFactory};
pub use window::{Eviction, Watermarks, WindowDecision};

pub use media_feed_types::{EndReason, FeedStatus, SessionPhase, TrackKind, TrackStatus};
