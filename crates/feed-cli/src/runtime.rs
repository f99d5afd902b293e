//! Feed runtime: format listing and the simulated playback loop.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, Sender};
use media_feed::{
    BufferConfig, BufferManager, FeedContext, FeedStatus, FormatDescriptor, ManualClock,
    MemorySinkFactory, PlaybackClock, PlaybackObserver, PlaybackPlan, StreamError, TrackKind,
};

use crate::cli::RunArgs;
use crate::config::load_manifest;
use crate::http_source::HttpSourceFactory;

const PLAYBACK_STEP: Duration = Duration::from_millis(100);

/// Print the playable formats of a manifest, per track.
pub fn run_formats(manifest: &Path) -> Result<()> {
    let media = load_manifest(manifest)?;
    let plan = PlaybackPlan::select(&media)?;
    if let Some(title) = media.title.as_deref() {
        println!("{title}");
    }
    for track in [TrackKind::Video, TrackKind::Audio] {
        for (idx, format) in plan.catalog.for_track(track).iter().enumerate() {
            println!("{track} {idx}: {} [{}]", format.label(track), format.id);
        }
    }
    Ok(())
}

#[derive(Debug)]
enum FeedOutcome {
    Ended,
    Failed(TrackKind, StreamError),
}

struct ChannelObserver {
    tx: Sender<FeedOutcome>,
}

impl PlaybackObserver for ChannelObserver {
    fn end_of_stream(&self) {
        let _ = self.tx.send(FeedOutcome::Ended);
    }

    fn fatal(&self, track: TrackKind, error: &StreamError) {
        let _ = self.tx.send(FeedOutcome::Failed(track, error.clone()));
    }
}

fn format_at(plan: &PlaybackPlan, track: TrackKind, idx: usize) -> Result<FormatDescriptor> {
    plan.format_at(track, idx)
        .cloned()
        .ok_or_else(|| anyhow!("no {track} format at index {idx}"))
}

/// Pick the formats to stream: the plan's defaults unless an index is given.
fn choose_tracks(plan: &PlaybackPlan, args: &RunArgs) -> Result<Vec<(TrackKind, FormatDescriptor)>> {
    let mut tracks = plan.tracks();
    for (track, index) in [(TrackKind::Video, args.video), (TrackKind::Audio, args.audio)] {
        let Some(idx) = index else {
            continue;
        };
        let format = format_at(plan, track, idx)?;
        if let Some(entry) = tracks.iter_mut().find(|(kind, _)| *kind == track) {
            entry.1 = format;
        }
    }
    Ok(tracks)
}

/// Formats requested by `--switch-video`/`--switch-audio`.
fn switch_targets(plan: &PlaybackPlan, args: &RunArgs) -> Result<Vec<(TrackKind, FormatDescriptor)>> {
    let mut targets = Vec::new();
    for (track, index) in [
        (TrackKind::Video, args.switch_video),
        (TrackKind::Audio, args.switch_audio),
    ] {
        if let Some(idx) = index {
            targets.push((track, format_at(plan, track, idx)?));
        }
    }
    Ok(targets)
}

/// Seconds the simulated player may advance: playback stalls as soon as
/// any track has nothing buffered ahead.
fn playable_ahead(status: &FeedStatus) -> f64 {
    status
        .tracks
        .iter()
        .map(|t| t.forward_buffer)
        .fold(f64::INFINITY, f64::min)
        .max(0.0)
}

/// Stream a manifest until every track has been played out, a track fails,
/// or Ctrl-C.
pub fn run_stream(args: RunArgs, config: BufferConfig) -> Result<()> {
    let media = load_manifest(&args.manifest)?;
    let plan = PlaybackPlan::select(&media)?;
    let tracks = choose_tracks(&plan, &args)?;
    let switches = switch_targets(&plan, &args)?;

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        let _ = ctrlc::set_handler(move || stop.store(true, Ordering::Relaxed));
    }

    let clock = ManualClock::new(0.0);
    let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
    let ctx = FeedContext {
        sources: Arc::new(HttpSourceFactory::new(config.source_chunk_bytes())),
        sinks: Arc::new(MemorySinkFactory {
            capacity_bytes: args.capacity_bytes,
            fallback_bytes_per_second: args.fallback_kbps as f64 * 1000.0 / 8.0,
        }),
        clock: Arc::new(clock.clone()),
        observer: Arc::new(ChannelObserver { tx: outcome_tx }),
    };
    let manager = BufferManager::new(config, tracks, ctx).context("create buffer manager")?;
    manager.sink_opened().context("start sessions")?;

    let result = drive(&manager, &clock, &args, &switches, &outcome_rx, &stop);
    manager.shutdown();
    println!("{}", serde_json::to_string(&manager.status())?);
    result
}

fn drive(
    manager: &BufferManager,
    clock: &ManualClock,
    args: &RunArgs,
    switches: &[(TrackKind, FormatDescriptor)],
    outcomes: &Receiver<FeedOutcome>,
    stop: &AtomicBool,
) -> Result<()> {
    let ticker = crossbeam_channel::tick(PLAYBACK_STEP);
    let status_every = Duration::from_millis(args.status_interval_ms.max(1));
    let mut since_status = Duration::ZERO;
    let mut ended = false;
    let mut switched = false;
    let mut seeked = false;

    loop {
        crossbeam_channel::select! {
            recv(outcomes) -> outcome => match outcome {
                Ok(FeedOutcome::Ended) => {
                    tracing::info!(position = clock.position(), "all sources ended, playing out buffers");
                    ended = true;
                }
                Ok(FeedOutcome::Failed(track, err)) => {
                    return Err(anyhow::Error::new(err).context(format!("{track} track failed")));
                }
                Err(_) => return Ok(()),
            },
            recv(ticker) -> _ => {
                if stop.load(Ordering::Relaxed) {
                    tracing::info!("interrupted");
                    return Ok(());
                }

                let status = manager.status();
                let ahead = playable_ahead(&status);
                let step = PLAYBACK_STEP.as_secs_f64() * args.speed;
                if ahead > 0.0 {
                    let position = clock.advance(step.min(ahead));
                    manager.notify_position(position);
                } else if ended {
                    tracing::info!(position = clock.position(), "playback complete");
                    return Ok(());
                } else {
                    tracing::debug!(position = clock.position(), "stalled");
                }

                let position = clock.position();
                if !switched && position >= args.switch_at {
                    switched = true;
                    switch_formats(manager, switches)?;
                }
                if !seeked && position >= args.seek_at {
                    if let Some(target) = args.seek_to {
                        seeked = true;
                        clock.set(target);
                        manager.notify_seek(clock.position());
                    }
                }

                since_status += PLAYBACK_STEP;
                if since_status >= status_every {
                    since_status = Duration::ZERO;
                    println!("{}", serde_json::to_string(&status)?);
                }
            },
        }
    }
}

fn switch_formats(manager: &BufferManager, switches: &[(TrackKind, FormatDescriptor)]) -> Result<()> {
    for (track, format) in switches {
        let track = *track;
        match manager.switch_format(track, format.clone()) {
            Ok(generation) => tracing::info!(track = %track, generation, "switched format"),
            Err(e @ (StreamError::Busy { .. } | StreamError::NotReady { .. })) => {
                tracing::warn!("format switch skipped: {e}");
            }
            Err(e) => return Err(e).context("switch format"),
        }
    }
    Ok(())
}
