//! Source factory reading formats over HTTP or from local files.

use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use media_feed::{ByteSource, FormatDescriptor, ReaderSource, SourceEvents, SourceFactory, TrackKind};

use crate::config::is_remote;

/// Opens one streaming request per source. Every restart issues a new
/// request from the beginning of the resource.
#[derive(Clone, Debug)]
pub struct HttpSourceFactory {
    chunk_bytes: usize,
    timeout: Duration,
}

impl HttpSourceFactory {
    pub fn new(chunk_bytes: usize) -> Self {
        Self {
            chunk_bytes,
            timeout: Duration::from_secs(10),
        }
    }
}

impl SourceFactory for HttpSourceFactory {
    fn open(
        &self,
        track: TrackKind,
        format: &FormatDescriptor,
        events: SourceEvents,
    ) -> Result<Box<dyn ByteSource>> {
        let location = format
            .url
            .as_deref()
            .ok_or_else(|| anyhow!("format {} has no location", format.id))?;
        let reader = open_location(location, self.timeout)?;
        tracing::info!(
            track = %track,
            format = %format.id,
            generation = events.generation(),
            location,
            "source opened"
        );
        let source = ReaderSource::spawn(reader, self.chunk_bytes, events)
            .with_context(|| format!("spawn source pump for {location}"))?;
        Ok(Box::new(source))
    }
}

fn open_location(location: &str, timeout: Duration) -> Result<Box<dyn Read + Send>> {
    if is_remote(location) {
        let resp = ureq::get(location)
            .config()
            .timeout_connect(Some(timeout))
            .timeout_recv_response(Some(timeout))
            .build()
            .call()
            .with_context(|| format!("request {location}"))?;
        let (_, body) = resp.into_parts();
        return Ok(Box::new(body.into_reader()));
    }
    let file = std::fs::File::open(location).with_context(|| format!("open {location}"))?;
    Ok(Box::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_location_reads_file() {
        let path = std::env::temp_dir().join(format!("feed-cli-source-{}.bin", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();
        let mut reader = open_location(path.to_str().unwrap(), Duration::from_secs(1)).unwrap();
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, vec![1, 2, 3, 4]);
    }

    #[test]
    fn missing_file_reports_location() {
        let err = match open_location("/nonexistent/feed/clip.mp4", Duration::from_secs(1)) {
            Ok(_) => panic!("expected error"),
            Err(e) => e,
        };
        assert!(format!("{err:#}").contains("/nonexistent/feed/clip.mp4"));
    }
}
