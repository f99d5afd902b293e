//! Format descriptors and the selection of per-track formats.

use serde::{Deserialize, Serialize};

use crate::error::StreamError;
use media_feed_types::TrackKind;

/// One downloadable rendition of the media.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatDescriptor {
    /// Provider-assigned identifier.
    pub id: String,
    /// Declared content type, e.g. `video/mp4; codecs="avc1.640028"`.
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub has_video: bool,
    #[serde(default)]
    pub has_audio: bool,
    /// Human-readable quality, e.g. `1080p`.
    #[serde(default)]
    pub quality_label: Option<String>,
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
    /// Where the bytes come from (URL or local path).
    #[serde(default)]
    pub url: Option<String>,
}

impl FormatDescriptor {
    /// Content type, or empty when unknown.
    pub fn mime(&self) -> &str {
        self.mime_type.as_deref().unwrap_or("")
    }

    /// Average bytes per second of media, when the bitrate is known.
    pub fn bytes_per_second(&self) -> Option<f64> {
        self.bitrate_kbps
            .filter(|kbps| *kbps > 0)
            .map(|kbps| kbps as f64 * 1000.0 / 8.0)
    }

    /// Picker label: `<quality> <mime>` for video, `<bitrate>kbps <mime>` for audio.
    pub fn label(&self, track: TrackKind) -> String {
        match track {
            TrackKind::Video => format!(
                "{} {}",
                self.quality_label.as_deref().unwrap_or("?"),
                self.mime()
            ),
            TrackKind::Audio => match self.bitrate_kbps {
                Some(kbps) => format!("{kbps}kbps {}", self.mime()),
                None => format!("? {}", self.mime()),
            },
        }
    }

    fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }
}

/// Everything known about one piece of media before streaming starts.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct MediaDescription {
    #[serde(default)]
    pub title: Option<String>,
    /// Live content has no fixed end and is not fed through this engine.
    #[serde(default)]
    pub live: bool,
    #[serde(default)]
    pub formats: Vec<FormatDescriptor>,
}

/// Video-only and audio-only formats eligible for an append buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormatCatalog {
    pub video: Vec<FormatDescriptor>,
    pub audio: Vec<FormatDescriptor>,
}

impl FormatCatalog {
    /// Split formats per track.
    ///
    /// Formats without a content type are dropped, and so are `video/webm`
    /// video formats: appending them leaves several disjoint buffered ranges.
    pub fn from_formats(formats: &[FormatDescriptor]) -> Self {
        let usable = |f: &&FormatDescriptor| f.mime_type.as_deref().is_some_and(|m| !m.is_empty());
        let video = formats
            .iter()
            .filter(|f| f.is_video_only())
            .filter(usable)
            .filter(|f| !f.mime().starts_with("video/webm"))
            .cloned()
            .collect();
        let audio = formats
            .iter()
            .filter(|f| f.is_audio_only())
            .filter(usable)
            .cloned()
            .collect();
        Self { video, audio }
    }

    /// Formats for a track.
    pub fn for_track(&self, track: TrackKind) -> &[FormatDescriptor] {
        match track {
            TrackKind::Video => &self.video,
            TrackKind::Audio => &self.audio,
        }
    }

    /// `true` when neither track has a format.
    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty()
    }
}

/// Initial format per track. A track without formats is simply absent.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackPlan {
    pub catalog: FormatCatalog,
    pub video: Option<FormatDescriptor>,
    pub audio: Option<FormatDescriptor>,
}

impl PlaybackPlan {
    /// Pick the first eligible format of each track.
    pub fn select(media: &MediaDescription) -> Result<Self, StreamError> {
        let catalog = FormatCatalog::from_formats(&media.formats);
        if catalog.is_empty() {
            return Err(StreamError::NoPlayableFormats);
        }
        if media.live {
            return Err(StreamError::LiveUnsupported);
        }
        let video = catalog.video.first().cloned();
        let audio = catalog.audio.first().cloned();
        Ok(Self {
            catalog,
            video,
            audio,
        })
    }

    /// Tracks present in the plan, video first.
    pub fn tracks(&self) -> Vec<(TrackKind, FormatDescriptor)> {
        let mut out = Vec::with_capacity(2);
        if let Some(video) = &self.video {
            out.push((TrackKind::Video, video.clone()));
        }
        if let Some(audio) = &self.audio {
            out.push((TrackKind::Audio, audio.clone()));
        }
        out
    }

    /// Format at `index` in the catalog for a track.
    pub fn format_at(&self, track: TrackKind, index: usize) -> Option<&FormatDescriptor> {
        self.catalog.for_track(track).get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, mime: &str) -> FormatDescriptor {
        FormatDescriptor {
            id: id.to_string(),
            mime_type: Some(mime.to_string()),
            has_video: true,
            quality_label: Some("720p".to_string()),
            ..FormatDescriptor::default()
        }
    }

    fn audio(id: &str, mime: &str, kbps: u32) -> FormatDescriptor {
        FormatDescriptor {
            id: id.to_string(),
            mime_type: Some(mime.to_string()),
            has_audio: true,
            bitrate_kbps: Some(kbps),
            ..FormatDescriptor::default()
        }
    }

    #[test]
    fn catalog_drops_muxed_webm_and_untyped_formats() {
        let muxed = FormatDescriptor {
            id: "18".to_string(),
            mime_type: Some("video/mp4".to_string()),
            has_video: true,
            has_audio: true,
            ..FormatDescriptor::default()
        };
        let untyped = FormatDescriptor {
            id: "x".to_string(),
            has_video: true,
            ..FormatDescriptor::default()
        };
        let formats = vec![
            muxed,
            untyped,
            video("248", "video/webm; codecs=\"vp9\""),
            video("136", "video/mp4; codecs=\"avc1.4d401f\""),
            audio("251", "audio/webm; codecs=\"opus\"", 160),
            audio("140", "audio/mp4; codecs=\"mp4a.40.2\"", 128),
        ];
        let catalog = FormatCatalog::from_formats(&formats);
        let video_ids: Vec<_> = catalog.video.iter().map(|f| f.id.as_str()).collect();
        let audio_ids: Vec<_> = catalog.audio.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(video_ids, vec!["136"]);
        assert_eq!(audio_ids, vec!["251", "140"]);
    }

    #[test]
    fn plan_picks_first_of_each_track() {
        let media = MediaDescription {
            title: Some("clip".to_string()),
            live: false,
            formats: vec![
                video("136", "video/mp4"),
                video("137", "video/mp4"),
                audio("140", "audio/mp4", 128),
            ],
        };
        let plan = PlaybackPlan::select(&media).unwrap();
        assert_eq!(plan.video.as_ref().map(|f| f.id.as_str()), Some("136"));
        assert_eq!(plan.audio.as_ref().map(|f| f.id.as_str()), Some("140"));
        assert_eq!(plan.tracks().len(), 2);
        assert_eq!(plan.format_at(TrackKind::Video, 1).map(|f| f.id.as_str()), Some("137"));
    }

    #[test]
    fn audio_only_media_is_a_valid_plan() {
        let media = MediaDescription {
            formats: vec![audio("140", "audio/mp4", 128)],
            ..MediaDescription::default()
        };
        let plan = PlaybackPlan::select(&media).unwrap();
        assert!(plan.video.is_none());
        assert_eq!(plan.tracks(), vec![(TrackKind::Audio, audio("140", "audio/mp4", 128))]);
    }

    #[test]
    fn plan_rejects_empty_and_live_media() {
        let empty = MediaDescription::default();
        assert_eq!(PlaybackPlan::select(&empty), Err(StreamError::NoPlayableFormats));

        let live = MediaDescription {
            live: true,
            formats: vec![video("136", "video/mp4")],
            ..MediaDescription::default()
        };
        assert_eq!(PlaybackPlan::select(&live), Err(StreamError::LiveUnsupported));
    }

    #[test]
    fn labels_follow_track_kind() {
        assert_eq!(video("136", "video/mp4").label(TrackKind::Video), "720p video/mp4");
        assert_eq!(audio("140", "audio/mp4", 128).label(TrackKind::Audio), "128kbps audio/mp4");
    }

    #[test]
    fn bytes_per_second_from_bitrate() {
        assert_eq!(audio("140", "audio/mp4", 128).bytes_per_second(), Some(16_000.0));
        assert_eq!(video("136", "video/mp4").bytes_per_second(), None);
    }
}
