//! Container metadata probing.
//!
//! [`ProbeResult`] is the parsed, immutable view of a file's streams and
//! format. [`Prober`] is the seam between the [`ProbeCache`] and the tool that
//! produces results; [`FfprobeProber`] is the production implementation.

pub mod cache;
pub mod ffprobe;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use self::cache::{CacheLookup, PendingProbe, ProbeCache};
pub use self::ffprobe::FfprobeProber;

/// Parsed container metadata for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub streams: Vec<ProbeStream>,
    pub format: ProbeFormat,
}

/// One elementary stream as reported by the probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeStream {
    pub index: u32,
    /// Media type: "video", "audio", "subtitle", "data", ...
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub pix_fmt: Option<String>,
    pub channels: Option<u32>,
    pub language: Option<String>,
}

/// Container-level properties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    /// Duration in seconds.
    pub duration: Option<f64>,
    /// File size in bytes.
    pub size: Option<u64>,
    /// Overall bit rate in bits per second.
    pub bit_rate: Option<u64>,
}

impl ProbeResult {
    /// First stream whose media type is video.
    pub fn video_stream(&self) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }

    /// Whether any audio stream is present.
    pub fn has_audio(&self) -> bool {
        self.streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio"))
    }

    /// Container duration, if known.
    pub fn duration(&self) -> Option<Duration> {
        self.format
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(Duration::from_secs_f64)
    }

    /// Width and height of the first video stream, if both are known.
    pub fn video_dimensions(&self) -> Option<(u32, u32)> {
        let video = self.video_stream()?;
        Some((video.width?, video.height?))
    }
}

/// Produces a [`ProbeResult`] for a media file.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect `path` and return its parsed metadata.
    ///
    /// Failures are reported as [`mb_core::Error::ProbeFailure`].
    async fn probe(&self, path: &Path) -> mb_core::Result<ProbeResult>;
}
