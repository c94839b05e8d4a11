//! ffmpeg argument construction for browser-playable fragmented MP4.
//!
//! Everything here is pure: given a source, its decoder, dimensions and a
//! [`SeekPlan`], produce the exact argument vector. The output is H.264 High
//! with stereo AAC in a fragmented MP4 written to stdout, so playback can
//! start before the transcode finishes.

use std::path::{Path, PathBuf};

use mb_core::config::TranscodeConfig;

use crate::codec::HwAccel;
use crate::seek::{format_seconds, SeekPlan};

/// GOP length in frames.
const GOP_SIZE: &str = "48";

/// Encoder settings shared by every transcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub hw: HwAccel,
    /// Bounding box long edge.
    pub max_long_edge: u32,
    /// Bounding box short edge.
    pub max_short_edge: u32,
    /// Target video bitrate in ffmpeg notation (`6M`, `4500k`).
    pub video_bitrate: String,
    pub audio_bitrate: String,
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self {
            hw: HwAccel::Cuda,
            max_long_edge: 1920,
            max_short_edge: 1080,
            video_bitrate: "6M".into(),
            audio_bitrate: "192k".into(),
        }
    }
}

impl EncodeSettings {
    /// Build settings from the `transcode` config section.
    ///
    /// # Errors
    ///
    /// [`mb_core::Error::Validation`] for an unknown backend or a bitrate
    /// that cannot be parsed.
    pub fn from_config(config: &TranscodeConfig) -> mb_core::Result<Self> {
        let hw = config.hw_accel.parse::<HwAccel>()?;
        if parse_bitrate(&config.video_bitrate).is_none() {
            return Err(mb_core::Error::Validation(format!(
                "invalid video bitrate '{}'",
                config.video_bitrate
            )));
        }
        Ok(Self {
            hw,
            max_long_edge: config.max_long_edge,
            max_short_edge: config.max_short_edge,
            video_bitrate: config.video_bitrate.clone(),
            audio_bitrate: config.audio_bitrate.clone(),
        })
    }

    /// Scale target for a source, swapping the box for portrait video.
    pub fn scale_box(&self, dimensions: Option<(u32, u32)>) -> (u32, u32) {
        match dimensions {
            Some((w, h)) if h > w => (self.max_short_edge, self.max_long_edge),
            _ => (self.max_long_edge, self.max_short_edge),
        }
    }

    /// VBV buffer size: twice the target bitrate, in the same unit.
    fn bufsize(&self) -> String {
        match parse_bitrate(&self.video_bitrate) {
            Some((value, suffix)) => format!("{}{}", value * 2, suffix),
            None => self.video_bitrate.clone(),
        }
    }
}

/// Split `6M` into `(6, "M")`. Accepts an optional `k`/`K`/`M`/`G` suffix.
fn parse_bitrate(rate: &str) -> Option<(u64, &str)> {
    let rate = rate.trim();
    let split = rate
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rate.len());
    let (digits, suffix) = rate.split_at(split);
    let value = digits.parse::<u64>().ok().filter(|v| *v > 0)?;
    matches!(suffix, "" | "k" | "K" | "M" | "G").then_some((value, suffix))
}

/// Per-request inputs to the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub source: PathBuf,
    /// Hardware decoder from [`crate::codec::resolve_decoder`].
    pub decoder: &'static str,
    /// Source width and height, when probed.
    pub dimensions: Option<(u32, u32)>,
    /// Whether the source has an audio stream to encode.
    pub has_audio: bool,
    pub seek: SeekPlan,
}

impl PipelineInput {
    pub fn new(source: impl AsRef<Path>, decoder: &'static str) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            decoder,
            dimensions: None,
            has_audio: true,
            seek: SeekPlan::default(),
        }
    }
}

/// Build the full ffmpeg argument vector (without the program name).
pub fn build_args(input: &PipelineInput, settings: &EncodeSettings) -> Vec<String> {
    let mut args: Vec<String> = Vec::with_capacity(64);
    let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

    push(&["-hide_banner", "-loglevel", "error", "-nostdin", "-y"]);

    match settings.hw {
        HwAccel::Cuda => push(&["-init_hw_device", "cuda=hw:0", "-filter_hw_device", "hw"]),
        HwAccel::Qsv => push(&["-init_hw_device", "qsv=hw", "-filter_hw_device", "hw"]),
    }

    push(&["-c:v", input.decoder]);

    // Keyframe-accurate seek; must precede -i.
    if let Some(pre) = input.seek.pre_seek {
        push(&["-ss", format_seconds(pre).as_str()]);
    }

    let source = input.source.to_string_lossy();
    push(&["-i", source.as_ref()]);

    if let Some(fine) = input.seek.fine_seek {
        push(&["-ss", format_seconds(fine).as_str()]);
    }
    if let Some(duration) = input.seek.duration {
        push(&["-t", format_seconds(duration).as_str()]);
    }

    push(&["-map", "0:v:0"]);
    if input.has_audio {
        push(&["-map", "0:a:0?"]);
    }

    let (width, height) = settings.scale_box(input.dimensions);
    let filter = format!(
        "scale={width}:{height}:force_original_aspect_ratio=decrease:force_divisible_by=2,format=nv12,hwupload"
    );
    push(&["-vf", filter.as_str()]);

    let bufsize = settings.bufsize();
    push(&[
        "-c:v",
        settings.hw.encoder(),
        "-b:v",
        settings.video_bitrate.as_str(),
        "-maxrate",
        settings.video_bitrate.as_str(),
        "-bufsize",
        bufsize.as_str(),
        "-profile:v",
        "high",
        "-level:v",
        "4.1",
    ]);
    match settings.hw {
        HwAccel::Cuda => push(&["-preset", "p1", "-tune", "ll"]),
        HwAccel::Qsv => push(&["-preset", "veryfast"]),
    }
    push(&["-bf", "0", "-g", GOP_SIZE]);

    if input.has_audio {
        push(&["-c:a", "aac", "-b:a", settings.audio_bitrate.as_str(), "-ac", "2"]);
    } else {
        push(&["-an"]);
    }

    push(&[
        "-f",
        "mp4",
        "-movflags",
        "frag_keyframe+empty_moov+default_base_moof",
        "pipe:1",
    ]);

    args
}
