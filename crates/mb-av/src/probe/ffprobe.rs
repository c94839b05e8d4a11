//! FFprobe-based [`Prober`] implementation.
//!
//! Shells out to `ffprobe -v quiet -print_format json -show_format -show_streams`
//! and maps the JSON output into [`ProbeResult`].

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;

use super::{ProbeFormat, ProbeResult, ProbeStream, Prober};
use crate::command::ToolCommand;

/// A prober backed by the `ffprobe` CLI.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    /// Path to the ffprobe binary.
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    /// Create a new prober using the given ffprobe path.
    pub fn new(ffprobe_path: PathBuf) -> Self {
        Self { ffprobe_path }
    }
}

#[async_trait]
impl Prober for FfprobeProber {
    fn name(&self) -> &'static str {
        "ffprobe"
    }

    async fn probe(&self, path: &Path) -> mb_core::Result<ProbeResult> {
        let mut cmd = ToolCommand::new(self.ffprobe_path.clone());
        cmd.args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_format",
            "-show_streams",
        ]);
        cmd.arg(path.to_string_lossy().as_ref());

        let output = cmd
            .execute()
            .await
            .map_err(|e| mb_core::Error::probe(path, e.to_string()))?;

        parse_ffprobe_json(&output.stdout).map_err(|e| mb_core::Error::probe(path, e))
    }
}

// ---------------------------------------------------------------------------
// JSON structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: Option<String>,
    duration: Option<String>,
    size: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    index: u32,
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    channels: Option<u32>,
    #[serde(default)]
    tags: FfprobeTags,
}

#[derive(Debug, Default, Deserialize)]
struct FfprobeTags {
    language: Option<String>,
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

/// Parse ffprobe's JSON document.
///
/// ffprobe reports numeric format fields as strings (and `"N/A"` when
/// unknown); those become `None`. A document without a `format` section is
/// rejected since it means ffprobe could not open the container.
pub fn parse_ffprobe_json(json: &str) -> Result<ProbeResult, String> {
    let output: FfprobeOutput =
        serde_json::from_str(json).map_err(|e| format!("ffprobe JSON parse error: {e}"))?;

    let format = output
        .format
        .ok_or_else(|| "ffprobe output has no format section".to_string())?;

    let streams = output
        .streams
        .into_iter()
        .map(|s| ProbeStream {
            index: s.index,
            codec_type: s.codec_type,
            codec_name: s.codec_name,
            width: s.width,
            height: s.height,
            pix_fmt: s.pix_fmt,
            channels: s.channels,
            language: s.tags.language,
        })
        .collect();

    Ok(ProbeResult {
        streams,
        format: ProbeFormat {
            format_name: format.format_name,
            duration: format.duration.as_deref().and_then(|s| s.parse::<f64>().ok()),
            size: format.size.as_deref().and_then(|s| s.parse::<u64>().ok()),
            bit_rate: format.bit_rate.as_deref().and_then(|s| s.parse::<u64>().ok()),
        },
    })
}
