//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, library roots, tools, transcoding, and range
//! streaming. Every section defaults sensibly so a completely empty `{}` file
//! is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub library: LibraryConfig,
    pub tools: ToolsConfig,
    pub transcode: TranscodeConfig,
    pub streaming: StreamingConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit (async, embedded, etc.).
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.library.base_paths.is_empty() {
            warnings.push("library.base_paths is empty; no files can be served".into());
        }

        for (i, root) in self.library.base_paths.iter().enumerate() {
            if !root.is_absolute() {
                warnings.push(format!(
                    "library.base_paths[{i}] '{}' is not absolute",
                    root.display()
                ));
            } else if !root.is_dir() {
                warnings.push(format!(
                    "library.base_paths[{i}] '{}' is not a directory",
                    root.display()
                ));
            }
        }

        let valid = ["cuda", "qsv"];
        if !valid.contains(&self.transcode.hw_accel.as_str()) {
            warnings.push(format!(
                "transcode.hw_accel '{}' is not a recognized method (valid: {})",
                self.transcode.hw_accel,
                valid.join(", ")
            ));
        }

        if self.transcode.max_short_edge > self.transcode.max_long_edge {
            warnings.push(
                "transcode.max_short_edge is larger than transcode.max_long_edge".into(),
            );
        }

        if self.transcode.output_buffer_chunks == 0 {
            warnings.push("transcode.output_buffer_chunks is 0; 1 will be used".into());
        }

        if self.streaming.range_window_bytes == 0 {
            warnings.push("streaming.range_window_bytes is 0; ranges cannot be served".into());
        }

        if self.streaming.probe_cache_capacity == 0 {
            warnings.push("streaming.probe_cache_capacity is 0; 1 will be used".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Library roots addressed by `basePathIndex` in requests.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    pub base_paths: Vec<PathBuf>,
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
}

/// Live transcoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Hardware acceleration method (cuda, qsv).
    pub hw_accel: String,
    /// Cap for the longer edge of the output frame.
    pub max_long_edge: u32,
    /// Cap for the shorter edge of the output frame.
    pub max_short_edge: u32,
    pub video_bitrate: String,
    pub audio_bitrate: String,
    /// Time a preempted process gets to exit after SIGTERM before SIGKILL.
    pub kill_grace_ms: u64,
    /// Number of stdout chunks buffered ahead of a slow client.
    pub output_buffer_chunks: usize,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            hw_accel: "cuda".into(),
            max_long_edge: 1920,
            max_short_edge: 1080,
            video_bitrate: "6M".into(),
            audio_bitrate: "192k".into(),
            kill_grace_ms: 3000,
            output_buffer_chunks: 8,
        }
    }
}

/// Byte-range serving and probe cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Largest byte window returned for a single `Range` request.
    pub range_window_bytes: u64,
    pub probe_cache_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            range_window_bytes: 4 * 1024 * 1024,
            probe_cache_capacity: 16,
        }
    }
}
