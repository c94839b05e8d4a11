//! Application context shared by every route handler via Axum state.
//!
//! [`AppContext`] wraps the long-lived engine components (tool registry,
//! probe cache, transcode supervisor, library roots) in `Arc`s so cloning it
//! per request is cheap.

use std::sync::Arc;

use mb_av::{EncodeSettings, ProbeCache, Prober, SupervisorConfig, ToolRegistry, TranscodeSupervisor};
use mb_core::config::Config;

use crate::paths::LibraryRoots;

/// Central application state shared across all request handlers.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable application configuration (loaded at startup).
    pub config: Arc<Config>,
    /// Discovered external tools (ffmpeg, ffprobe).
    pub tools: Arc<ToolRegistry>,
    /// Configured media roots that client paths are resolved against.
    pub roots: Arc<LibraryRoots>,
    /// Single-flight metadata cache in front of the prober.
    pub probes: ProbeCache,
    /// Owner of the one live transcoder process.
    pub supervisor: Arc<TranscodeSupervisor>,
    /// Encoder settings derived from the `transcode` config section.
    pub encode: Arc<EncodeSettings>,
}

impl AppContext {
    /// Assemble the context from configuration, discovered tools and a prober.
    ///
    /// # Errors
    ///
    /// [`mb_core::Error::Validation`] when the transcode settings are unusable
    /// (unknown hardware backend, unparsable bitrate).
    pub fn new(
        config: Config,
        tools: ToolRegistry,
        prober: Arc<dyn Prober>,
    ) -> mb_core::Result<Self> {
        let encode = EncodeSettings::from_config(&config.transcode)?;
        let supervisor = TranscodeSupervisor::new(
            tools.path_or_name("ffmpeg"),
            SupervisorConfig::from(&config.transcode),
        );
        let probes = ProbeCache::new(prober, config.streaming.probe_cache_capacity);
        let roots = LibraryRoots::new(config.library.base_paths.clone());

        tracing::debug!(
            hw_accel = %encode.hw,
            roots = roots.len(),
            probe_cache_capacity = probes.capacity(),
            "Application context ready"
        );

        Ok(Self {
            config: Arc::new(config),
            tools: Arc::new(tools),
            roots: Arc::new(roots),
            probes,
            supervisor: Arc::new(supervisor),
            encode: Arc::new(encode),
        })
    }
}
