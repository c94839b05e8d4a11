//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`], which builds a full [`AppContext`] around a
//! temporary library root, a static prober and a stand-in transcoder script,
//! then serves it on a random port.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mb_av::probe::{ProbeFormat, ProbeResult, ProbeStream, Prober};
use mb_av::ToolRegistry;
use mb_core::config::Config;
use mb_server::context::AppContext;
use mb_server::router::build_router;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Prober that answers every path with the same result and counts calls.
pub struct StaticProber {
    pub result: ProbeResult,
    calls: AtomicUsize,
}

impl StaticProber {
    pub fn h264() -> Self {
        Self::with_codec("h264")
    }

    pub fn with_codec(codec: &str) -> Self {
        Self {
            result: ProbeResult {
                streams: vec![
                    ProbeStream {
                        index: 0,
                        codec_type: Some("video".into()),
                        codec_name: Some(codec.into()),
                        width: Some(1920),
                        height: Some(1080),
                        pix_fmt: Some("yuv420p".into()),
                        ..Default::default()
                    },
                    ProbeStream {
                        index: 1,
                        codec_type: Some("audio".into()),
                        codec_name: Some("ac3".into()),
                        channels: Some(6),
                        ..Default::default()
                    },
                ],
                format: ProbeFormat {
                    format_name: Some("matroska,webm".into()),
                    duration: Some(120.5),
                    size: Some(52_428_800),
                    bit_rate: Some(3_480_000),
                },
            },
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for StaticProber {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn probe(&self, _path: &Path) -> mb_core::Result<ProbeResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.result.clone())
    }
}

/// Running server plus the fixtures behind it.
pub struct TestHarness {
    pub ctx: AppContext,
    pub addr: SocketAddr,
    pub prober: Arc<StaticProber>,
    pub library: TempDir,
    scratch: TempDir,
    cancel: CancellationToken,
}

impl TestHarness {
    /// Start a server whose prober reports an H.264 source.
    pub async fn with_server() -> Self {
        Self::with_prober(StaticProber::h264()).await
    }

    /// Start a server with a custom prober on a random port.
    pub async fn with_prober(prober: StaticProber) -> Self {
        let library = tempfile::tempdir().expect("failed to create library dir");
        let scratch = tempfile::tempdir().expect("failed to create scratch dir");
        let ffmpeg = write_fake_ffmpeg(scratch.path());

        let mut config = Config::default();
        config.library.base_paths = vec![library.path().to_path_buf()];
        config.tools.ffmpeg_path = Some(ffmpeg.clone());
        config.transcode.kill_grace_ms = 500;

        let prober = Arc::new(prober);
        let tools = ToolRegistry::with_tools([("ffmpeg", ffmpeg)]);
        let ctx = AppContext::new(config, tools, prober.clone()).expect("failed to build context");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind random port");
        let addr = listener.local_addr().expect("failed to get local addr");

        let cancel = CancellationToken::new();
        tokio::spawn(mb_server::serve(listener, build_router(ctx.clone()), cancel.clone()));

        Self {
            ctx,
            addr,
            prober,
            library,
            scratch,
            cancel,
        }
    }

    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    /// Write a file under the library root and return its canonical path.
    pub fn write_media(&self, relative: &str, contents: &[u8]) -> PathBuf {
        let path = self.library.path().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("failed to create media dir");
        }
        std::fs::write(&path, contents).expect("failed to write media file");
        path.canonicalize().expect("failed to canonicalize media path")
    }

    /// Arguments the fake transcoder was last started with.
    pub fn transcoder_args(&self) -> Vec<String> {
        let log = self.scratch.path().join("args.log");
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(String::from)
            .collect()
    }

    /// Wait until the supervisor's slot is empty.
    pub async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.ctx.supervisor.active().await.is_some() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("transcoder was never cleaned up");
    }
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A shell script standing in for ffmpeg: answers `-version`, otherwise
/// records its arguments one per line and writes to stdout forever.
fn write_fake_ffmpeg(dir: &Path) -> PathBuf {
    let script = dir.join("ffmpeg");
    let log = dir.join("args.log");
    let body = format!(
        "#!/bin/sh\n\
         if [ \"$1\" = -version ]; then echo 'ffmpeg version test'; exit 0; fi\n\
         printf '%s\\n' \"$@\" > '{}'\n\
         exec yes\n",
        log.display()
    );
    std::fs::write(&script, body).expect("failed to write fake ffmpeg");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
            .expect("failed to chmod fake ffmpeg");
    }

    script
}

/// Find `needle` as a contiguous run inside `args`.
pub fn contains_sequence(args: &[String], needle: &[&str]) -> bool {
    args.windows(needle.len())
        .any(|w| w.iter().zip(needle).all(|(a, b)| a == b))
}
