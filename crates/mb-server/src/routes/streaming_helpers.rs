//! Shared streaming helpers: range parsing, window clamping, content-type
//! guessing, and chunked file serving via `ReaderStream`.
//!
//! A range response never covers more than the configured window, so one
//! request reads a bounded amount of the file no matter what the client
//! asked for; players simply issue the next range.

use std::path::Path;

use axum::body::Body;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

/// Read size for file bodies.
const READ_CHUNK: usize = 64 * 1024;

/// Parse a `Range: bytes=START-END` header value.
///
/// Returns `(start, Option<end>)` where `end` is `None` for open-ended ranges
/// like `bytes=500-`. Suffix ranges and multi-range sets are not supported.
pub fn parse_range_header(value: &str) -> Option<(u64, Option<u64>)> {
    let bytes_prefix = value.trim().strip_prefix("bytes=")?;
    let (start_str, end_str) = bytes_prefix.split_once('-')?;
    let start_str = start_str.trim();
    let end_str = end_str.trim();

    let start: u64 = start_str.parse().ok()?;
    let end: Option<u64> = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse().ok()?)
    };

    Some((start, end))
}

/// A satisfiable byte range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeWindow {
    pub start: u64,
    pub end: u64,
    pub total: u64,
}

impl RangeWindow {
    /// Number of bytes in the window.
    pub fn content_length(&self) -> u64 {
        self.end - self.start + 1
    }

    /// `bytes=0-0` is answered with 200; every other window with 206.
    pub fn status(&self) -> StatusCode {
        if self.start == 0 && self.end == 0 {
            StatusCode::OK
        } else {
            StatusCode::PARTIAL_CONTENT
        }
    }
}

/// What to send for a given `Range` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOutcome {
    /// No range requested: the whole file.
    Full,
    Partial(RangeWindow),
    /// Malformed or out of bounds.
    Unsatisfiable,
}

/// Clamp a requested range to the file and to `max_window` bytes.
pub fn resolve_range(range_header: Option<&str>, size: u64, max_window: u64) -> RangeOutcome {
    let Some(value) = range_header else {
        return RangeOutcome::Full;
    };
    let Some((start, requested_end)) = parse_range_header(value) else {
        return RangeOutcome::Unsatisfiable;
    };
    if start >= size {
        return RangeOutcome::Unsatisfiable;
    }

    let window_end = start.saturating_add(max_window.max(1) - 1);
    let end = requested_end
        .map_or(window_end, |end| end.min(window_end))
        .min(size - 1);

    if end < start {
        return RangeOutcome::Unsatisfiable;
    }

    RangeOutcome::Partial(RangeWindow {
        start,
        end,
        total: size,
    })
}

/// Guess the MIME type from the file extension.
pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        "webm" => "video/webm",
        "ts" => "video/mp2t",
        "mov" => "video/quicktime",
        "wmv" => "video/x-ms-wmv",
        "flv" => "video/x-flv",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

/// Serve a file with optional `Range` support.
///
/// Reads are done in 64KB chunks so memory stays bounded regardless of file
/// size.
///
/// # Errors
///
/// [`mb_core::Error::FileNotFound`] if the file cannot be stat'ed or opened.
pub async fn serve_file_range(
    file_path: &Path,
    range_header: Option<&str>,
    max_window: u64,
) -> Result<Response, mb_core::Error> {
    let metadata = tokio::fs::metadata(file_path)
        .await
        .map_err(|_| mb_core::Error::file_not_found(file_path))?;
    if !metadata.is_file() {
        return Err(mb_core::Error::file_not_found(file_path));
    }

    let file_size = metadata.len();
    let content_type = guess_content_type(file_path);

    match resolve_range(range_header, file_size, max_window) {
        RangeOutcome::Unsatisfiable => {
            tracing::debug!(range = ?range_header, file_size, "Unsatisfiable range");
            Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [
                    (header::CONTENT_RANGE.as_str(), format!("bytes */{file_size}")),
                    (header::ACCEPT_RANGES.as_str(), "bytes".to_string()),
                ],
                Body::empty(),
            )
                .into_response())
        }
        RangeOutcome::Partial(window) => {
            let mut file = tokio::fs::File::open(file_path)
                .await
                .map_err(|_| mb_core::Error::file_not_found(file_path))?;
            file.seek(std::io::SeekFrom::Start(window.start)).await?;

            // Wrap in a Take to limit reads to exactly the window.
            let limited = file.take(window.content_length());
            let body = Body::from_stream(ReaderStream::with_capacity(limited, READ_CHUNK));

            Ok((
                window.status(),
                [
                    (header::CONTENT_TYPE.as_str(), content_type.to_string()),
                    (
                        header::CONTENT_RANGE.as_str(),
                        format!("bytes {}-{}/{}", window.start, window.end, window.total),
                    ),
                    (header::CONTENT_LENGTH.as_str(), window.content_length().to_string()),
                    (header::ACCEPT_RANGES.as_str(), "bytes".to_string()),
                ],
                body,
            )
                .into_response())
        }
        RangeOutcome::Full => {
            let file = tokio::fs::File::open(file_path)
                .await
                .map_err(|_| mb_core::Error::file_not_found(file_path))?;
            let body = Body::from_stream(ReaderStream::with_capacity(file, READ_CHUNK));

            Ok((
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE.as_str(), content_type.to_string()),
                    (header::CONTENT_LENGTH.as_str(), file_size.to_string()),
                    (header::ACCEPT_RANGES.as_str(), "bytes".to_string()),
                ],
                body,
            )
                .into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn partial(outcome: RangeOutcome) -> RangeWindow {
        match outcome {
            RangeOutcome::Partial(w) => w,
            other => panic!("expected partial range, got {other:?}"),
        }
    }

    #[test]
    fn parse_range_full() {
        assert_eq!(parse_range_header("bytes=0-999"), Some((0, Some(999))));
    }

    #[test]
    fn parse_range_open_end() {
        assert_eq!(parse_range_header("bytes=500-"), Some((500, None)));
    }

    #[test]
    fn parse_range_invalid() {
        assert!(parse_range_header("invalid").is_none());
        assert!(parse_range_header("bytes=abc-def").is_none());
        assert!(parse_range_header("bytes=-500").is_none());
        assert!(parse_range_header("bytes=0-1,5-6").is_none());
        assert!(parse_range_header("items=0-1").is_none());
    }

    #[test]
    fn open_range_is_capped_at_window() {
        let w = partial(resolve_range(Some("bytes=0-"), 10 * MIB, 4 * MIB));
        assert_eq!((w.start, w.end, w.total), (0, 4 * MIB - 1, 10 * MIB));
        assert_eq!(w.content_length(), 4 * MIB);
        assert_eq!(w.status(), StatusCode::PARTIAL_CONTENT);
    }

    #[test]
    fn explicit_end_is_capped_at_window() {
        let w = partial(resolve_range(Some("bytes=100-9999999"), 10 * MIB, 4 * MIB));
        assert_eq!(w.end, 100 + 4 * MIB - 1);
    }

    #[test]
    fn small_explicit_range_is_kept() {
        let w = partial(resolve_range(Some("bytes=10-20"), 10 * MIB, 4 * MIB));
        assert_eq!((w.start, w.end), (10, 20));
        assert_eq!(w.content_length(), 11);
    }

    #[test]
    fn tail_is_clamped_to_file_size() {
        let w = partial(resolve_range(Some("bytes=10485000-"), 10 * MIB, 4 * MIB));
        assert_eq!(w.end, 10 * MIB - 1);
        let w = partial(resolve_range(Some("bytes=5-99999"), 100, 4 * MIB));
        assert_eq!(w.end, 99);
    }

    #[test]
    fn first_byte_only_is_ok_status() {
        let w = partial(resolve_range(Some("bytes=0-0"), 10 * MIB, 4 * MIB));
        assert_eq!((w.start, w.end), (0, 0));
        assert_eq!(w.status(), StatusCode::OK);
    }

    #[test]
    fn unsatisfiable_ranges() {
        assert_eq!(resolve_range(Some("bytes=100-"), 100, MIB), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve_range(Some("bytes=50-10"), 100, MIB), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve_range(Some("bytes=oops"), 100, MIB), RangeOutcome::Unsatisfiable);
        assert_eq!(resolve_range(Some("bytes=0-"), 0, MIB), RangeOutcome::Unsatisfiable);
    }

    #[test]
    fn no_header_is_full() {
        assert_eq!(resolve_range(None, 100, MIB), RangeOutcome::Full);
    }

    #[test]
    fn content_type_guessing() {
        assert_eq!(guess_content_type(Path::new("movie.mkv")), "video/x-matroska");
        assert_eq!(guess_content_type(Path::new("movie.MP4")), "video/mp4");
        assert_eq!(guess_content_type(Path::new("x.m4v")), "video/mp4");
        assert_eq!(guess_content_type(Path::new("x.ts")), "video/mp2t");
        assert_eq!(guess_content_type(Path::new("x.mov")), "video/quicktime");
        assert_eq!(guess_content_type(Path::new("file.xyz")), "application/octet-stream");
        assert_eq!(guess_content_type(Path::new("noext")), "application/octet-stream");
    }

    #[tokio::test]
    async fn serves_exact_window_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        let data: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        std::fs::write(&path, &data).unwrap();

        let response = serve_file_range(&path, Some("bytes=10-"), 100).await.unwrap();
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 10-109/1000");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], &data[10..110]);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = serve_file_range(Path::new("/nonexistent/clip.mp4"), None, MIB)
            .await
            .unwrap_err();
        assert!(matches!(err, mb_core::Error::FileNotFound { .. }));
    }
}
