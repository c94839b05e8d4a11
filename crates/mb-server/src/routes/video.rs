//! On-demand transcoding endpoints.
//!
//! Request flow: resolve the path, plan the seek, probe (cached), pick the
//! hardware decoder, build the ffmpeg arguments, then hand them to the
//! supervisor, which preempts whatever was playing. Every validation step
//! runs before a process is spawned, so rejected requests cost nothing.
//!
//! Once the stream has started, failures can no longer change the status
//! code; they truncate the body and are logged under the correlation id.

use std::path::PathBuf;

use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use mb_av::seek::{self, SeekPlan, SegmentRequest};
use mb_av::{build_args, resolve_decoder, PipelineInput};

use super::FileQuery;
use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Response header carrying the transcode's correlation id.
pub static X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");

/// Query for `/video/segment`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentQuery {
    pub base_path_index: usize,
    pub relative_path: String,
    /// Segment start in seconds.
    pub start: f64,
    /// Segment length in seconds.
    pub duration: f64,
}

/// Body of `/video/metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    /// Seconds.
    pub duration: Option<f64>,
    /// Bytes.
    pub size: Option<u64>,
    /// Bits per second.
    pub bit_rate: Option<u64>,
}

/// GET /video/metadata?basePathIndex&relativePath
pub async fn metadata(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Result<Json<VideoMetadata>, AppError> {
    let fail = |e: mb_core::Error| AppError::new(e).with_request_id(&request_id);

    let Query(query) = query.map_err(|e| AppError::from(e).with_request_id(&request_id))?;
    let path = ctx
        .roots
        .resolve(query.base_path_index, &query.relative_path)
        .map_err(fail)?;

    let probe = ctx.probes.probe(&path).await.map_err(fail)?;

    Ok(Json(VideoMetadata {
        duration: probe.duration().map(|d| d.as_secs_f64()),
        size: probe.format.size,
        bit_rate: probe.format.bit_rate,
    }))
}

/// GET /video/fallback?basePathIndex&relativePath
///
/// Transcodes the whole file from the beginning.
pub async fn fallback(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    query: Result<Query<FileQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let fail = |e: mb_core::Error| AppError::new(e).with_request_id(&request_id);

    let Query(query) = query.map_err(|e| AppError::from(e).with_request_id(&request_id))?;
    let path = ctx
        .roots
        .resolve(query.base_path_index, &query.relative_path)
        .map_err(fail)?;
    let plan = seek::plan(None).map_err(fail)?;

    stream_transcode(&ctx, path, plan).await.map_err(fail)
}

/// GET /video/segment?basePathIndex&relativePath&start&duration
///
/// Transcodes `duration` seconds starting at `start`.
pub async fn segment(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    query: Result<Query<SegmentQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let fail = |e: mb_core::Error| AppError::new(e).with_request_id(&request_id);

    let Query(query) = query.map_err(|e| AppError::from(e).with_request_id(&request_id))?;
    let path = ctx
        .roots
        .resolve(query.base_path_index, &query.relative_path)
        .map_err(fail)?;
    let plan = seek::plan(Some(SegmentRequest {
        start: query.start,
        duration: query.duration,
    }))
    .map_err(fail)?;

    stream_transcode(&ctx, path, plan).await.map_err(fail)
}

/// Probe, resolve the decoder, and start the transcoder.
async fn stream_transcode(
    ctx: &AppContext,
    path: PathBuf,
    seek: SeekPlan,
) -> mb_core::Result<Response> {
    let probe = ctx.probes.probe(&path).await?;
    let decoder = resolve_decoder(ctx.encode.hw, &probe)?;

    let input = PipelineInput {
        source: path,
        decoder,
        dimensions: probe.video_dimensions(),
        has_audio: probe.has_audio(),
        seek,
    };
    let args = build_args(&input, &ctx.encode);
    let session = ctx.supervisor.start(args).await?;

    tracing::info!(
        correlation_id = %session.correlation_id,
        path = %input.source.display(),
        decoder,
        start = ?seek.start(),
        duration = ?seek.duration,
        "Streaming transcode"
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE.as_str(), "video/mp4".to_string()),
            (header::CACHE_CONTROL.as_str(), "no-store".to_string()),
            (X_CORRELATION_ID.as_str(), session.correlation_id.to_string()),
        ],
        Body::from_stream(session.body),
    )
        .into_response())
}
