//! Direct file access with byte-range support.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use axum::Extension;

use super::streaming_helpers::serve_file_range;
use super::FileQuery;
use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// GET /file/get?basePathIndex&relativePath
///
/// Serves the raw file, honouring a single `Range: bytes=start-end?` header.
/// Each response covers at most `streaming.range_window_bytes`.
pub async fn get_file(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    query: Result<Query<FileQuery>, QueryRejection>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    let fail = |e: mb_core::Error| AppError::new(e).with_request_id(&request_id);

    let Query(query) = query.map_err(|e| AppError::from(e).with_request_id(&request_id))?;
    let path = ctx
        .roots
        .resolve(query.base_path_index, &query.relative_path)
        .map_err(fail)?;

    // A non-ASCII header is malformed, not absent.
    let range = headers
        .get(header::RANGE)
        .map(|v| v.to_str().unwrap_or_default());
    tracing::debug!(path = %path.display(), range = ?range, "Serving file");

    serve_file_range(&path, range, ctx.config.streaming.range_window_bytes)
        .await
        .map_err(fail)
}
