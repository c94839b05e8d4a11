//! Administrative endpoints.

use axum::extract::State;
use axum::Json;

use crate::context::AppContext;
use crate::error::AppError;

/// GET /admin/tools
///
/// Reports which external tools were found and their versions.
pub async fn tools(State(ctx): State<AppContext>) -> Result<Json<Vec<mb_av::ToolInfo>>, AppError> {
    // `-version` probes are blocking process runs.
    let tools = ctx.tools.clone();
    let infos = tokio::task::spawn_blocking(move || tools.check_all())
        .await
        .map_err(|e| mb_core::Error::Internal(format!("tool check failed: {e}")))?;
    Ok(Json(infos))
}
