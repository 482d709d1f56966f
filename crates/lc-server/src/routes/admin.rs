//! Admin route handlers: tool availability and manual sweep.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::context::AppContext;
use crate::error::AppError;

/// Result of a manual sweep.
#[derive(Serialize, utoipa::ToSchema)]
pub struct SweepResponse {
    /// Names of the files that were removed.
    pub removed: Vec<String>,
}

/// GET /api/admin/tools
#[utoipa::path(
    get,
    path = "/api/admin/tools",
    responses(
        (status = 200, description = "List external tool availability", body = Vec<lc_av::ToolInfo>)
    )
)]
pub async fn tools(State(ctx): State<AppContext>) -> Json<Vec<lc_av::ToolInfo>> {
    Json(ctx.tools.check_all().await)
}

/// POST /api/admin/sweep
#[utoipa::path(
    post,
    path = "/api/admin/sweep",
    responses(
        (status = 200, description = "Expired uploads removed", body = SweepResponse)
    )
)]
pub async fn sweep(State(ctx): State<AppContext>) -> Result<Json<SweepResponse>, AppError> {
    let removed = ctx.media.sweep(ctx.config.media.retention()).await?;
    Ok(Json(SweepResponse { removed }))
}
