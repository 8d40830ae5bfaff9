//! 紧急访问处理器

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    context::SessionContext, error::AppError, middleware::AppState,
    models::emergency::EmergencyAccessRequest,
};

/// 申请紧急访问
pub async fn request_emergency_access(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Json(req): Json<EmergencyAccessRequest>,
) -> Result<impl IntoResponse, AppError> {
    let grant = state
        .emergency_service
        .grant_emergency_access(&ctx, &req)
        .await?;

    Ok((StatusCode::CREATED, Json(grant)))
}

/// 撤销本人的紧急访问授权
pub async fn revoke_emergency_access(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let grant = state.emergency_service.revoke(&ctx, id).await?;
    Ok(Json(grant))
}
