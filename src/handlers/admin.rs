//! 合规管理处理器：保留策略、法律保全、手动清理

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use validator::Validate;

use crate::{
    context::SessionContext,
    error::AppError,
    middleware::AppState,
    models::retention::{LegalHoldRequest, UpsertRetentionPolicyRequest},
};

/// 要求合规管理员角色
fn require_admin(state: &AppState, ctx: &SessionContext) -> Result<(), AppError> {
    let principal = ctx.current_principal().ok_or(AppError::Unauthorized)?;
    if principal.has_role(&state.config.security.admin_role) {
        Ok(())
    } else {
        tracing::warn!(principal_id = %principal.id, "Compliance admin role required");
        Err(AppError::Forbidden)
    }
}

/// 列出保留策略
pub async fn list_policies(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &ctx)?;

    let policies = state.retention_service.policies().await?;
    Ok(Json(json!({
        "policies": policies,
        "count": policies.len(),
    })))
}

/// 新增或更新保留策略
pub async fn upsert_policy(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Json(req): Json<UpsertRetentionPolicyRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &ctx)?;
    req.validate()?;

    let policy = state.retention_service.upsert_policy(&req).await?;
    Ok(Json(policy))
}

/// 设置或解除法律保全
pub async fn set_legal_hold(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Path(id): Path<Uuid>,
    Json(req): Json<LegalHoldRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &ctx)?;
    req.validate()?;

    let record = state
        .retention_service
        .set_legal_hold(id, req.legal_hold, &req.reason)
        .await?;

    Ok(Json(json!({
        "id": record.id,
        "legal_hold": record.legal_hold,
    })))
}

/// 立即执行一次过期清理
pub async fn run_sweep(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
) -> Result<impl IntoResponse, AppError> {
    require_admin(&state, &ctx)?;

    let report = state
        .retention_service
        .purge_expired(Utc::now(), &CancellationToken::new())
        .await?;

    Ok(Json(report))
}
