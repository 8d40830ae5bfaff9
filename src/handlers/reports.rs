//! 脱敏报表处理器

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use crate::{
    context::SessionContext, error::AppError, middleware::AppState,
    services::reporting_service::ReportQuery,
};

/// 按表导出脱敏数据
pub async fn run_report(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Path(table): Path<String>,
    Json(query): Json<ReportQuery>,
) -> Result<impl IntoResponse, AppError> {
    let report = state
        .reporting_service
        .query_with_redaction(&ctx, &table, &query)
        .await?;

    Ok(Json(report))
}
