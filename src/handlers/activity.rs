//! 活动记录处理器

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    context::SessionContext, error::AppError, middleware::AppState, models::audit::AuditLogFilters,
};

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    pub action: Option<String>,
    pub table_name: Option<String>,
    pub child_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// 查询本人操作以及本人家庭中儿童的相关事件
pub async fn list_activity(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Query(query): Query<ActivityQuery>,
) -> Result<impl IntoResponse, AppError> {
    if ctx.current_principal().is_none() {
        return Err(AppError::Unauthorized);
    }
    if !(1..=500).contains(&query.limit) || query.offset < 0 {
        return Err(AppError::validation("limit must be 1..=500 and offset >= 0"));
    }

    let filters = AuditLogFilters {
        action: query.action,
        table_name: query.table_name,
        child_id: query.child_id,
        start_time: query.start_time,
        end_time: query.end_time,
    };

    let (records, total) = state
        .audit_service
        .query_activity(&state.enforcer, &ctx, &filters, query.limit, query.offset)
        .await?;

    Ok(Json(json!({
        "records": records,
        "count": records.len(),
        "total": total
    })))
}
