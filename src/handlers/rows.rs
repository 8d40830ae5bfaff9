//! 家庭范围内的行读写处理器

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::{context::SessionContext, error::AppError, middleware::AppState, models::Row};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// 列出可见行
pub async fn list_rows(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Path(table): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !(1..=500).contains(&query.limit) || query.offset < 0 {
        return Err(AppError::validation("limit must be 1..=500 and offset >= 0"));
    }

    let rows = state
        .tenant_store
        .list(&ctx, &table, query.limit, query.offset)
        .await?;

    Ok(Json(json!({
        "rows": rows,
        "count": rows.len(),
    })))
}

/// 读取单行
pub async fn get_row(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Path((table, id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let row = state.tenant_store.get(&ctx, &table, id).await?;
    Ok(Json(row))
}

/// 插入一行
pub async fn create_row(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Path(table): Path<String>,
    Json(row): Json<Row>,
) -> Result<impl IntoResponse, AppError> {
    let written = state.tenant_store.insert(&ctx, &table, row).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "row": written.row,
            "audited": written.audited,
        })),
    ))
}

/// 修改一行
pub async fn update_row(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Path((table, id)): Path<(String, Uuid)>,
    Json(changes): Json<Row>,
) -> Result<impl IntoResponse, AppError> {
    let written = state.tenant_store.update(&ctx, &table, id, changes).await?;

    Ok(Json(json!({
        "row": written.row,
        "audited": written.audited,
    })))
}

/// 删除一行
pub async fn delete_row(
    State(state): State<Arc<AppState>>,
    ctx: SessionContext,
    Path((table, id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let written = state.tenant_store.delete(&ctx, &table, id).await?;
    Ok(Json(json!({ "audited": written.audited })))
}
