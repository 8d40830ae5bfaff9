//! 路由注册
//! 创建所有 API 路由并应用中间件

use axum::{
    routing::{delete, get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer,
};

use crate::{handlers, middleware::AppState};

/// 请求体上限
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// 创建应用路由
pub fn create_router(state: Arc<AppState>) -> Router {
    // 公开端点（健康检查）
    let public_routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check));

    // 家庭数据、活动记录、报表与紧急访问
    let api_routes = Router::new()
        .route(
            "/api/v1/tables/{table}/rows",
            get(handlers::rows::list_rows).post(handlers::rows::create_row),
        )
        .route(
            "/api/v1/tables/{table}/rows/{id}",
            get(handlers::rows::get_row)
                .patch(handlers::rows::update_row)
                .delete(handlers::rows::delete_row),
        )
        .route("/api/v1/activity", get(handlers::activity::list_activity))
        .route("/api/v1/reports/{table}", post(handlers::reports::run_report))
        .route(
            "/api/v1/emergency-access",
            post(handlers::emergency::request_emergency_access),
        )
        .route(
            "/api/v1/emergency-access/{id}",
            delete(handlers::emergency::revoke_emergency_access),
        );

    // 合规管理（需要管理员角色）
    let admin_routes = Router::new()
        .route(
            "/api/v1/admin/retention-policies",
            get(handlers::admin::list_policies).put(handlers::admin::upsert_policy),
        )
        .route(
            "/api/v1/admin/audit/{id}/legal-hold",
            put(handlers::admin::set_legal_hold),
        )
        .route("/api/v1/admin/retention/sweep", post(handlers::admin::run_sweep));

    // 组合所有路由；layer 自下而上包裹，追踪最外层，会话上下文最内层
    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .merge(admin_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::session_context_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.jwt_service.clone(),
            crate::auth::middleware::optional_auth_middleware,
        ))
        .layer(axum::middleware::from_fn(crate::middleware::request_tracking_middleware))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
