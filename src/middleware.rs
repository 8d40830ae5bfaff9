//! HTTP 中间件
//! 请求追踪、会话上下文

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
    auth::{AuthContext, JwtService},
    config::AppConfig,
    context::{Principal, SessionContext},
    error::AppError,
    repository::MembershipRepository,
    services::{
        partition_service::PgPartitionDdl, AuditService, EmergencyService, IsolationEnforcer,
        PartitionManager, ReportingService, RetentionService, TableRegistry, TenantStore,
    },
};

/// 应用状态
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: sqlx::PgPool,
    pub registry: Arc<TableRegistry>,
    pub jwt_service: Arc<JwtService>,
    pub enforcer: Arc<IsolationEnforcer>,
    pub audit_service: Arc<AuditService>,
    pub tenant_store: Arc<TenantStore>,
    pub reporting_service: Arc<ReportingService>,
    pub retention_service: Arc<RetentionService>,
    pub emergency_service: Arc<EmergencyService>,
    pub partitions: Arc<PartitionManager>,
}

impl AppState {
    /// 组装所有服务
    pub fn build(config: AppConfig, db: sqlx::PgPool, registry: TableRegistry) -> Result<Self, AppError> {
        let registry = Arc::new(registry);
        let jwt_service = Arc::new(JwtService::from_config(&config)?);

        let memberships = Arc::new(MembershipRepository::new(db.clone(), registry.membership().clone()));
        let enforcer = Arc::new(IsolationEnforcer::new(registry.clone(), memberships));
        let audit_service = Arc::new(AuditService::new(db.clone(), registry.clone()));
        let partitions = Arc::new(PartitionManager::new(
            registry.clone(),
            Arc::new(PgPartitionDdl::new(db.clone())),
        ));

        let tenant_store = Arc::new(TenantStore::new(
            db.clone(),
            enforcer.clone(),
            audit_service.clone(),
            partitions.clone(),
        ));
        let reporting_service = Arc::new(ReportingService::new(
            db.clone(),
            registry.clone(),
            audit_service.clone(),
            config.security.reporting_role.clone(),
        ));
        let retention_service = Arc::new(RetentionService::new(
            db.clone(),
            registry.clone(),
            config.retention.clone(),
        ));
        let emergency_service = Arc::new(EmergencyService::new(
            db.clone(),
            audit_service.clone(),
            config.security.emergency_role.clone(),
            config.security.emergency_max_minutes,
        ));

        Ok(Self {
            config,
            db,
            registry,
            jwt_service,
            enforcer,
            audit_service,
            tenant_store,
            reporting_service,
            retention_service,
            emergency_service,
            partitions,
        })
    }
}

/// 当前请求的 request_id（由追踪中间件写入请求扩展）
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// 请求追踪中间件
/// 为每个请求生成 trace_id 和 request_id，并记录指标
pub async fn request_tracking_middleware(mut req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(req.headers());
    let request_id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(RequestId(request_id.clone()));

    let method = req.method().to_string();
    let uri = req.uri().path().to_string();

    let span = tracing::info_span!(
        "http_request",
        trace_id = %trace_id,
        request_id = %request_id,
        method = %method,
        uri = %uri,
    );

    async move {
        let start = Instant::now();

        let mut response = next.run(req).await;

        let elapsed = start.elapsed();
        let status = response.status().as_u16();

        metrics::counter!(
            "http_requests_total",
            "method" => method.clone(),
            "status" => status.to_string()
        )
        .increment(1);
        metrics::histogram!("http_request_duration_seconds").record(elapsed.as_secs_f64());

        tracing::info!(
            method = %method,
            uri = %uri,
            status = status,
            elapsed_ms = elapsed.as_millis(),
            "Request completed"
        );

        // 在响应头中添加 trace_id
        if let Ok(value) = HeaderValue::from_str(&trace_id) {
            response.headers_mut().insert("x-trace-id", value);
        }
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert("x-request-id", value);
        }

        response
    }
    .instrument(span)
    .await
}

/// 从请求头中提取或生成 trace_id
fn extract_or_generate_trace_id(headers: &HeaderMap) -> String {
    headers
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// 会话上下文中间件
///
/// 由认证结果、客户端地址和 User-Agent 建立 [`SessionContext`]，放入请求扩展。
/// 未认证的请求得到无主体上下文。
pub async fn session_context_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let request_id = req.extensions().get::<RequestId>().map(|r| r.0.clone());

    let ctx = match req.extensions().get::<AuthContext>().cloned() {
        Some(auth) => {
            let mut principal = Principal {
                kind: auth.kind,
                ip: client_ip(&req, state.config.security.trust_proxy),
                user_agent: user_agent(req.headers()),
                ..Principal::user(auth.principal_id)
            }
            .with_roles(auth.roles);

            // 失去响应角色后授权不再生效；查询失败时按无授权处理
            principal.emergency_access = state.emergency_service.is_responder(&principal)
                && match state.emergency_service.active_grant(auth.principal_id).await {
                    Ok(grant) => grant.is_some(),
                    Err(e) => {
                        tracing::warn!(
                            principal_id = %auth.principal_id,
                            error = %e,
                            "Emergency grant lookup failed"
                        );
                        false
                    }
                };

            SessionContext::for_principal(principal)
        }
        None => SessionContext::system(),
    };

    let ctx = match request_id {
        Some(id) => ctx.with_request_id(id),
        None => ctx,
    };

    req.extensions_mut().insert(ctx);
    next.run(req).await
}

/// 获取客户端 IP 地址
pub fn client_ip(req: &Request, trust_proxy: bool) -> Option<String> {
    let headers = req.headers();

    // 如果信任代理，从 X-Forwarded-For 获取
    if trust_proxy {
        if let Some(forwarded_for) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            // X-Forwarded-For 可能包含多个 IP，取第一个
            if let Some(first_ip) = forwarded_for.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return Some(first_ip.to_string());
                }
            }
        }

        // 尝试 X-Real-IP
        if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            return Some(real_ip.to_string());
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    #[test]
    fn test_extract_or_generate_trace_id() {
        let mut headers = HeaderMap::new();
        headers.insert("x-trace-id", "test-trace-123".parse().unwrap());

        let trace_id = extract_or_generate_trace_id(&headers);
        assert_eq!(trace_id, "test-trace-123");

        let headers = HeaderMap::new();
        let trace_id = extract_or_generate_trace_id(&headers);
        assert!(!trace_id.is_empty());
        assert_ne!(trace_id, "test-trace-123");
    }

    #[test]
    fn test_client_ip_from_forwarded_header() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        assert_eq!(client_ip(&req, true).as_deref(), Some("203.0.113.9"));
        assert_eq!(client_ip(&req, false), None);
    }

    #[test]
    fn test_client_ip_from_connect_info() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        req.extensions_mut()
            .insert(ConnectInfo("192.0.2.4:5555".parse::<SocketAddr>().unwrap()));

        assert_eq!(client_ip(&req, true).as_deref(), Some("192.0.2.4"));
    }
}
