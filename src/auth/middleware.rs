//! JWT 认证中间件

use crate::{auth::jwt::JwtService, context::PrincipalKind, error::AppError};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use uuid::Uuid;

/// 认证上下文（附加到请求扩展）
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal_id: Uuid,
    pub kind: PrincipalKind,
    pub roles: Vec<String>,
}

// 实现 FromRequestParts 以便在 handler 中直接提取 AuthContext
impl<S> FromRequestParts<S> for AuthContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .ok_or(AppError::Unauthorized)
    }
}

/// 从 Authorization 头提取令牌
pub fn extract_token(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(str::to_string)
        .ok_or(AppError::Unauthorized)
}

fn auth_context(jwt_service: &JwtService, headers: &HeaderMap) -> Result<AuthContext, AppError> {
    let token = extract_token(headers)?;
    let claims = jwt_service.validate_token(&token)?;

    Ok(AuthContext {
        principal_id: claims.principal_id()?,
        kind: claims.kind.unwrap_or_default(),
        roles: claims.roles,
    })
}

/// 可选认证 - 不强制要求令牌；无令牌的请求以无主体上下文继续，受保护的操作会被拒绝
pub async fn optional_auth_middleware(
    State(jwt_service): State<Arc<JwtService>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Ok(auth_context) = auth_context(&jwt_service, req.headers()) {
        req.extensions_mut().insert(auth_context);
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_token_valid() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer test_token_123".parse().unwrap());

        let token = extract_token(&headers).unwrap();
        assert_eq!(token, "test_token_123");
    }

    #[test]
    fn test_extract_token_missing() {
        let headers = HeaderMap::new();
        assert!(extract_token(&headers).is_err());
    }

    #[test]
    fn test_extract_token_invalid_format() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "InvalidFormat".parse().unwrap());

        assert!(extract_token(&headers).is_err());
    }
}
