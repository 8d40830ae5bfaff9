//! 会话上下文
//!
//! 每个请求（或后台任务）持有一个显式的 [`SessionContext`]，沿调用链逐层传递，
//! 不存在进程级的“当前用户”全局状态。写入数据库时通过事务级 `set_config(..., true)`
//! 下发到连接上，事务结束即失效，连接池复用连接时不会串到下一个请求。

use axum::{extract::FromRequestParts, http::request::Parts};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgConnection;
use uuid::Uuid;

/// 主体类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// 家长、监护人等终端用户
    #[default]
    User,
    /// 服务账号
    Service,
}

/// 当前操作的主体，只被引用，从不持久化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub kind: PrincipalKind,
    pub roles: Vec<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    /// 存在生效中的紧急访问授权
    pub emergency_access: bool,
}

impl Principal {
    pub fn user(id: Uuid) -> Self {
        Self {
            id,
            kind: PrincipalKind::User,
            roles: Vec::new(),
            ip: None,
            user_agent: None,
            emergency_access: false,
        }
    }

    pub fn service(id: Uuid) -> Self {
        Self {
            kind: PrincipalKind::Service,
            ..Self::user(id)
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// 一个工作单元（请求或后台任务）的上下文句柄
#[derive(Debug, Clone)]
pub struct SessionContext {
    principal: Option<Principal>,
    request_id: String,
    started_at: DateTime<Utc>,
}

impl SessionContext {
    /// 建立请求上下文
    pub fn set_context(principal_id: Uuid, ip: Option<String>, user_agent: Option<String>) -> Self {
        let principal = Principal {
            ip,
            user_agent,
            ..Principal::user(principal_id)
        };
        Self::for_principal(principal)
    }

    pub fn for_principal(principal: Principal) -> Self {
        Self {
            principal: Some(principal),
            request_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
        }
    }

    /// 无主体上下文（系统任务、未认证请求）
    pub fn system() -> Self {
        Self {
            principal: None,
            request_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    /// 当前主体；`None` 即“无主体”哨兵，租户范围内的操作会因此被拒绝
    pub fn current_principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn principal_id(&self) -> Option<Uuid> {
        self.principal.as_ref().map(|p| p.id)
    }

    pub fn principal_mut(&mut self) -> Option<&mut Principal> {
        self.principal.as_mut()
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ip(&self) -> Option<&str> {
        self.principal.as_ref().and_then(|p| p.ip.as_deref())
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.principal.as_ref().and_then(|p| p.user_agent.as_deref())
    }

    /// 结束工作单元
    pub fn clear(&mut self) {
        self.principal = None;
    }

    /// 把上下文下发到当前事务（事务级设置，提交或回滚后自动失效）
    pub async fn apply(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        let principal_id = self
            .principal_id()
            .map(|id| id.to_string())
            .unwrap_or_default();

        sqlx::query(
            r#"
            SELECT
                set_config('app.current_principal_id', $1, true),
                set_config('app.request_ip', $2, true),
                set_config('app.user_agent', $3, true),
                set_config('app.request_id', $4, true)
            "#,
        )
        .bind(principal_id)
        .bind(self.ip().unwrap_or_default())
        .bind(self.user_agent().unwrap_or_default())
        .bind(&self.request_id)
        .execute(conn)
        .await?;

        Ok(())
    }
}

// 中间件未设置上下文时退化为无主体上下文，后续隔离检查会据此拒绝
impl<S> FromRequestParts<S> for SessionContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<SessionContext>()
            .cloned()
            .unwrap_or_else(SessionContext::system))
    }
}
