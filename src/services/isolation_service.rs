//! 家庭数据隔离
//!
//! 隔离策略只产出 [`RowPredicate`]，本身不执行查询。
//! 拒绝一律表现为“不存在”，调用方无法区分“别人的数据”与“没有数据”。

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::context::{Principal, PrincipalKind, SessionContext};
use crate::models::table::TenantLink;
use crate::models::Row;
use crate::repository::predicate::RowPredicate;
use crate::services::table_registry::{TableRegistration, TableRegistry};
use crate::telemetry::SECURITY_ALERT_TARGET;

/// 表操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOperation {
    Select,
    Insert,
    Update,
    Delete,
}

impl TableOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableOperation::Select => "select",
            TableOperation::Insert => "insert",
            TableOperation::Update => "update",
            TableOperation::Delete => "delete",
        }
    }
}

/// 隔离错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IsolationError {
    #[error("row of '{table}' is not visible to the current principal")]
    Denied { table: String },

    #[error("table '{0}' is not registered")]
    UnregisteredTable(String),
}

/// 成员关系来源
#[async_trait]
pub trait MembershipSource: Send + Sync {
    /// 主体当前所属的家庭（已软退出的不算）
    async fn tenants_of(&self, principal_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error>;
}

/// 一次请求内解析好的租户范围
#[derive(Debug, Clone)]
pub struct TenantScope {
    principal: Option<Principal>,
    tenants: Vec<Uuid>,
}

impl TenantScope {
    pub fn new(principal: Option<Principal>, tenants: Vec<Uuid>) -> Self {
        Self { principal, tenants }
    }

    /// 无主体：所有租户范围内的表都不可见
    pub fn nobody() -> Self {
        Self::new(None, Vec::new())
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    pub fn tenants(&self) -> &[Uuid] {
        &self.tenants
    }
}

/// 隔离策略执行器
#[derive(Clone)]
pub struct IsolationEnforcer {
    registry: Arc<TableRegistry>,
    memberships: Arc<dyn MembershipSource>,
}

impl IsolationEnforcer {
    pub fn new(registry: Arc<TableRegistry>, memberships: Arc<dyn MembershipSource>) -> Self {
        Self {
            registry,
            memberships,
        }
    }

    pub fn registry(&self) -> &Arc<TableRegistry> {
        &self.registry
    }

    /// 解析当前主体的租户范围；无主体时不访问数据库
    pub async fn resolve_scope(&self, ctx: &SessionContext) -> Result<TenantScope, sqlx::Error> {
        let Some(principal) = ctx.current_principal() else {
            return Ok(TenantScope::nobody());
        };

        let tenants = self.memberships.tenants_of(principal.id).await?;
        Ok(TenantScope::new(Some(principal.clone()), tenants))
    }

    /// 生成某主体对某表某操作的可见性谓词
    pub fn authorize(
        &self,
        scope: &TenantScope,
        table: &str,
        operation: TableOperation,
    ) -> Result<RowPredicate, IsolationError> {
        let registration = self
            .registry
            .get(table)
            .ok_or_else(|| IsolationError::UnregisteredTable(table.to_string()))?;

        Ok(self.predicate_for(scope, &registration, operation))
    }

    fn predicate_for(
        &self,
        scope: &TenantScope,
        registration: &TableRegistration,
        operation: TableOperation,
    ) -> RowPredicate {
        let link = registration.tenant_link();
        if link.is_global() {
            return RowPredicate::unrestricted();
        }

        let Some(principal) = scope.principal() else {
            return RowPredicate::deny();
        };

        if principal.emergency_access {
            tracing::warn!(
                target: SECURITY_ALERT_TARGET,
                principal_id = %principal.id,
                table = %registration.name(),
                operation = operation.as_str(),
                "Emergency access used to bypass family isolation"
            );
            metrics::counter!(
                "emergency_access_uses_total",
                "table" => registration.name().to_string()
            )
            .increment(1);
            return RowPredicate::unrestricted();
        }

        // 非强制隔离的表，服务账号视同表所有者
        if principal.kind == PrincipalKind::Service && !registration.force_isolation() {
            return RowPredicate::unrestricted();
        }

        RowPredicate::for_link(link, scope.tenants())
    }

    /// 写入前检查新行是否落在可见范围内
    ///
    /// 经由父实体关联的表由数据库侧的谓词在写语句中复核，这里只能检查直接关联的表。
    pub fn check_write(
        &self,
        predicate: &RowPredicate,
        registration: &TableRegistration,
        row: &Row,
    ) -> Result<(), IsolationError> {
        if predicate.is_unrestricted() {
            return Ok(());
        }

        let denied = || IsolationError::Denied {
            table: registration.name().to_string(),
        };

        if predicate.is_deny() {
            return Err(denied());
        }

        match registration.tenant_link() {
            TenantLink::Direct { .. } => {
                if predicate.admits_tenant(registration.link_value(row)) {
                    Ok(())
                } else {
                    Err(denied())
                }
            }
            TenantLink::Via { .. } => {
                if registration.link_value(row).is_some() {
                    Ok(())
                } else {
                    Err(denied())
                }
            }
            TenantLink::Global => Ok(()),
        }
    }

    /// “我的活动记录”：本人的操作，以及本人所在家庭中儿童的相关事件
    pub fn authorize_activity(&self, scope: &TenantScope) -> RowPredicate {
        let Some(principal) = scope.principal() else {
            return RowPredicate::deny();
        };

        let own = RowPredicate::column_equals("principal_id", principal.id);

        let Some(child_table) = self.registry.activity_child_table() else {
            return own;
        };

        let TenantLink::Direct { column } = child_table.tenant_link() else {
            return own;
        };

        let children = TenantLink::Via {
            column: "child_id".to_string(),
            parent_table: child_table.name().to_string(),
            parent_key: child_table.id_column().to_string(),
            parent_tenant_column: column.clone(),
            parent_archived_column: None,
            parent_active_column: None,
        };

        own.or(RowPredicate::for_link(&children, scope.tenants()))
    }
}
