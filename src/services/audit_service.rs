//! 审计记录服务
//!
//! 每次对已注册表的变更产生一条审计记录，与业务写入在同一事务中提交。
//! 审计写入在保存点内执行：失败只回滚保存点，记录告警和指标，业务写入照常提交。
//! 结果以 [`AuditOutcome`] 返回，调用方能看到审计是否真的写入。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use sqlx::{Connection, PgConnection, PgPool};
use uuid::Uuid;

use crate::context::SessionContext;
use crate::error::AppError;
use crate::models::audit::{AuditAction, AuditEvent, AuditLogFilters, AuditRecord};
use crate::models::diff::RowDiff;
use crate::models::Row;
use crate::repository::{AuditRepository, RetentionRepository};
use crate::services::anonymizer::{anonymize, AnonymizationError};
use crate::services::isolation_service::IsolationEnforcer;
use crate::services::retention_service::stamp_expiry;
use crate::services::table_registry::{TableRegistration, TableRegistry};

/// 审计写入失败的原因
#[derive(Debug, thiserror::Error)]
pub enum AuditWriteFailed {
    #[error("snapshot anonymization failed: {0}")]
    Anonymization(#[from] AnonymizationError),

    #[error("failed to persist audit record: {0}")]
    Persist(#[from] sqlx::Error),

    #[error("mutation carries neither an old nor a new row")]
    EmptyMutation,
}

/// 未写审计记录的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Unregistered,
    AuditDisabled,
}

/// 一次审计捕获的结果
#[must_use]
#[derive(Debug)]
pub enum AuditOutcome {
    Recorded(AuditRecord),
    Skipped(SkipReason),
    Failed(AuditWriteFailed),
}

impl AuditOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, AuditOutcome::Recorded(_))
    }

    pub fn record(&self) -> Option<&AuditRecord> {
        match self {
            AuditOutcome::Recorded(record) => Some(record),
            _ => None,
        }
    }
}

/// 由前后快照是否存在判定变更类型
pub fn classify(old: Option<&Row>, new: Option<&Row>) -> Option<AuditAction> {
    match (old, new) {
        (None, Some(_)) => Some(AuditAction::Create),
        (Some(_), Some(_)) => Some(AuditAction::Update),
        (Some(_), None) => Some(AuditAction::Delete),
        (None, None) => None,
    }
}

/// 审计中保存的快照：敏感表先脱敏
pub fn snapshot(
    registration: &TableRegistration,
    row: &Row,
    as_of: DateTime<Utc>,
) -> Result<Row, AnonymizationError> {
    match registration.sensitive_class() {
        Some(class) => Ok(anonymize(class, row, as_of.date_naive())?.into_row()),
        None => Ok(row.clone()),
    }
}

/// 构造变更审计记录（不访问数据库）
pub fn build_record(
    registration: &TableRegistration,
    ctx: &SessionContext,
    old: Option<&Row>,
    new: Option<&Row>,
    at: DateTime<Utc>,
    retention_expires_at: Option<DateTime<Utc>>,
) -> Result<AuditRecord, AuditWriteFailed> {
    let action = classify(old, new).ok_or(AuditWriteFailed::EmptyMutation)?;

    let principal_id = new
        .and_then(|row| registration.principal_of(row))
        .or_else(|| old.and_then(|row| registration.principal_of(row)))
        .or_else(|| ctx.principal_id());
    let child_id = new
        .and_then(|row| registration.child_of(row))
        .or_else(|| old.and_then(|row| registration.child_of(row)));
    let record_id = new
        .and_then(|row| registration.record_id(row))
        .or_else(|| old.and_then(|row| registration.record_id(row)));

    let old_snapshot = old.map(|row| snapshot(registration, row, at)).transpose()?;
    let new_snapshot = new.map(|row| snapshot(registration, row, at)).transpose()?;

    let diff = RowDiff::between(old_snapshot.as_ref(), new_snapshot.as_ref());

    let metadata = json!({
        "actor_id": ctx.principal_id(),
        "changed_fields": diff.changed_fields(),
        "sensitive_class": registration.sensitive_class().map(|c| c.as_str()),
    });

    Ok(AuditRecord {
        id: Uuid::new_v4(),
        occurred_at: at,
        principal_id,
        child_id,
        action: action.as_str().to_string(),
        table_name: registration.name().to_string(),
        record_id,
        old_values: old_snapshot.map(serde_json::Value::Object),
        new_values: new_snapshot.map(serde_json::Value::Object),
        changes: Some(json!({ "set": diff.set, "removed": diff.removed })),
        source_ip: ctx.ip().map(str::to_string),
        user_agent: ctx.user_agent().map(str::to_string),
        request_id: Some(ctx.request_id().to_string()),
        metadata,
        retention_expires_at,
        legal_hold: false,
    })
}

/// 构造非变更类事件记录
pub fn build_event_record(
    ctx: &SessionContext,
    event: &AuditEvent,
    at: DateTime<Utc>,
    retention_expires_at: Option<DateTime<Utc>>,
) -> AuditRecord {
    AuditRecord {
        id: Uuid::new_v4(),
        occurred_at: at,
        principal_id: ctx.principal_id(),
        child_id: event.child_id,
        action: event.action.as_str().to_string(),
        table_name: event.table_name.clone(),
        record_id: event.record_id,
        old_values: None,
        new_values: None,
        changes: None,
        source_ip: ctx.ip().map(str::to_string),
        user_agent: ctx.user_agent().map(str::to_string),
        request_id: Some(ctx.request_id().to_string()),
        metadata: event.metadata.clone(),
        retention_expires_at,
        legal_hold: false,
    }
}

pub struct AuditService {
    db: PgPool,
    registry: Arc<TableRegistry>,
}

impl AuditService {
    pub fn new(db: PgPool, registry: Arc<TableRegistry>) -> Self {
        Self { db, registry }
    }

    /// 捕获一次变更；`conn` 必须处在业务写入的事务中
    pub async fn on_mutation(
        &self,
        conn: &mut PgConnection,
        ctx: &SessionContext,
        table: &str,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> AuditOutcome {
        let Some(registration) = self.registry.get(table) else {
            tracing::debug!(table = %table, "Table not registered, audit skipped");
            return AuditOutcome::Skipped(SkipReason::Unregistered);
        };
        if !registration.audit_enabled() {
            return AuditOutcome::Skipped(SkipReason::AuditDisabled);
        }

        let now = Utc::now();
        let record = match build_record(&registration, ctx, old, new, now, None) {
            Ok(record) => record,
            Err(e) => return self.failed(table, ctx, e),
        };

        self.persist(conn, ctx, record).await
    }

    /// 记录读取、导出、紧急访问等非变更事件
    pub async fn record_event(
        &self,
        conn: &mut PgConnection,
        ctx: &SessionContext,
        event: AuditEvent,
    ) -> AuditOutcome {
        let record = build_event_record(ctx, &event, Utc::now(), None);
        self.persist(conn, ctx, record).await
    }

    async fn persist(&self, conn: &mut PgConnection, ctx: &SessionContext, mut record: AuditRecord) -> AuditOutcome {
        let table = record.table_name.clone();

        match Self::persist_in_savepoint(conn, &mut record).await {
            Ok(()) => {
                metrics::counter!(
                    "audit_records_total",
                    "table" => table,
                    "action" => record.action.clone()
                )
                .increment(1);
                AuditOutcome::Recorded(record)
            }
            Err(e) => self.failed(&table, ctx, e),
        }
    }

    async fn persist_in_savepoint(conn: &mut PgConnection, record: &mut AuditRecord) -> Result<(), AuditWriteFailed> {
        // 外层事务中 begin 会创建 SAVEPOINT
        let mut savepoint = conn.begin().await?;

        let policy = RetentionRepository::find_active(&mut savepoint, &record.table_name).await?;
        record.retention_expires_at = stamp_expiry(policy.as_ref(), record.occurred_at);
        if policy.is_none() {
            tracing::debug!(
                table = %record.table_name,
                "No active retention policy, audit record kept indefinitely"
            );
        }

        AuditRepository::insert(&mut savepoint, record).await?;
        savepoint.commit().await?;
        Ok(())
    }

    fn failed(&self, table: &str, ctx: &SessionContext, error: AuditWriteFailed) -> AuditOutcome {
        tracing::warn!(
            table = %table,
            request_id = %ctx.request_id(),
            error = %error,
            "Audit capture failed, business write continues"
        );
        metrics::counter!("audit_write_failures_total", "table" => table.to_string()).increment(1);
        AuditOutcome::Failed(error)
    }

    /// 查询“我的活动记录”
    pub async fn query_activity(
        &self,
        enforcer: &IsolationEnforcer,
        ctx: &SessionContext,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<AuditRecord>, i64), AppError> {
        let scope = enforcer.resolve_scope(ctx).await?;
        let predicate = enforcer.authorize_activity(&scope);
        if predicate.is_deny() {
            return Ok((Vec::new(), 0));
        }

        let repo = AuditRepository::new(self.db.clone());
        let records = repo.query_activity(&predicate, filters, limit, offset).await?;
        let total = repo.count_activity(&predicate, filters).await?;
        Ok((records, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::table::{IdSource, TableManifestEntry, TenantLink};
    use crate::models::anonymization::EntityClass;

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    fn child_profiles() -> TableRegistration {
        TableRegistration::new(TableManifestEntry {
            table: "child_profiles".to_string(),
            tenant_link: TenantLink::Direct {
                column: "family_id".to_string(),
            },
            sensitive_class: Some(EntityClass::ChildProfile),
            audit_enabled: true,
            force_isolation: true,
            reportable: true,
            id_column: "id".to_string(),
            principal: IdSource::None,
            child: IdSource::RowId,
            partition: None,
        })
    }

    #[test]
    fn test_classify() {
        let r = Row::new();
        assert_eq!(classify(None, Some(&r)), Some(AuditAction::Create));
        assert_eq!(classify(Some(&r), Some(&r)), Some(AuditAction::Update));
        assert_eq!(classify(Some(&r), None), Some(AuditAction::Delete));
        assert_eq!(classify(None, None), None);
    }

    #[test]
    fn test_empty_mutation_fails() {
        let ctx = SessionContext::system();
        let err = build_record(&child_profiles(), &ctx, None, None, Utc::now(), None).unwrap_err();
        assert!(matches!(err, AuditWriteFailed::EmptyMutation));
    }

    #[test]
    fn test_principal_falls_back_to_session() {
        let actor = Uuid::new_v4();
        let child = Uuid::new_v4();
        let ctx = SessionContext::set_context(actor, Some("10.1.2.3".to_string()), None);
        let new = row(serde_json::json!({
            "id": child.to_string(),
            "family_id": Uuid::new_v4().to_string(),
            "name": "Emma",
            "birth_date": "2022-01-10"
        }));

        let record = build_record(&child_profiles(), &ctx, None, Some(&new), Utc::now(), None).unwrap();

        assert_eq!(record.principal_id, Some(actor));
        assert_eq!(record.child_id, Some(child));
        assert_eq!(record.record_id, Some(child));
        assert_eq!(record.action, "create");
        assert_eq!(record.source_ip.as_deref(), Some("10.1.2.3"));
        assert_eq!(record.request_id.as_deref(), Some(ctx.request_id()));
    }

    #[test]
    fn test_event_record_has_no_snapshots() {
        let ctx = SessionContext::set_context(Uuid::new_v4(), None, None);
        let event = AuditEvent {
            action: AuditAction::Export,
            table_name: "child_profiles".to_string(),
            record_id: None,
            child_id: None,
            metadata: serde_json::json!({"rows": 3}),
        };

        let record = build_event_record(&ctx, &event, Utc::now(), None);
        assert_eq!(record.action, "export");
        assert!(record.old_values.is_none() && record.new_values.is_none());
        assert_eq!(record.metadata["rows"], 3);
    }
}
