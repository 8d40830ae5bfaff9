//! 家庭范围内的行读写
//!
//! 每次写入在一个事务内完成：下发会话上下文、生成隔离谓词、（插入或移动分区列时）确保分区存在、
//! 执行带谓词的写语句、写后复核、捕获审计记录。谓词为 deny 时不访问数据库。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::context::SessionContext;
use crate::error::{AppError, Result};
use crate::models::Row;
use crate::repository::{RowPredicate, RowRepository};
use crate::services::audit_service::{AuditOutcome, AuditService};
use crate::services::isolation_service::{IsolationEnforcer, IsolationError, TableOperation};
use crate::services::partition_service::PartitionManager;
use crate::services::table_registry::TableRegistration;

/// 一次写入的结果
#[derive(Debug)]
pub struct WriteResult {
    pub row: Row,
    /// 审计记录是否写入成功
    pub audited: bool,
}

pub struct TenantStore {
    db: PgPool,
    enforcer: Arc<IsolationEnforcer>,
    audit: Arc<AuditService>,
    partitions: Arc<PartitionManager>,
}

impl TenantStore {
    pub fn new(
        db: PgPool,
        enforcer: Arc<IsolationEnforcer>,
        audit: Arc<AuditService>,
        partitions: Arc<PartitionManager>,
    ) -> Self {
        Self {
            db,
            enforcer,
            audit,
            partitions,
        }
    }

    async fn prepare(
        &self,
        ctx: &SessionContext,
        table: &str,
        operation: TableOperation,
    ) -> Result<(Arc<TableRegistration>, RowPredicate)> {
        let registration = self.enforcer.registry().require(table)?;
        let scope = self.enforcer.resolve_scope(ctx).await?;
        let predicate = self.enforcer.authorize(&scope, table, operation)?;
        Ok((registration, predicate))
    }

    pub async fn list(&self, ctx: &SessionContext, table: &str, limit: i64, offset: i64) -> Result<Vec<Row>> {
        let (registration, predicate) = self.prepare(ctx, table, TableOperation::Select).await?;
        if predicate.is_deny() {
            return Ok(Vec::new());
        }

        let mut conn = self.db.acquire().await?;
        RowRepository::select_rows(&mut conn, &registration, &predicate, limit, offset).await
    }

    pub async fn get(&self, ctx: &SessionContext, table: &str, id: Uuid) -> Result<Row> {
        let (registration, predicate) = self.prepare(ctx, table, TableOperation::Select).await?;
        if predicate.is_deny() {
            return Err(denied(table));
        }

        let mut conn = self.db.acquire().await?;
        RowRepository::select_row(&mut conn, &registration, &predicate, id, false)
            .await?
            .ok_or_else(|| denied(table))
    }

    pub async fn insert(&self, ctx: &SessionContext, table: &str, mut row: Row) -> Result<WriteResult> {
        let (registration, predicate) = self.prepare(ctx, table, TableOperation::Insert).await?;
        self.enforcer.check_write(&predicate, &registration, &row)?;

        if !row.contains_key(registration.id_column()) {
            row.insert(
                registration.id_column().to_string(),
                Value::String(Uuid::new_v4().to_string()),
            );
        }

        if let Some(spec) = registration.partition() {
            let at = match partition_timestamp(&spec.column, &row)? {
                Some(at) => at,
                None => {
                    let now = Utc::now();
                    row.insert(spec.column.clone(), Value::String(now.to_rfc3339()));
                    now
                }
            };
            self.partitions.ensure_partition(table, at).await?;
        }

        let mut tx = self.db.begin().await?;
        ctx.apply(&mut tx).await?;

        let inserted = RowRepository::insert_row(&mut tx, &registration, &predicate, &row)
            .await?
            .ok_or_else(|| denied(table))?;

        let outcome = self
            .audit
            .on_mutation(&mut tx, ctx, table, None, Some(&inserted))
            .await;

        tx.commit().await?;
        Ok(written(inserted, outcome))
    }

    pub async fn update(&self, ctx: &SessionContext, table: &str, id: Uuid, changes: Row) -> Result<WriteResult> {
        let (registration, predicate) = self.prepare(ctx, table, TableOperation::Update).await?;
        if predicate.is_deny() {
            return Err(denied(table));
        }
        if changes.contains_key(registration.id_column()) {
            return Err(AppError::Validation(format!(
                "'{}' cannot be changed",
                registration.id_column()
            )));
        }

        // 行被移到新的时间段时，目标分区要在加行锁之前建好
        if let Some(spec) = registration.partition() {
            if let Some(at) = partition_timestamp(&spec.column, &changes)? {
                self.partitions.ensure_partition(table, at).await?;
            }
        }

        let mut tx = self.db.begin().await?;
        ctx.apply(&mut tx).await?;

        let old = RowRepository::select_row(&mut tx, &registration, &predicate, id, true)
            .await?
            .ok_or_else(|| denied(table))?;

        let mut merged = old.clone();
        merged.extend(changes.clone());
        self.enforcer.check_write(&predicate, &registration, &merged)?;

        let updated = RowRepository::update_row(&mut tx, &registration, &predicate, id, &changes)
            .await?
            .ok_or_else(|| denied(table))?;

        // 修改后的行必须仍然可见，否则整个事务回滚
        if !RowRepository::row_admitted(&mut tx, &registration, &predicate, id).await? {
            return Err(denied(table));
        }

        let outcome = self
            .audit
            .on_mutation(&mut tx, ctx, table, Some(&old), Some(&updated))
            .await;

        tx.commit().await?;
        Ok(written(updated, outcome))
    }

    pub async fn delete(&self, ctx: &SessionContext, table: &str, id: Uuid) -> Result<WriteResult> {
        let (registration, predicate) = self.prepare(ctx, table, TableOperation::Delete).await?;
        if predicate.is_deny() {
            return Err(denied(table));
        }

        let mut tx = self.db.begin().await?;
        ctx.apply(&mut tx).await?;

        let deleted = RowRepository::delete_row(&mut tx, &registration, &predicate, id)
            .await?
            .ok_or_else(|| denied(table))?;

        let outcome = self
            .audit
            .on_mutation(&mut tx, ctx, table, Some(&deleted), None)
            .await;

        tx.commit().await?;
        Ok(written(deleted, outcome))
    }
}

/// 分区列的取值；缺失或为 null 时返回 `None`
fn partition_timestamp(column: &str, row: &Row) -> Result<Option<DateTime<Utc>>> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
            .map(|ts| Some(ts.with_timezone(&Utc)))
            .ok_or_else(|| AppError::Validation(format!("'{}' must be an RFC 3339 timestamp", column))),
    }
}

fn denied(table: &str) -> AppError {
    IsolationError::Denied {
        table: table.to_string(),
    }
    .into()
}

fn written(row: Row, outcome: AuditOutcome) -> WriteResult {
    WriteResult {
        row,
        audited: outcome.is_recorded(),
    }
}
