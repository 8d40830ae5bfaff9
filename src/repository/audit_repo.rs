//! Audit repository (审计数据访问)
//!
//! 审计表只追加：没有更新业务字段的方法，删除只发生在保留策略清理中。

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::{error::AppError, models::audit::*, repository::predicate::RowPredicate};

pub struct AuditRepository {
    db: PgPool,
}

impl AuditRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 在调用方的事务（或保存点）内追加一条审计记录
    pub async fn insert(conn: &mut PgConnection, record: &AuditRecord) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, occurred_at, principal_id, child_id, action, table_name, record_id,
                old_values, new_values, changes, source_ip, user_agent, request_id,
                metadata, retention_expires_at, legal_hold
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(record.id)
        .bind(record.occurred_at)
        .bind(record.principal_id)
        .bind(record.child_id)
        .bind(&record.action)
        .bind(&record.table_name)
        .bind(record.record_id)
        .bind(&record.old_values)
        .bind(&record.new_values)
        .bind(&record.changes)
        .bind(&record.source_ip)
        .bind(&record.user_agent)
        .bind(&record.request_id)
        .bind(&record.metadata)
        .bind(record.retention_expires_at)
        .bind(record.legal_hold)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// 查询谓词可见的审计记录
    pub async fn query_activity(
        &self,
        predicate: &RowPredicate,
        filters: &AuditLogFilters,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditRecord>, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT r.* FROM audit_log r WHERE ");
        push_filters(&mut qb, predicate, filters);
        qb.push(" ORDER BY r.occurred_at DESC LIMIT ");
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let records = qb.build_query_as::<AuditRecord>().fetch_all(&self.db).await?;
        Ok(records)
    }

    /// 统计谓词可见的审计记录数量
    pub async fn count_activity(
        &self,
        predicate: &RowPredicate,
        filters: &AuditLogFilters,
    ) -> Result<i64, AppError> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_log r WHERE ");
        push_filters(&mut qb, predicate, filters);

        let count = qb.build_query_scalar::<i64>().fetch_one(&self.db).await?;
        Ok(count)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<AuditRecord>, AppError> {
        let record = sqlx::query_as::<_, AuditRecord>("SELECT * FROM audit_log WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?;

        Ok(record)
    }

    /// 设置或解除法律保全（审计表上唯一允许的更新）
    pub async fn set_legal_hold(&self, id: Uuid, legal_hold: bool) -> Result<Option<AuditRecord>, AppError> {
        let record = sqlx::query_as::<_, AuditRecord>(
            "UPDATE audit_log SET legal_hold = $2 WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(legal_hold)
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }

    /// 删除一批已过期且未被保全的记录，被其他事务锁住的行跳过
    pub async fn purge_batch(
        conn: &mut PgConnection,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            r#"
            DELETE FROM audit_log
            WHERE id IN (
                SELECT id FROM audit_log
                WHERE retention_expires_at < $1 AND NOT legal_hold
                ORDER BY retention_expires_at
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            "#,
        )
        .bind(now)
        .bind(batch_size)
        .execute(conn)
        .await?;

        Ok(result.rows_affected())
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, predicate: &RowPredicate, filters: &AuditLogFilters) {
    qb.push("(");
    predicate.push_sql(qb, "r");
    qb.push(")");

    if let Some(action) = &filters.action {
        qb.push(" AND r.action = ");
        qb.push_bind(action.clone());
    }
    if let Some(table_name) = &filters.table_name {
        qb.push(" AND r.table_name = ");
        qb.push_bind(table_name.clone());
    }
    if let Some(child_id) = filters.child_id {
        qb.push(" AND r.child_id = ");
        qb.push_bind(child_id);
    }
    if let Some(start_time) = filters.start_time {
        qb.push(" AND r.occurred_at >= ");
        qb.push_bind(start_time);
    }
    if let Some(end_time) = filters.end_time {
        qb.push(" AND r.occurred_at <= ");
        qb.push_bind(end_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filters_follow_predicate() {
        let me = Uuid::new_v4();
        let filters = AuditLogFilters {
            action: Some("update".to_string()),
            child_id: Some(Uuid::new_v4()),
            ..Default::default()
        };

        let mut qb = QueryBuilder::<Postgres>::new("SELECT r.* FROM audit_log r WHERE ");
        push_filters(&mut qb, &RowPredicate::column_equals("principal_id", me), &filters);

        assert_eq!(
            qb.sql(),
            "SELECT r.* FROM audit_log r WHERE (r.principal_id = $1) AND r.action = $2 AND r.child_id = $3"
        );
    }

    #[test]
    fn test_deny_predicate_matches_nothing() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM audit_log r WHERE ");
        push_filters(&mut qb, &RowPredicate::deny(), &AuditLogFilters::default());
        assert_eq!(qb.sql(), "SELECT COUNT(*) FROM audit_log r WHERE (FALSE)");
    }
}
