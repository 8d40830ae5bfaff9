//! Retention policy repository (保留策略)

use sqlx::{PgConnection, PgPool};

use crate::{error::AppError, models::retention::*};

pub struct RetentionRepository {
    db: PgPool,
}

impl RetentionRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 读取表的生效策略（在写审计记录的事务内调用）
    pub async fn find_active(
        conn: &mut PgConnection,
        table_name: &str,
    ) -> Result<Option<RetentionPolicy>, sqlx::Error> {
        sqlx::query_as::<_, RetentionPolicy>(
            "SELECT * FROM retention_policies WHERE table_name = $1 AND active",
        )
        .bind(table_name)
        .fetch_optional(conn)
        .await
    }

    pub async fn list(&self) -> Result<Vec<RetentionPolicy>, AppError> {
        let policies = sqlx::query_as::<_, RetentionPolicy>(
            "SELECT * FROM retention_policies ORDER BY table_name",
        )
        .fetch_all(&self.db)
        .await?;

        Ok(policies)
    }

    /// 新增或更新策略；只影响之后写入的审计记录
    pub async fn upsert(&self, req: &UpsertRetentionPolicyRequest) -> Result<RetentionPolicy, AppError> {
        let policy = sqlx::query_as::<_, RetentionPolicy>(
            r#"
            INSERT INTO retention_policies (table_name, retention_days, criteria, active, legal_basis, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            ON CONFLICT (table_name) DO UPDATE SET
                retention_days = EXCLUDED.retention_days,
                criteria = EXCLUDED.criteria,
                active = EXCLUDED.active,
                legal_basis = EXCLUDED.legal_basis,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(&req.table_name)
        .bind(req.retention_days)
        .bind(&req.criteria)
        .bind(req.active)
        .bind(&req.legal_basis)
        .fetch_one(&self.db)
        .await?;

        Ok(policy)
    }
}
