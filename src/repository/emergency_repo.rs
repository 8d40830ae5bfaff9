//! Emergency access grant repository

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::{error::AppError, models::emergency::EmergencyGrant};

pub struct EmergencyRepository {
    db: PgPool,
}

impl EmergencyRepository {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// 在调用方事务内写入授权，与对应的审计记录一起提交
    pub async fn insert_grant(conn: &mut PgConnection, grant: &EmergencyGrant) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO emergency_access_grants (id, principal_id, reason, authorized_by, granted_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(grant.id)
        .bind(grant.principal_id)
        .bind(&grant.reason)
        .bind(grant.authorized_by)
        .bind(grant.granted_at)
        .bind(grant.expires_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// 主体当前生效的授权（取最晚到期的一条）
    pub async fn active_grant(
        &self,
        principal_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<EmergencyGrant>, AppError> {
        let grant = sqlx::query_as::<_, EmergencyGrant>(
            r#"
            SELECT * FROM emergency_access_grants
            WHERE principal_id = $1
              AND revoked_at IS NULL
              AND granted_at <= $2
              AND expires_at > $2
            ORDER BY expires_at DESC
            LIMIT 1
            "#,
        )
        .bind(principal_id)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;

        Ok(grant)
    }

    /// 提前撤销授权
    pub async fn revoke(&self, id: Uuid, principal_id: Uuid) -> Result<Option<EmergencyGrant>, AppError> {
        let grant = sqlx::query_as::<_, EmergencyGrant>(
            r#"
            UPDATE emergency_access_grants
            SET revoked_at = NOW()
            WHERE id = $1 AND principal_id = $2 AND revoked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(principal_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(grant)
    }
}
