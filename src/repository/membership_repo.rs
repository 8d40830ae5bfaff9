//! Family membership repository (家庭成员关系)

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::table::MembershipSpec;
use crate::services::isolation_service::MembershipSource;

pub struct MembershipRepository {
    db: PgPool,
    spec: MembershipSpec,
}

impl MembershipRepository {
    /// `spec` 中的标识符已在注册表加载时校验
    pub fn new(db: PgPool, spec: MembershipSpec) -> Self {
        Self { db, spec }
    }

    fn tenants_sql(&self) -> String {
        format!(
            "SELECT DISTINCT {tenant} FROM {table} WHERE {principal} = $1 AND {left} IS NULL",
            tenant = self.spec.tenant_column,
            table = self.spec.table,
            principal = self.spec.principal_column,
            left = self.spec.left_column,
        )
    }
}

#[async_trait]
impl MembershipSource for MembershipRepository {
    async fn tenants_of(&self, principal_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
        sqlx::query_scalar::<_, Uuid>(&self.tenants_sql())
            .bind(principal_id)
            .fetch_all(&self.db)
            .await
    }
}
