//! 脱敏报表入口
//!
//! 报表角色跨家庭读取数据的唯一途径。每一行都经过与审计记录器相同的脱敏函数，
//! 任何一行脱敏失败则整个查询失败，绝不返回部分未脱敏的数据。

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

use crate::context::SessionContext;
use crate::error::AppError;
use crate::models::anonymization::RedactedRow;
use crate::models::audit::{AuditAction, AuditEvent};
use crate::models::Row;
use crate::repository::RowRepository;
use crate::services::anonymizer::anonymize;
use crate::services::audit_service::{AuditOutcome, AuditService};
use crate::services::table_registry::TableRegistry;

/// 报表查询参数
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ReportQuery {
    /// 只能按原样保留的字段做等值过滤
    #[serde(default)]
    pub filters: Row,
    #[serde(default = "default_limit")]
    #[validate(range(min = 1, max = 10000))]
    pub limit: i64,
}

fn default_limit() -> i64 {
    1000
}

/// 报表结果
#[derive(Debug, Clone, Serialize)]
pub struct ReportResult {
    pub table: String,
    pub entity_class: &'static str,
    pub rows: Vec<RedactedRow>,
}

pub struct ReportingService {
    db: PgPool,
    registry: Arc<TableRegistry>,
    audit: Arc<AuditService>,
    reporting_role: String,
}

impl ReportingService {
    pub fn new(db: PgPool, registry: Arc<TableRegistry>, audit: Arc<AuditService>, reporting_role: String) -> Self {
        Self {
            db,
            registry,
            audit,
            reporting_role,
        }
    }

    /// 唯一的报表查询入口
    pub async fn query_with_redaction(
        &self,
        ctx: &SessionContext,
        table: &str,
        query: &ReportQuery,
    ) -> Result<ReportResult, AppError> {
        query.validate()?;

        let principal = ctx.current_principal().ok_or(AppError::Unauthorized)?;
        if !principal.has_role(&self.reporting_role) {
            tracing::warn!(
                principal_id = %principal.id,
                table = %table,
                "Report requested without reporting role"
            );
            return Err(AppError::Forbidden);
        }

        let registration = self.registry.require(table)?;
        let class = match (registration.reportable(), registration.sensitive_class()) {
            (true, Some(class)) => class,
            _ => return Err(AppError::NotFound(format!("report for {}", table))),
        };

        if let Some(field) = query
            .filters
            .keys()
            .find(|key| !class.passthrough_fields().any(|allowed| allowed == key.as_str()))
        {
            return Err(AppError::Validation(format!(
                "field '{}' cannot be used as a report filter",
                field
            )));
        }

        let mut tx = self.db.begin().await?;
        ctx.apply(&mut tx).await?;

        let raw = RowRepository::select_for_report(&mut tx, &registration, &query.filters, query.limit).await?;

        let as_of = Utc::now().date_naive();
        let rows = raw
            .iter()
            .map(|row| anonymize(class, row, as_of))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                tracing::error!(table = %table, error = %e, "Report redaction failed, no rows returned");
                metrics::counter!("report_redaction_failures_total", "table" => table.to_string()).increment(1);
                AppError::ReportUnavailable(e.to_string())
            })?;

        let event = AuditEvent {
            action: AuditAction::Export,
            table_name: table.to_string(),
            record_id: None,
            child_id: None,
            metadata: json!({
                "rows": rows.len(),
                "filters": query.filters.keys().collect::<Vec<_>>(),
                "entity_class": class.as_str(),
            }),
        };
        if let AuditOutcome::Failed(e) = self.audit.record_event(&mut tx, ctx, event).await {
            tracing::warn!(table = %table, error = %e, "Export event not recorded");
        }

        tx.commit().await?;

        tracing::info!(
            principal_id = %principal.id,
            table = %table,
            rows = rows.len(),
            "Redacted report served"
        );

        Ok(ReportResult {
            table: table.to_string(),
            entity_class: class.as_str(),
            rows,
        })
    }
}
