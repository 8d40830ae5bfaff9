//! 紧急访问
//!
//! 只有持有紧急响应角色的主体可以申请；授权限时生效，必须注明原因和批准人。授权与对应的审计记录在同一事务中提交，
//! 审计记录写不进去时授权也不生效。授权和每一次使用都会发出安全告警日志。

use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::context::{Principal, SessionContext};
use crate::error::AppError;
use crate::models::audit::{AuditAction, AuditEvent};
use crate::models::emergency::{EmergencyAccessRequest, EmergencyGrant};
use crate::repository::EmergencyRepository;
use crate::services::audit_service::{AuditOutcome, AuditService};
use crate::telemetry::SECURITY_ALERT_TARGET;

pub struct EmergencyService {
    db: PgPool,
    audit: Arc<AuditService>,
    responder_role: String,
    max_minutes: u32,
}

impl EmergencyService {
    pub fn new(db: PgPool, audit: Arc<AuditService>, responder_role: String, max_minutes: u32) -> Self {
        Self {
            db,
            audit,
            responder_role,
            max_minutes,
        }
    }

    /// 是否持有紧急响应角色
    pub fn is_responder(&self, principal: &Principal) -> bool {
        principal.has_role(&self.responder_role)
    }

    /// 申请紧急访问授权
    pub async fn grant_emergency_access(
        &self,
        ctx: &SessionContext,
        req: &EmergencyAccessRequest,
    ) -> Result<EmergencyGrant, AppError> {
        let principal = ctx.current_principal().ok_or(AppError::Unauthorized)?;
        let principal_id = principal.id;
        if !self.is_responder(principal) {
            tracing::warn!(
                target: SECURITY_ALERT_TARGET,
                principal_id = %principal_id,
                authorized_by = %req.authorized_by,
                "Emergency access requested without responder role"
            );
            return Err(AppError::Forbidden);
        }

        req.validate()?;

        if req.authorized_by == principal_id {
            return Err(AppError::validation("emergency access cannot be self-authorized"));
        }
        if req.duration_minutes > self.max_minutes {
            return Err(AppError::Validation(format!(
                "duration_minutes must not exceed {}",
                self.max_minutes
            )));
        }

        let now = Utc::now();
        let grant = EmergencyGrant {
            id: Uuid::new_v4(),
            principal_id,
            reason: req.reason.clone(),
            authorized_by: req.authorized_by,
            granted_at: now,
            expires_at: now + Duration::minutes(i64::from(req.duration_minutes)),
            revoked_at: None,
        };

        let mut tx = self.db.begin().await?;
        ctx.apply(&mut tx).await?;

        EmergencyRepository::insert_grant(&mut tx, &grant).await?;

        let event = AuditEvent {
            action: AuditAction::EmergencyAccess,
            table_name: "emergency_access_grants".to_string(),
            record_id: Some(grant.id),
            child_id: None,
            metadata: json!({
                "reason": grant.reason,
                "authorized_by": grant.authorized_by,
                "expires_at": grant.expires_at,
            }),
        };

        match self.audit.record_event(&mut tx, ctx, event).await {
            AuditOutcome::Recorded(_) => {}
            AuditOutcome::Failed(e) => {
                return Err(AppError::Internal(format!("emergency access audit failed: {}", e)));
            }
            AuditOutcome::Skipped(reason) => {
                return Err(AppError::Internal(format!("emergency access audit skipped: {:?}", reason)));
            }
        }

        tx.commit().await?;

        tracing::warn!(
            target: SECURITY_ALERT_TARGET,
            principal_id = %grant.principal_id,
            authorized_by = %grant.authorized_by,
            grant_id = %grant.id,
            expires_at = %grant.expires_at,
            reason = %grant.reason,
            "Emergency access granted"
        );
        metrics::counter!("emergency_access_grants_total").increment(1);

        Ok(grant)
    }

    /// 主体当前生效的授权
    pub async fn active_grant(&self, principal_id: Uuid) -> Result<Option<EmergencyGrant>, AppError> {
        EmergencyRepository::new(self.db.clone())
            .active_grant(principal_id, Utc::now())
            .await
    }

    /// 撤销自己的授权
    pub async fn revoke(&self, ctx: &SessionContext, grant_id: Uuid) -> Result<EmergencyGrant, AppError> {
        let principal_id = ctx.principal_id().ok_or(AppError::Unauthorized)?;

        let grant = EmergencyRepository::new(self.db.clone())
            .revoke(grant_id, principal_id)
            .await?
            .ok_or_else(|| AppError::not_found("emergency access grant"))?;

        tracing::warn!(
            target: SECURITY_ALERT_TARGET,
            principal_id = %principal_id,
            grant_id = %grant_id,
            "Emergency access revoked"
        );

        Ok(grant)
    }
}
