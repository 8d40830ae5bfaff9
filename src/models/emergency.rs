//! Emergency access models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// 限时紧急访问授权
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmergencyGrant {
    pub id: Uuid,
    pub principal_id: Uuid,
    pub reason: String,
    pub authorized_by: Uuid,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl EmergencyGrant {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.granted_at <= now && now < self.expires_at
    }
}

/// 申请紧急访问
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EmergencyAccessRequest {
    #[validate(length(min = 10, max = 500))]
    pub reason: String,
    pub authorized_by: Uuid,
    #[validate(range(min = 1, max = 1440))]
    pub duration_minutes: u32,
}
