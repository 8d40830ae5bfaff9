//! Audit domain models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// 审计动作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Read,
    Update,
    Delete,
    Login,
    Logout,
    Export,
    Share,
    EmergencyAccess,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Read => "read",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Login => "login",
            AuditAction::Logout => "logout",
            AuditAction::Export => "export",
            AuditAction::Share => "share",
            AuditAction::EmergencyAccess => "emergency_access",
        }
    }

    /// 是否为数据变更动作
    pub fn is_mutation(&self) -> bool {
        matches!(self, AuditAction::Create | AuditAction::Update | AuditAction::Delete)
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuditAction::Create),
            "read" => Ok(AuditAction::Read),
            "update" => Ok(AuditAction::Update),
            "delete" => Ok(AuditAction::Delete),
            "login" => Ok(AuditAction::Login),
            "logout" => Ok(AuditAction::Logout),
            "export" => Ok(AuditAction::Export),
            "share" => Ok(AuditAction::Share),
            "emergency_access" => Ok(AuditAction::EmergencyAccess),
            other => Err(format!("unknown audit action: {}", other)),
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit record (append-only)
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditRecord {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub principal_id: Option<Uuid>,
    pub child_id: Option<Uuid>,
    pub action: String,
    pub table_name: String,
    pub record_id: Option<Uuid>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub changes: Option<serde_json::Value>,
    pub source_ip: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub metadata: serde_json::Value,
    pub retention_expires_at: Option<DateTime<Utc>>,
    pub legal_hold: bool,
}

impl AuditRecord {
    pub fn action_kind(&self) -> Option<AuditAction> {
        self.action.parse().ok()
    }
}

/// 非数据变更类审计事件（读取、导出、紧急访问等）
#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub table_name: String,
    pub record_id: Option<Uuid>,
    pub child_id: Option<Uuid>,
    pub metadata: serde_json::Value,
}

/// Activity log filters
#[derive(Debug, Default, Deserialize)]
pub struct AuditLogFilters {
    pub action: Option<String>,
    pub table_name: Option<String>,
    pub child_id: Option<Uuid>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}
