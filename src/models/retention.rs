//! Retention policy models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// 单表的保留策略
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RetentionPolicy {
    pub table_name: String,
    pub retention_days: i32,
    pub criteria: serde_json::Value,
    pub active: bool,
    pub legal_basis: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// 新增或更新保留策略
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpsertRetentionPolicyRequest {
    #[validate(length(min = 1, max = 63))]
    pub table_name: String,
    #[validate(range(min = 1, max = 3650))]
    pub retention_days: i32,
    #[serde(default = "default_criteria")]
    pub criteria: serde_json::Value,
    #[serde(default = "default_active")]
    pub active: bool,
    #[validate(length(max = 500))]
    pub legal_basis: Option<String>,
}

/// 设置或解除法律保全
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LegalHoldRequest {
    pub legal_hold: bool,
    #[validate(length(min = 3, max = 500))]
    pub reason: String,
}

/// 单次清理的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub batches: u32,
    pub deleted: u64,
    /// 另一个清理任务持有租约，本次跳过
    pub skipped_locked: bool,
    /// 在批次之间被取消
    pub cancelled: bool,
}

fn default_criteria() -> serde_json::Value {
    serde_json::json!({})
}

fn default_active() -> bool {
    true
}
