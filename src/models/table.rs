//! 表注册清单模型
//!
//! 子系统不定义业务表结构，只通过清单声明每张表如何归属到家庭、
//! 是否审计、属于哪种敏感实体以及是否按时间分区。

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::anonymization::EntityClass;
use super::partition::PartitionPeriod;

/// 与表结构无关的行表示（`to_jsonb(row)` 的结果）
pub type Row = serde_json::Map<String, serde_json::Value>;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("identifier regex is valid"));

/// 校验 SQL 标识符（表名、列名只允许小写字母、数字、下划线）
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// 表到家庭（租户）的归属规则
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TenantLink {
    /// 表上直接有家庭 id 列
    Direct { column: String },
    /// 经由父实体关联（例如 child_id → child_profiles.family_id）
    Via {
        column: String,
        parent_table: String,
        #[serde(default = "default_id_column")]
        parent_key: String,
        parent_tenant_column: String,
        /// 父实体已归档时不可见（该列必须为 NULL）
        #[serde(default)]
        parent_archived_column: Option<String>,
        /// 父实体停用时不可见（该列必须为 TRUE）
        #[serde(default)]
        parent_active_column: Option<String>,
    },
    /// 明确标记为全局表，不受家庭隔离
    Global,
}

impl TenantLink {
    pub fn is_global(&self) -> bool {
        matches!(self, TenantLink::Global)
    }
}

/// 从行中解析 id 的方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum IdSource {
    /// 指定列
    Column { name: String },
    /// 行自身的 id（该表本身就是主体表或儿童表）
    RowId,
    #[default]
    None,
}

/// 分区声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSpec {
    /// 分区键（时间戳列）
    pub column: String,
    pub period: PartitionPeriod,
}

/// 清单中的单表条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableManifestEntry {
    pub table: String,
    pub tenant_link: TenantLink,
    #[serde(default)]
    pub sensitive_class: Option<EntityClass>,
    #[serde(default = "default_true")]
    pub audit_enabled: bool,
    /// 强制隔离：服务账号也不能绕过
    #[serde(default = "default_true")]
    pub force_isolation: bool,
    /// 是否允许通过脱敏报表入口读取
    #[serde(default)]
    pub reportable: bool,
    #[serde(default = "default_id_column")]
    pub id_column: String,
    #[serde(default)]
    pub principal: IdSource,
    #[serde(default)]
    pub child: IdSource,
    #[serde(default)]
    pub partition: Option<PartitionSpec>,
}

/// 家庭成员关系表的声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipSpec {
    #[serde(default = "default_membership_table")]
    pub table: String,
    #[serde(default = "default_tenant_column")]
    pub tenant_column: String,
    #[serde(default = "default_principal_column")]
    pub principal_column: String,
    /// 软退出时间列，非 NULL 表示已离开该家庭
    #[serde(default = "default_left_column")]
    pub left_column: String,
}

impl Default for MembershipSpec {
    fn default() -> Self {
        Self {
            table: default_membership_table(),
            tenant_column: default_tenant_column(),
            principal_column: default_principal_column(),
            left_column: default_left_column(),
        }
    }
}

/// 完整的注册清单
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableManifest {
    #[serde(default)]
    pub membership: MembershipSpec,
    /// “我的活动记录”中用于关联儿童的表
    #[serde(default)]
    pub activity_child_table: Option<String>,
    #[serde(default)]
    pub tables: Vec<TableManifestEntry>,
}

fn default_true() -> bool {
    true
}

fn default_id_column() -> String {
    "id".to_string()
}

fn default_membership_table() -> String {
    "family_members".to_string()
}

fn default_tenant_column() -> String {
    "family_id".to_string()
}

fn default_principal_column() -> String {
    "user_id".to_string()
}

fn default_left_column() -> String {
    "left_at".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("child_profiles"));
        assert!(is_valid_identifier("_internal"));
        assert!(is_valid_identifier("events_2024"));
        assert!(!is_valid_identifier("Child"));
        assert!(!is_valid_identifier("1table"));
        assert!(!is_valid_identifier("users; DROP TABLE users"));
        assert!(!is_valid_identifier("a.b"));
        assert!(!is_valid_identifier(""));
    }

    #[test]
    fn test_manifest_entry_defaults() {
        let entry: TableManifestEntry = serde_json::from_value(serde_json::json!({
            "table": "child_profiles",
            "tenant_link": { "kind": "direct", "column": "family_id" }
        }))
        .unwrap();

        assert!(entry.audit_enabled);
        assert!(entry.force_isolation);
        assert!(!entry.reportable);
        assert_eq!(entry.id_column, "id");
        assert_eq!(entry.principal, IdSource::None);
        assert!(entry.partition.is_none());
    }

    #[test]
    fn test_via_link_deserialization() {
        let link: TenantLink = serde_json::from_value(serde_json::json!({
            "kind": "via",
            "column": "child_id",
            "parent_table": "child_profiles",
            "parent_tenant_column": "family_id",
            "parent_archived_column": "archived_at"
        }))
        .unwrap();

        match link {
            TenantLink::Via {
                parent_key,
                parent_archived_column,
                parent_active_column,
                ..
            } => {
                assert_eq!(parent_key, "id");
                assert_eq!(parent_archived_column.as_deref(), Some("archived_at"));
                assert!(parent_active_column.is_none());
            }
            other => panic!("unexpected link: {:?}", other),
        }
    }
}
