//! Anonymization rules per entity class

use serde::{Deserialize, Serialize};

use super::table::Row;

/// 敏感实体类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    ChildProfile,
    Parent,
    Family,
}

impl EntityClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityClass::ChildProfile => "child_profile",
            EntityClass::Parent => "parent",
            EntityClass::Family => "family",
        }
    }

    /// 该类别的脱敏规则（白名单：未列出的字段一律丢弃）
    pub fn rule(&self) -> &'static [FieldRule] {
        match self {
            EntityClass::ChildProfile => CHILD_PROFILE_RULE,
            EntityClass::Parent => PARENT_RULE,
            EntityClass::Family => FAMILY_RULE,
        }
    }

    /// 原样保留的字段，报表查询只允许按这些字段过滤
    pub fn passthrough_fields(&self) -> impl Iterator<Item = &'static str> {
        self.rule()
            .iter()
            .filter(|r| r.transform == FieldTransform::Keep)
            .map(|r| r.target)
    }
}

/// 字段变换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldTransform {
    /// 原样保留
    Keep,
    /// 首字母 + 固定掩码，例如 "Emma" → "E***"
    InitialMask,
    /// 邮箱本地部分只留首字母，例如 "jane@example.com" → "j***@example.com"
    EmailMask,
    /// 出生日期换算为月龄
    AgeInMonths,
}

/// 单字段规则：按顺序取第一个存在的源字段，变换后写入目标字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub sources: &'static [&'static str],
    pub target: &'static str,
    pub transform: FieldTransform,
}

impl FieldRule {
    const fn keep(field: &'static [&'static str]) -> Self {
        Self {
            sources: field,
            target: field[0],
            transform: FieldTransform::Keep,
        }
    }
}

/// 掩码后缀
pub const MASK: &str = "***";

const CHILD_PROFILE_RULE: &[FieldRule] = &[
    FieldRule::keep(&["id"]),
    FieldRule::keep(&["family_id"]),
    FieldRule {
        sources: &["first_name", "name"],
        target: "first_name",
        transform: FieldTransform::InitialMask,
    },
    // age_months 排在 birth_date 之后作为备选源，保证重复脱敏结果不变
    FieldRule {
        sources: &["birth_date", "age_months"],
        target: "age_months",
        transform: FieldTransform::AgeInMonths,
    },
    FieldRule::keep(&["is_active"]),
    FieldRule::keep(&["created_at"]),
    FieldRule::keep(&["updated_at"]),
    FieldRule::keep(&["archived_at"]),
];

const PARENT_RULE: &[FieldRule] = &[
    FieldRule::keep(&["id"]),
    FieldRule::keep(&["family_id"]),
    FieldRule {
        sources: &["first_name"],
        target: "first_name",
        transform: FieldTransform::InitialMask,
    },
    FieldRule {
        sources: &["email"],
        target: "email",
        transform: FieldTransform::EmailMask,
    },
    FieldRule::keep(&["role"]),
    FieldRule::keep(&["is_active"]),
    FieldRule::keep(&["created_at"]),
];

const FAMILY_RULE: &[FieldRule] = &[
    FieldRule::keep(&["id"]),
    FieldRule {
        sources: &["name"],
        target: "name",
        transform: FieldTransform::InitialMask,
    },
    FieldRule::keep(&["created_at"]),
];

/// 脱敏后的行
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RedactedRow(Row);

impl RedactedRow {
    pub(crate) fn new(row: Row) -> Self {
        Self(row)
    }

    pub fn as_row(&self) -> &Row {
        &self.0
    }

    pub fn into_row(self) -> Row {
        self.0
    }

    pub fn get(&self, field: &str) -> Option<&serde_json::Value> {
        self.0.get(field)
    }
}

impl From<RedactedRow> for serde_json::Value {
    fn from(row: RedactedRow) -> Self {
        serde_json::Value::Object(row.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_rule_keeps_id() {
        for class in [EntityClass::ChildProfile, EntityClass::Parent, EntityClass::Family] {
            assert!(class.rule().iter().any(|r| r.target == "id"), "{:?}", class);
        }
    }

    #[test]
    fn test_child_passthrough_excludes_identifiers() {
        let fields: Vec<_> = EntityClass::ChildProfile.passthrough_fields().collect();
        assert!(fields.contains(&"family_id"));
        assert!(!fields.contains(&"first_name"));
        assert!(!fields.contains(&"birth_date"));
        assert!(!fields.contains(&"age_months"));
    }

    #[test]
    fn test_entity_class_serde() {
        let class: EntityClass = serde_json::from_str("\"child_profile\"").unwrap();
        assert_eq!(class, EntityClass::ChildProfile);
        assert_eq!(class.as_str(), "child_profile");
    }
}
