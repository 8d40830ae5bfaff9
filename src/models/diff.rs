//! 行快照之间的差异

use serde::{Deserialize, Serialize};

use super::table::Row;

/// 前后快照的差异：`set` 为新增或变化的字段，`removed` 为被移除的字段
///
/// 不变量：`RowDiff::between(old, new).apply(old) == new`
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowDiff {
    pub set: Row,
    pub removed: Vec<String>,
}

impl RowDiff {
    pub fn between(old: Option<&Row>, new: Option<&Row>) -> Self {
        let empty = Row::new();
        let old = old.unwrap_or(&empty);
        let new = new.unwrap_or(&empty);

        let set = new
            .iter()
            .filter(|(key, value)| old.get(key.as_str()) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let mut removed: Vec<String> = old
            .keys()
            .filter(|key| !new.contains_key(key.as_str()))
            .cloned()
            .collect();
        removed.sort();

        Self { set, removed }
    }

    /// 把差异应用到旧快照上，得到新快照
    pub fn apply(&self, base: Option<&Row>) -> Row {
        let mut row = base.cloned().unwrap_or_default();
        for key in &self.removed {
            row.remove(key);
        }
        for (key, value) in &self.set {
            row.insert(key.clone(), value.clone());
        }
        row
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.removed.is_empty()
    }

    /// 发生变化的字段名（有序）
    pub fn changed_fields(&self) -> Vec<String> {
        let mut fields: Vec<String> = self
            .set
            .keys()
            .cloned()
            .chain(self.removed.iter().cloned())
            .collect();
        fields.sort();
        fields.dedup();
        fields
    }
}
