//! 行级可见性谓词
//!
//! [`RowPredicate`] 是隔离策略的产物，所有租户范围内的 SQL 都通过
//! [`RowPredicate::push_sql`] 拼接 WHERE 条件。放行一切的谓词只能在 crate 内部构造。
//! 标识符在清单加载时已经校验，这里只负责拼接。

use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::table::TenantLink;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Clause {
    Deny,
    Unrestricted,
    TenantIn {
        column: String,
        tenants: Vec<Uuid>,
    },
    ViaParent {
        column: String,
        parent_table: String,
        parent_key: String,
        parent_tenant_column: String,
        parent_archived_column: Option<String>,
        parent_active_column: Option<String>,
        tenants: Vec<Uuid>,
    },
    ColumnEquals {
        column: String,
        value: Uuid,
    },
    AnyOf(Vec<Clause>),
}

/// 行可见性谓词
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPredicate {
    clause: Clause,
}

impl RowPredicate {
    /// 不匹配任何行
    pub fn deny() -> Self {
        Self { clause: Clause::Deny }
    }

    /// 匹配所有行：仅限全局表、紧急访问和脱敏报表入口
    pub(crate) fn unrestricted() -> Self {
        Self {
            clause: Clause::Unrestricted,
        }
    }

    /// 按归属规则生成谓词；成员关系为空时退化为 deny
    pub(crate) fn for_link(link: &TenantLink, tenants: &[Uuid]) -> Self {
        if link.is_global() {
            return Self::unrestricted();
        }
        if tenants.is_empty() {
            return Self::deny();
        }
        let tenants = tenants.to_vec();
        let clause = match link {
            TenantLink::Direct { column } => Clause::TenantIn {
                column: column.clone(),
                tenants,
            },
            TenantLink::Via {
                column,
                parent_table,
                parent_key,
                parent_tenant_column,
                parent_archived_column,
                parent_active_column,
            } => Clause::ViaParent {
                column: column.clone(),
                parent_table: parent_table.clone(),
                parent_key: parent_key.clone(),
                parent_tenant_column: parent_tenant_column.clone(),
                parent_archived_column: parent_archived_column.clone(),
                parent_active_column: parent_active_column.clone(),
                tenants,
            },
            TenantLink::Global => Clause::Unrestricted,
        };
        Self { clause }
    }

    pub fn column_equals(column: &str, value: Uuid) -> Self {
        Self {
            clause: Clause::ColumnEquals {
                column: column.to_string(),
                value,
            },
        }
    }

    /// 析取：任一谓词成立即可见
    pub fn or(self, other: RowPredicate) -> Self {
        let clause = match (self.clause, other.clause) {
            (Clause::Deny, c) | (c, Clause::Deny) => c,
            (Clause::Unrestricted, _) | (_, Clause::Unrestricted) => Clause::Unrestricted,
            (Clause::AnyOf(mut a), Clause::AnyOf(b)) => {
                a.extend(b);
                Clause::AnyOf(a)
            }
            (Clause::AnyOf(mut a), c) | (c, Clause::AnyOf(mut a)) => {
                a.push(c);
                Clause::AnyOf(a)
            }
            (a, b) => Clause::AnyOf(vec![a, b]),
        };
        Self { clause }
    }

    pub fn is_deny(&self) -> bool {
        self.clause == Clause::Deny
    }

    pub fn is_unrestricted(&self) -> bool {
        self.clause == Clause::Unrestricted
    }

    /// 对已解析出归属家庭的行做内存判定
    ///
    /// 对经由父实体关联的规则，`tenant` 应为父实体的家庭 id（父实体存活性由调用方保证）。
    pub fn admits_tenant(&self, tenant: Option<Uuid>) -> bool {
        fn check(clause: &Clause, tenant: Option<Uuid>) -> bool {
            match clause {
                Clause::Deny => false,
                Clause::Unrestricted => true,
                Clause::TenantIn { tenants, .. } | Clause::ViaParent { tenants, .. } => {
                    tenant.is_some_and(|t| tenants.contains(&t))
                }
                Clause::ColumnEquals { .. } => false,
                Clause::AnyOf(clauses) => clauses.iter().any(|c| check(c, tenant)),
            }
        }
        check(&self.clause, tenant)
    }

    /// 以 `alias` 为行别名，把条件追加到查询
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>, alias: &str) {
        push_clause(&self.clause, qb, alias);
    }
}

fn push_clause(clause: &Clause, qb: &mut QueryBuilder<'_, Postgres>, alias: &str) {
    match clause {
        Clause::Deny => {
            qb.push("FALSE");
        }
        Clause::Unrestricted => {
            qb.push("TRUE");
        }
        Clause::TenantIn { column, tenants } => {
            qb.push(format!("{}.{} = ANY(", alias, column));
            qb.push_bind(tenants.clone());
            qb.push(")");
        }
        Clause::ViaParent {
            column,
            parent_table,
            parent_key,
            parent_tenant_column,
            parent_archived_column,
            parent_active_column,
            tenants,
        } => {
            qb.push(format!(
                "{alias}.{column} IN (SELECT p.{parent_key} FROM {parent_table} p WHERE p.{parent_tenant_column} = ANY("
            ));
            qb.push_bind(tenants.clone());
            qb.push(")");
            if let Some(archived) = parent_archived_column {
                qb.push(format!(" AND p.{} IS NULL", archived));
            }
            if let Some(active) = parent_active_column {
                qb.push(format!(" AND p.{} = TRUE", active));
            }
            qb.push(")");
        }
        Clause::ColumnEquals { column, value } => {
            qb.push(format!("{}.{} = ", alias, column));
            qb.push_bind(*value);
        }
        Clause::AnyOf(clauses) => {
            qb.push("(");
            for (i, c) in clauses.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                push_clause(c, qb, alias);
            }
            qb.push(")");
        }
    }
}
