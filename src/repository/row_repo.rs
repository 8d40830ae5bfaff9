//! 通用行访问
//!
//! 业务表结构对本子系统透明：读取一律 `to_jsonb(r)`，写入一律经
//! `jsonb_populate_record(NULL::table, $1)` 由数据库按列类型转换。
//! 每条语句都带上隔离谓词，调用方无法绕开。

use serde_json::Value;
use sqlx::{PgConnection, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::db::sqlstate;
use crate::error::{AppError, Result};
use crate::models::table::is_valid_identifier;
use crate::models::Row;
use crate::repository::predicate::RowPredicate;
use crate::services::table_registry::TableRegistration;

/// undefined_column
const UNDEFINED_COLUMN: &str = "42703";

pub struct RowRepository;

impl RowRepository {
    /// 分页读取可见行
    pub async fn select_rows(
        conn: &mut PgConnection,
        registration: &TableRegistration,
        predicate: &RowPredicate,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Row>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT to_jsonb(r) FROM {} r WHERE ",
            registration.name()
        ));
        predicate.push_sql(&mut qb, "r");
        qb.push(format!(" ORDER BY r.{} LIMIT ", registration.id_column()));
        qb.push_bind(limit);
        qb.push(" OFFSET ");
        qb.push_bind(offset);

        let rows = qb
            .build_query_scalar::<Value>()
            .fetch_all(&mut *conn)
            .await
            .map_err(map_column_error)?;

        Ok(rows.into_iter().filter_map(into_row).collect())
    }

    /// 按主键读取单行；`for_update` 时加行锁，供随后的修改使用
    pub async fn select_row(
        conn: &mut PgConnection,
        registration: &TableRegistration,
        predicate: &RowPredicate,
        id: Uuid,
        for_update: bool,
    ) -> Result<Option<Row>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT to_jsonb(r) FROM {} r WHERE r.{} = ",
            registration.name(),
            registration.id_column()
        ));
        qb.push_bind(id);
        qb.push(" AND ");
        predicate.push_sql(&mut qb, "r");
        if for_update {
            qb.push(" FOR UPDATE");
        }

        let row = qb
            .build_query_scalar::<Value>()
            .fetch_optional(&mut *conn)
            .await?;

        Ok(row.and_then(into_row))
    }

    /// 行在当前谓词下是否可见（写后复核）
    pub async fn row_admitted(
        conn: &mut PgConnection,
        registration: &TableRegistration,
        predicate: &RowPredicate,
        id: Uuid,
    ) -> Result<bool> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT EXISTS (SELECT 1 FROM {} r WHERE r.{} = ",
            registration.name(),
            registration.id_column()
        ));
        qb.push_bind(id);
        qb.push(" AND ");
        predicate.push_sql(&mut qb, "r");
        qb.push(")");

        let admitted = qb.build_query_scalar::<bool>().fetch_one(&mut *conn).await?;
        Ok(admitted)
    }

    /// 插入一行；新行不满足谓词时不插入并返回 None
    pub async fn insert_row(
        conn: &mut PgConnection,
        registration: &TableRegistration,
        predicate: &RowPredicate,
        row: &Row,
    ) -> Result<Option<Row>> {
        let columns = column_list(row)?;
        let table = registration.name();

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "INSERT INTO {table} AS t ({columns}) SELECT {selected} FROM jsonb_populate_record(NULL::{table}, ",
            selected = prefixed(row, "r"),
        ));
        qb.push_bind(Value::Object(row.clone()));
        qb.push(") r WHERE ");
        predicate.push_sql(&mut qb, "r");
        qb.push(" RETURNING to_jsonb(t)");

        let inserted = qb
            .build_query_scalar::<Value>()
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_column_error)?;

        Ok(inserted.and_then(into_row))
    }

    /// 按主键更新可见行中的指定列
    pub async fn update_row(
        conn: &mut PgConnection,
        registration: &TableRegistration,
        predicate: &RowPredicate,
        id: Uuid,
        changes: &Row,
    ) -> Result<Option<Row>> {
        let columns = column_list(changes)?;
        let table = registration.name();

        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "UPDATE {table} AS r SET ({columns}) = (SELECT {selected} FROM jsonb_populate_record(NULL::{table}, ",
            selected = prefixed(changes, "c"),
        ));
        qb.push_bind(Value::Object(changes.clone()));
        qb.push(format!(") c) WHERE r.{} = ", registration.id_column()));
        qb.push_bind(id);
        qb.push(" AND ");
        predicate.push_sql(&mut qb, "r");
        qb.push(" RETURNING to_jsonb(r)");

        let updated = qb
            .build_query_scalar::<Value>()
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_column_error)?;

        Ok(updated.and_then(into_row))
    }

    /// 按主键删除可见行，返回删除前的快照
    pub async fn delete_row(
        conn: &mut PgConnection,
        registration: &TableRegistration,
        predicate: &RowPredicate,
        id: Uuid,
    ) -> Result<Option<Row>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "DELETE FROM {} AS r WHERE r.{} = ",
            registration.name(),
            registration.id_column()
        ));
        qb.push_bind(id);
        qb.push(" AND ");
        predicate.push_sql(&mut qb, "r");
        qb.push(" RETURNING to_jsonb(r)");

        let deleted = qb
            .build_query_scalar::<Value>()
            .fetch_optional(&mut *conn)
            .await?;

        Ok(deleted.and_then(into_row))
    }

    /// 跨家庭读取报表原始行，只允许 JSON 包含式过滤
    pub async fn select_for_report(
        conn: &mut PgConnection,
        registration: &TableRegistration,
        filters: &Row,
        limit: i64,
    ) -> Result<Vec<Row>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT to_jsonb(r) FROM {} r WHERE to_jsonb(r) @> ",
            registration.name()
        ));
        qb.push_bind(Value::Object(filters.clone()));
        qb.push(format!(" ORDER BY r.{} LIMIT ", registration.id_column()));
        qb.push_bind(limit);

        let rows = qb
            .build_query_scalar::<Value>()
            .fetch_all(&mut *conn)
            .await?;

        Ok(rows.into_iter().filter_map(into_row).collect())
    }
}

fn into_row(value: Value) -> Option<Row> {
    match value {
        Value::Object(row) => Some(row),
        _ => None,
    }
}

fn column_list(row: &Row) -> Result<String> {
    if row.is_empty() {
        return Err(AppError::validation("at least one column is required"));
    }
    if let Some(bad) = row.keys().find(|key| !is_valid_identifier(key)) {
        return Err(AppError::Validation(format!("invalid column name '{}'", bad)));
    }
    Ok(row.keys().map(String::as_str).collect::<Vec<_>>().join(", "))
}

fn prefixed(row: &Row, alias: &str) -> String {
    row.keys()
        .map(|key| format!("{}.{}", alias, key))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_column_error(e: sqlx::Error) -> AppError {
    if sqlstate(&e).as_deref() == Some(UNDEFINED_COLUMN) {
        return AppError::validation("unknown column");
    }
    AppError::Database(e)
}
