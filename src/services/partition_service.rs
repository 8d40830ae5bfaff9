//! 时间分区管理
//!
//! 写入分区表前调用 [`PartitionManager::ensure_partition`]。进程内按分区缓存，
//! 同一分区的并发调用只有一个真正执行 DDL，其余等待其结果。
//! 跨进程的并发由事务级 advisory lock 和 `IF NOT EXISTS` 兜底，重复创建的错误被吸收。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::PgPool;
use tokio::sync::OnceCell;

use crate::db::sqlstate;
use crate::models::partition::PartitionId;
use crate::services::table_registry::TableRegistry;

/// duplicate_table
const DUPLICATE_TABLE: &str = "42P07";
/// unique_violation（并发创建时 pg_type 上的冲突）
const UNIQUE_VIOLATION: &str = "23505";

/// 分区错误
#[derive(Debug, thiserror::Error)]
pub enum PartitionError {
    #[error("table '{0}' is not partitioned")]
    NotPartitioned(String),

    #[error("table '{0}' is not registered")]
    UnknownTable(String),

    #[error("no partition boundary for {table} at {timestamp}")]
    InvalidBoundary {
        table: String,
        timestamp: DateTime<Utc>,
    },

    #[error("partition DDL failed: {0}")]
    Database(#[from] sqlx::Error),
}

/// 分区 DDL 执行者
#[async_trait]
pub trait PartitionDdl: Send + Sync {
    /// 创建分区；返回是否由本次调用创建
    async fn create_partition(&self, partition: &PartitionId) -> Result<bool, PartitionError>;
}

/// PostgreSQL 声明式分区
pub struct PgPartitionDdl {
    db: PgPool,
}

impl PgPartitionDdl {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// `CREATE TABLE IF NOT EXISTS ... PARTITION OF ...`；标识符已在清单加载时校验
pub fn partition_ddl(partition: &PartitionId) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} PARTITION OF {} FOR VALUES FROM ('{}') TO ('{}')",
        partition.name,
        partition.table,
        partition.start.to_rfc3339(),
        partition.end.to_rfc3339(),
    )
}

#[async_trait]
impl PartitionDdl for PgPartitionDdl {
    async fn create_partition(&self, partition: &PartitionId) -> Result<bool, PartitionError> {
        let mut tx = self.db.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&partition.name)
            .execute(&mut *tx)
            .await?;

        let exists: bool = sqlx::query_scalar("SELECT to_regclass($1) IS NOT NULL")
            .bind(&partition.name)
            .fetch_one(&mut *tx)
            .await?;
        if exists {
            tx.commit().await?;
            return Ok(false);
        }

        match sqlx::query(&partition_ddl(partition)).execute(&mut *tx).await {
            Ok(_) => {
                tx.commit().await?;
                Ok(true)
            }
            Err(e) if is_create_race(&e) => {
                tracing::debug!(partition = %partition.name, "Partition created concurrently");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn is_create_race(e: &sqlx::Error) -> bool {
    matches!(sqlstate(e).as_deref(), Some(DUPLICATE_TABLE) | Some(UNIQUE_VIOLATION))
}

type PartitionKey = (String, String);

/// 分区管理器
pub struct PartitionManager {
    registry: Arc<TableRegistry>,
    ddl: Arc<dyn PartitionDdl>,
    ready: DashMap<PartitionKey, Arc<OnceCell<PartitionId>>>,
}

impl PartitionManager {
    pub fn new(registry: Arc<TableRegistry>, ddl: Arc<dyn PartitionDdl>) -> Self {
        Self {
            registry,
            ddl,
            ready: DashMap::new(),
        }
    }

    /// 确保 `timestamp` 所在分区存在，幂等
    pub async fn ensure_partition(
        &self,
        table: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<PartitionId, PartitionError> {
        let registration = self
            .registry
            .get(table)
            .ok_or_else(|| PartitionError::UnknownTable(table.to_string()))?;
        let spec = registration
            .partition()
            .ok_or_else(|| PartitionError::NotPartitioned(table.to_string()))?;

        let partition = PartitionId::for_timestamp(table, spec.period, timestamp).ok_or_else(|| {
            PartitionError::InvalidBoundary {
                table: table.to_string(),
                timestamp,
            }
        })?;

        // 先克隆出 cell 再 await，不能持有 DashMap 的分片锁跨越 await
        let cell = self
            .ready
            .entry((partition.table.clone(), partition.name.clone()))
            .or_default()
            .clone();

        let ready = cell
            .get_or_try_init(|| async {
                let created = self.ddl.create_partition(&partition).await?;
                if created {
                    tracing::info!(
                        table = %partition.table,
                        partition = %partition.name,
                        start = %partition.start,
                        end = %partition.end,
                        "Partition created"
                    );
                    metrics::counter!("partitions_created_total", "table" => partition.table.clone())
                        .increment(1);
                }
                Ok::<_, PartitionError>(partition.clone())
            })
            .await?;

        Ok(ready.clone())
    }

    /// 为所有分区表预建当前及之后 `periods` 个分区
    pub async fn precreate_upcoming(
        &self,
        now: DateTime<Utc>,
        periods: u32,
    ) -> Result<Vec<PartitionId>, PartitionError> {
        let mut ensured = Vec::new();

        let tables: Vec<_> = self
            .registry
            .partitioned()
            .filter_map(|r| r.partition().map(|spec| (r.name().to_string(), spec.period)))
            .collect();

        for (table, period) in tables {
            let mut start = period.start_of(now).ok_or_else(|| PartitionError::InvalidBoundary {
                table: table.clone(),
                timestamp: now,
            })?;

            for _ in 0..=periods {
                let partition = self.ensure_partition(&table, start).await?;
                start = partition.end;
                ensured.push(partition);
            }
        }

        Ok(ensured)
    }

    /// 已知存在的分区数（进程内）
    pub fn cached(&self) -> usize {
        self.ready.iter().filter(|entry| entry.value().initialized()).count()
    }
}
