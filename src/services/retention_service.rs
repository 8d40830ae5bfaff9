//! 保留策略与过期清理
//!
//! 写入审计记录时按表的生效策略打上过期时间；后台任务分批删除已过期且未被法律保全的记录。
//! 清理由会话级 advisory lock 保护，多个实例同时触发时只有一个真正执行。

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RetentionConfig;
use crate::error::AppError;
use crate::models::audit::AuditRecord;
use crate::models::retention::{RetentionPolicy, SweepReport, UpsertRetentionPolicyRequest};
use crate::repository::{AuditRepository, RetentionRepository};
use crate::services::table_registry::TableRegistry;

/// advisory lock 键
const SWEEP_LOCK_KEY: i64 = 0x7265_7465_6e74;

/// 过期时间 = 写入时间 + 保留天数；没有生效策略时无限期保留
pub fn stamp_expiry(policy: Option<&RetentionPolicy>, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let policy = policy.filter(|p| p.active)?;
    at.checked_add_signed(Duration::days(i64::from(policy.retention_days)))
}

/// 记录是否可被清理：严格早于当前时间，且未被保全
pub fn is_purgeable(expires_at: Option<DateTime<Utc>>, legal_hold: bool, now: DateTime<Utc>) -> bool {
    !legal_hold && expires_at.is_some_and(|expires| expires < now)
}

pub struct RetentionService {
    db: PgPool,
    registry: Arc<TableRegistry>,
    config: RetentionConfig,
}

impl RetentionService {
    pub fn new(db: PgPool, registry: Arc<TableRegistry>, config: RetentionConfig) -> Self {
        Self { db, registry, config }
    }

    /// 清理已过期记录；可在批次之间取消，重复执行结果相同
    pub async fn purge_expired(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<SweepReport, AppError> {
        let mut report = SweepReport::default();

        // 会话级锁必须在同一条连接上加锁和解锁
        let mut conn = self.db.acquire().await?;

        let locked: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(SWEEP_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await?;
        if !locked {
            tracing::info!("Another retention sweep holds the lease, skipping");
            report.skipped_locked = true;
            return Ok(report);
        }

        let outcome = self.purge_batches(&mut conn, now, cancel, &mut report).await;

        if let Err(e) = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(SWEEP_LOCK_KEY)
            .execute(&mut *conn)
            .await
        {
            tracing::warn!(error = %e, "Failed to release retention sweep lease");
        }

        outcome?;

        tracing::info!(
            batches = report.batches,
            deleted = report.deleted,
            cancelled = report.cancelled,
            "Retention sweep finished"
        );
        Ok(report)
    }

    async fn purge_batches(
        &self,
        conn: &mut sqlx::PgConnection,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        report: &mut SweepReport,
    ) -> Result<(), AppError> {
        while report.batches < self.config.max_batches_per_run {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let deleted = AuditRepository::purge_batch(conn, now, self.config.batch_size).await?;
            report.batches += 1;
            report.deleted += deleted;
            metrics::counter!("retention_purged_total").increment(deleted);

            if (deleted as i64) < self.config.batch_size {
                break;
            }
        }
        Ok(())
    }

    pub async fn policies(&self) -> Result<Vec<RetentionPolicy>, AppError> {
        RetentionRepository::new(self.db.clone()).list().await
    }

    /// 新增或更新策略，只允许已注册的表
    pub async fn upsert_policy(&self, req: &UpsertRetentionPolicyRequest) -> Result<RetentionPolicy, AppError> {
        self.registry.require(&req.table_name)?;

        let policy = RetentionRepository::new(self.db.clone()).upsert(req).await?;
        tracing::info!(
            table = %policy.table_name,
            retention_days = policy.retention_days,
            active = policy.active,
            "Retention policy updated"
        );
        Ok(policy)
    }

    /// 设置或解除单条审计记录的法律保全
    pub async fn set_legal_hold(&self, audit_id: Uuid, legal_hold: bool, reason: &str) -> Result<AuditRecord, AppError> {
        let record = AuditRepository::new(self.db.clone())
            .set_legal_hold(audit_id, legal_hold)
            .await?
            .ok_or_else(|| AppError::not_found("audit record"))?;

        tracing::info!(
            audit_id = %audit_id,
            legal_hold = legal_hold,
            reason = %reason,
            "Legal hold changed"
        );
        Ok(record)
    }

    /// 启动周期性清理任务，收到取消信号后在当前批次结束时退出
    pub fn spawn_sweeper(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let period = StdDuration::from_secs(self.config.sweep_interval_secs);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Retention sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.purge_expired(Utc::now(), &cancel).await {
                            tracing::error!(error = %e, "Retention sweep failed");
                        }
                    }
                }
            }
        })
    }
}
