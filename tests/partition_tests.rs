//! 分区管理器测试：用计数的 DDL 替身代替数据库

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tenant_guard::{
    models::partition::PartitionId,
    services::{
        partition_service::{PartitionDdl, PartitionError},
        PartitionManager,
    },
};

mod common;
use common::test_registry;

/// 记录每次建表调用；模拟数据库的“已存在”语义
#[derive(Default)]
struct CountingDdl {
    calls: AtomicUsize,
    existing: Mutex<HashSet<String>>,
}

#[async_trait]
impl PartitionDdl for CountingDdl {
    async fn create_partition(&self, partition: &PartitionId) -> Result<bool, PartitionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // 放大并发窗口
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(self.existing.lock().unwrap().insert(partition.name.clone()))
    }
}

struct FlakyDdl {
    calls: AtomicUsize,
}

#[async_trait]
impl PartitionDdl for FlakyDdl {
    async fn create_partition(&self, _partition: &PartitionId) -> Result<bool, PartitionError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(sqlx::Error::PoolTimedOut.into());
        }
        Ok(true)
    }
}

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn manager(ddl: Arc<dyn PartitionDdl>) -> PartitionManager {
    PartitionManager::new(Arc::new(test_registry()), ddl)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ensure_creates_partition_once() {
    let ddl = Arc::new(CountingDdl::default());
    let manager = Arc::new(manager(ddl.clone()));

    let tasks = (0..16).map(|i| {
        let manager = manager.clone();
        // 同一个月内的不同时间点
        let at = ts("2024-05-01T00:00:00Z") + chrono::Duration::hours(i * 7);
        tokio::spawn(async move { manager.ensure_partition("game_events", at).await })
    });

    let results = join_all(tasks).await;

    let names: HashSet<String> = results
        .into_iter()
        .map(|joined| joined.unwrap().unwrap().name)
        .collect();

    assert_eq!(names, HashSet::from(["game_events_p202405".to_string()]));
    assert_eq!(ddl.calls.load(Ordering::SeqCst), 1);
    assert_eq!(manager.cached(), 1);
}

#[tokio::test]
async fn test_ensure_is_idempotent_across_calls() {
    let ddl = Arc::new(CountingDdl::default());
    let manager = manager(ddl.clone());

    let first = manager
        .ensure_partition("game_events", ts("2024-02-29T23:59:59Z"))
        .await
        .unwrap();
    let second = manager
        .ensure_partition("game_events", ts("2024-02-01T00:00:00Z"))
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.end, ts("2024-03-01T00:00:00Z"));
    assert_eq!(ddl.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_precreate_upcoming_covers_current_and_next_periods() {
    let ddl = Arc::new(CountingDdl::default());
    let manager = manager(ddl.clone());

    let ensured = manager
        .precreate_upcoming(ts("2023-11-15T08:00:00Z"), 2)
        .await
        .unwrap();

    let names: Vec<_> = ensured.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["game_events_p202311", "game_events_p202312", "game_events_p202401"]
    );

    // 连续的分区首尾相接
    for pair in ensured.windows(2) {
        assert_eq!(pair[0].end, pair[1].start);
    }

    // 再跑一次不会重复建表
    manager
        .precreate_upcoming(ts("2023-11-20T08:00:00Z"), 2)
        .await
        .unwrap();
    assert_eq!(ddl.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_failed_creation_is_retried() {
    let ddl = Arc::new(FlakyDdl {
        calls: AtomicUsize::new(0),
    });
    let manager = manager(ddl.clone());
    let at = ts("2024-07-04T10:00:00Z");

    assert!(matches!(
        manager.ensure_partition("game_events", at).await,
        Err(PartitionError::Database(_))
    ));
    assert_eq!(manager.cached(), 0);

    let partition = manager.ensure_partition("game_events", at).await.unwrap();
    assert_eq!(partition.name, "game_events_p202407");
    assert_eq!(ddl.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unpartitioned_and_unknown_tables_are_rejected() {
    let manager = manager(Arc::new(CountingDdl::default()));
    let now = Utc::now();

    assert!(matches!(
        manager.ensure_partition("child_profiles", now).await,
        Err(PartitionError::NotPartitioned(_))
    ));
    assert!(matches!(
        manager.ensure_partition("payments", now).await,
        Err(PartitionError::UnknownTable(_))
    ));
}
