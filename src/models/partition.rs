//! 时间分区模型

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// 分区粒度（按日历对齐）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionPeriod {
    Day,
    Month,
    Year,
}

impl PartitionPeriod {
    /// 包含 `ts` 的分区起点
    pub fn start_of(&self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = match self {
            PartitionPeriod::Day => ts.date_naive(),
            PartitionPeriod::Month => NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1)?,
            PartitionPeriod::Year => NaiveDate::from_ymd_opt(ts.year(), 1, 1)?,
        };
        midnight(date)
    }

    /// 以 `start` 为起点的分区的终点（不含）
    pub fn next_start(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = start.date_naive();
        let next = match self {
            PartitionPeriod::Day => date.succ_opt()?,
            PartitionPeriod::Month => {
                if date.month() == 12 {
                    NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?
                } else {
                    NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)?
                }
            }
            PartitionPeriod::Year => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)?,
        };
        midnight(next)
    }

    /// 分区表名后缀
    pub fn suffix(&self, start: DateTime<Utc>) -> String {
        match self {
            PartitionPeriod::Day => start.format("p%Y%m%d").to_string(),
            PartitionPeriod::Month => start.format("p%Y%m").to_string(),
            PartitionPeriod::Year => start.format("p%Y").to_string(),
        }
    }
}

fn midnight(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0)
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// 一个物理分区：(逻辑表, 时间段)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PartitionId {
    pub table: String,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl PartitionId {
    /// 计算 `ts` 所在的分区；日期越界时返回 None
    pub fn for_timestamp(table: &str, period: PartitionPeriod, ts: DateTime<Utc>) -> Option<Self> {
        let start = period.start_of(ts)?;
        let end = period.next_start(start)?;
        Some(Self {
            table: table.to_string(),
            name: format!("{}_{}", table, period.suffix(start)),
            start,
            end,
        })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_month_bounds() {
        let id = PartitionId::for_timestamp(
            "game_events",
            PartitionPeriod::Month,
            ts("2024-02-29T23:59:59Z"),
        )
        .unwrap();

        assert_eq!(id.name, "game_events_p202402");
        assert_eq!(id.start, ts("2024-02-01T00:00:00Z"));
        assert_eq!(id.end, ts("2024-03-01T00:00:00Z"));
        assert!(id.contains(ts("2024-02-29T23:59:59Z")));
        assert!(!id.contains(ts("2024-03-01T00:00:00Z")));
    }

    #[test]
    fn test_december_rolls_into_next_year() {
        let id = PartitionId::for_timestamp("events", PartitionPeriod::Month, ts("2023-12-15T08:00:00Z"))
            .unwrap();
        assert_eq!(id.end, ts("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn test_day_and_year_bounds() {
        let day = PartitionId::for_timestamp("events", PartitionPeriod::Day, ts("2024-03-10T13:00:00Z"))
            .unwrap();
        assert_eq!(day.name, "events_p20240310");
        assert_eq!(day.end, ts("2024-03-11T00:00:00Z"));

        let year = PartitionId::for_timestamp("events", PartitionPeriod::Year, ts("2024-03-10T13:00:00Z"))
            .unwrap();
        assert_eq!(year.name, "events_p2024");
        assert_eq!(year.start, ts("2024-01-01T00:00:00Z"));
        assert_eq!(year.end, ts("2025-01-01T00:00:00Z"));
    }

    #[test]
    fn test_same_period_same_partition() {
        let a = PartitionId::for_timestamp("events", PartitionPeriod::Month, ts("2024-05-01T00:00:00Z"));
        let b = PartitionId::for_timestamp("events", PartitionPeriod::Month, ts("2024-05-31T23:00:00Z"));
        assert_eq!(a, b);
    }
}
