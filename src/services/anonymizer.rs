//! 脱敏变换
//!
//! 审计记录器和报表入口共用同一个 [`anonymize`]，两处的脱敏逻辑不会分叉。
//! 变换是确定性的、无副作用的，并且幂等：`anonymize(anonymize(x)) == anonymize(x)`。

use chrono::{DateTime, Datelike, NaiveDate};
use serde_json::Value;

use crate::models::anonymization::{EntityClass, FieldRule, FieldTransform, RedactedRow, MASK};
use crate::models::Row;

/// 脱敏错误
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnonymizationError {
    #[error("cannot anonymize field '{field}' of {class}: {reason}")]
    InvalidField {
        class: &'static str,
        field: String,
        reason: String,
    },
}

/// 按实体类别脱敏一行数据；`as_of` 为计算月龄的参考日期
pub fn anonymize(class: EntityClass, row: &Row, as_of: NaiveDate) -> Result<RedactedRow, AnonymizationError> {
    let mut redacted = Row::new();

    for rule in class.rule() {
        let Some((source, value)) = first_present(rule, row) else {
            continue;
        };

        let output = if value.is_null() {
            Value::Null
        } else {
            apply(rule.transform, source, value, as_of).map_err(|reason| {
                AnonymizationError::InvalidField {
                    class: class.as_str(),
                    field: source.to_string(),
                    reason,
                }
            })?
        };

        redacted.insert(rule.target.to_string(), output);
    }

    Ok(RedactedRow::new(redacted))
}

fn first_present<'r>(rule: &FieldRule, row: &'r Row) -> Option<(&'static str, &'r Value)> {
    rule.sources
        .iter()
        .find_map(|source| row.get(*source).map(|value| (*source, value)))
}

fn apply(transform: FieldTransform, source: &str, value: &Value, as_of: NaiveDate) -> Result<Value, String> {
    match transform {
        FieldTransform::Keep => Ok(value.clone()),
        FieldTransform::InitialMask => {
            let text = value.as_str().ok_or("expected a string")?;
            Ok(Value::String(mask_initial(text)))
        }
        FieldTransform::EmailMask => {
            let text = value.as_str().ok_or("expected a string")?;
            mask_email(text).map(Value::String)
        }
        FieldTransform::AgeInMonths => {
            // 已经是月龄（重复脱敏）
            if source == "age_months" {
                return value
                    .as_i64()
                    .filter(|months| *months >= 0)
                    .map(Value::from)
                    .ok_or_else(|| "expected a non-negative integer".to_string());
            }
            let text = value.as_str().ok_or("expected a date string")?;
            let birth = parse_date(text)?;
            Ok(Value::from(age_in_months(birth, as_of)))
        }
    }
}

/// "Emma" → "E***"；空白或已无首字母的掩码只保留掩码，重复脱敏不会继续加长
pub fn mask_initial(text: &str) -> String {
    match text.trim().chars().next() {
        Some(first) if !MASK.starts_with(first) => format!("{}{}", first, MASK),
        _ => MASK.to_string(),
    }
}

/// "jane@example.com" → "j***@example.com"
pub fn mask_email(text: &str) -> Result<String, String> {
    let (local, domain) = text
        .rsplit_once('@')
        .ok_or_else(|| "expected an email address".to_string())?;
    if domain.is_empty() {
        return Err("email domain is empty".to_string());
    }
    Ok(format!("{}@{}", mask_initial(local), domain))
}

/// 接受 `YYYY-MM-DD` 或 RFC 3339 时间戳
fn parse_date(text: &str) -> Result<NaiveDate, String> {
    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.date_naive())
        .map_err(|_| format!("unparsable date '{}'", text))
}

/// 整月数，未满一个月不计；出生日期在未来时为 0
pub fn age_in_months(birth: NaiveDate, as_of: NaiveDate) -> i64 {
    if as_of <= birth {
        return 0;
    }
    let mut months = (as_of.year() - birth.year()) as i64 * 12
        + as_of.month() as i64
        - birth.month() as i64;
    if as_of.day() < birth.day() {
        months -= 1;
    }
    months.max(0)
}
