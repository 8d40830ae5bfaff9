//! 日志与追踪系统
//! 初始化结构化日志和指标收集

use crate::config::AppConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 安全告警日志的 target，告警系统按此订阅
pub const SECURITY_ALERT_TARGET: &str = "security_alert";

/// 初始化日志与追踪系统
pub fn init_telemetry(config: &AppConfig) {
    // 从环境变量构建过滤器
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    // 根据配置选择日志格式
    let log_layer = match config.logging.format.to_lowercase().as_str() {
        "json" => {
            // JSON 格式（生产环境）；保留 target 以便区分安全告警
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
                .boxed()
        }
        "pretty" => {
            // 美化格式（开发环境）
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true)
                .boxed()
        }
        _ => tracing_subscriber::fmt::layer().with_target(true).boxed(),
    };

    // 初始化 subscriber
    tracing_subscriber::registry()
        .with(env_filter)
        .with(log_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        level = %config.logging.level,
        format = %config.logging.format,
        "Telemetry initialized"
    );
}

/// 初始化指标收集器
pub fn init_metrics() {
    // metrics 0.24 在首次使用时创建指标，这里只登记描述
    metrics::describe_counter!("audit_records_total", "Audit records appended");
    metrics::describe_counter!(
        "audit_write_failures_total",
        "Audit captures that failed without failing the business write"
    );
    metrics::describe_counter!("retention_purged_total", "Audit records purged by retention");
    metrics::describe_counter!("partitions_created_total", "Partitions created on demand");
    metrics::describe_counter!("isolation_denied_total", "Requests denied by tenant isolation");
    metrics::describe_counter!("emergency_access_uses_total", "Reads served under emergency access");
    metrics::describe_counter!("report_redaction_failures_total", "Reports refused after redaction failure");
    metrics::describe_counter!("emergency_access_grants_total", "Emergency access grants issued");
    metrics::describe_counter!("http_requests_total", "HTTP requests by method and status");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        metrics::Unit::Seconds,
        "HTTP request latency"
    );
    tracing::debug!("Metrics initialized");
}
