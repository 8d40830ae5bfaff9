//! 家庭数据隔离与合规审计服务主入口

use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use tenant_guard::{
    config::AppConfig, db, handlers::health, middleware::AppState, routes, services::TableRegistry,
    telemetry,
};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ===== CLI 参数处理 =====
    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        match args[1].as_str() {
            "--version" => {
                println!("tenant-guard {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_help();
                return Ok(());
            }
            _ => {
                eprintln!("未知参数: {}", args[1]);
                print_help();
                std::process::exit(1);
            }
        }
    }

    // 加载 .env 文件（开发环境）
    // 生产环境应该直接设置环境变量，不依赖 .env 文件
    if let Ok(path) = std::env::var("GUARD_ENV") {
        dotenv::from_filename(format!(".env.{}", path)).ok();
    } else {
        dotenv::from_filename(".env.local").ok();
        dotenv::dotenv().ok();
    }

    health::set_start_time();

    // 1. 加载配置
    let config = AppConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    // 2. 初始化日志与指标
    telemetry::init_telemetry(&config);
    telemetry::init_metrics();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "tenant-guard starting...");

    // 3. 表注册清单（无效清单直接拒绝启动）
    let registry = TableRegistry::load(&config.registry.manifest_path)?;

    // 4. 数据库连接池 + 迁移
    let db_pool = db::create_pool(&config.database).await?;
    db::run_migrations(&db_pool).await?;

    tracing::info!("Database initialized");

    // 5. 构建应用状态
    let app_state = Arc::new(AppState::build(config.clone(), db_pool, registry)?);

    // 6. 预建分区
    let ensured = app_state
        .partitions
        .precreate_upcoming(Utc::now(), config.partitioning.precreate_periods)
        .await?;
    tracing::info!(partitions = ensured.len(), "Upcoming partitions ensured");

    // 7. 后台清理任务
    let shutdown = CancellationToken::new();
    let sweeper = if config.retention.sweep_enabled {
        Some(
            app_state
                .retention_service
                .clone()
                .spawn_sweeper(shutdown.child_token()),
        )
    } else {
        tracing::info!("Retention sweeper disabled");
        None
    };

    // 8. 构建路由
    let app = routes::create_router(app_state.clone());

    // 9. 启动服务器
    let addr = &config.server.addr;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(
        addr = %addr,
        "Server listening"
    );

    // 10. 优雅关闭
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        let timeout = tokio::time::Duration::from_secs(config.server.graceful_shutdown_timeout_secs);
        if tokio::time::timeout(timeout, sweeper).await.is_err() {
            tracing::warn!("Graceful shutdown timeout reached, retention sweeper abandoned");
        }
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Ctrl+C received, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Terminate signal received, starting graceful shutdown");
        },
    }

    // 通知后台任务在当前批次结束后退出
    shutdown.cancel();
}

/// 打印帮助信息
fn print_help() {
    println!("tenant-guard {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("用法: tenant-guard [选项]");
    println!();
    println!("选项:");
    println!("  --version     打印版本信息并退出");
    println!("  --help        打印此帮助信息并退出");
    println!();
    println!("环境变量:");
    println!("  所有配置通过 GUARD_ 前缀的环境变量完成");
    println!("  表注册清单路径由 GUARD_REGISTRY__MANIFEST_PATH 指定");
}
