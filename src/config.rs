//! 配置系统
//! 从环境变量加载所有配置，使用 Secret 包装敏感信息

use config::{Config, ConfigError, Environment};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 监听地址，例如 "0.0.0.0:3000"
    pub addr: String,
    /// 优雅关闭超时时间（秒）
    pub graceful_shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// 数据库连接 URL（使用 Secret 包装，防止日志泄露）
    pub url: Secret<String>,
    /// 最大连接数
    pub max_connections: u32,
    /// 最小连接数
    pub min_connections: u32,
    /// 获取连接超时时间（秒）
    pub acquire_timeout_secs: u64,
    /// 空闲连接超时时间（秒）
    pub idle_timeout_secs: u64,
    /// 连接最大生命周期（秒）
    pub max_lifetime_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别: trace, debug, info, warn, error
    pub level: String,
    /// 日志格式: json, pretty
    pub format: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// 上游签发令牌的校验密钥（使用 Secret 包装，防止日志泄露）
    pub jwt_secret: Secret<String>,
    /// 是否信任 X-Forwarded-For 头
    pub trust_proxy: bool,
    /// 报表角色名：只能通过脱敏查询入口跨家庭读取
    pub reporting_role: String,
    /// 合规管理员角色名：管理保留策略与法律保全
    pub admin_role: String,
    /// 紧急响应角色名：只有持有该角色的主体才能申请紧急访问
    pub emergency_role: String,
    /// 紧急访问授权的最长时长（分钟）
    pub emergency_max_minutes: u32,
}

/// 保留策略清理任务配置
#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    /// 是否启动后台清理任务
    pub sweep_enabled: bool,
    /// 清理周期（秒）
    pub sweep_interval_secs: u64,
    /// 每批删除的最大记录数
    pub batch_size: i64,
    /// 单次清理最多执行的批次数
    pub max_batches_per_run: u32,
}

/// 分区管理配置
#[derive(Debug, Clone, Deserialize)]
pub struct PartitionConfig {
    /// 启动时预先创建的未来分区数
    pub precreate_periods: u32,
}

/// 表注册清单配置
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// 清单文件路径（TOML）
    pub manifest_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub security: SecurityConfig,
    pub retention: RetentionConfig,
    pub partitioning: PartitionConfig,
    pub registry: RegistryConfig,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut settings = Config::builder();

        // 添加默认配置
        settings = settings
            .set_default("server.addr", "0.0.0.0:3000")?
            .set_default("server.graceful_shutdown_timeout_secs", 30)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 30)?
            .set_default("database.idle_timeout_secs", 600)?
            .set_default("database.max_lifetime_secs", 1800)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "json")?
            .set_default("security.jwt_secret", "change-this-secret-in-production-min-32-chars!")?
            .set_default("security.trust_proxy", true)?
            .set_default("security.reporting_role", "analytics_reader")?
            .set_default("security.admin_role", "compliance_admin")?
            .set_default("security.emergency_role", "emergency_responder")?
            .set_default("security.emergency_max_minutes", 240)?
            // 保留策略默认配置
            .set_default("retention.sweep_enabled", true)?
            .set_default("retention.sweep_interval_secs", 3600)?
            .set_default("retention.batch_size", 1000)?
            .set_default("retention.max_batches_per_run", 100)?
            // 分区默认配置
            .set_default("partitioning.precreate_periods", 2)?
            .set_default("registry.manifest_path", "config/tables.toml")?;

        // 从环境变量加载配置（前缀为 GUARD_）
        settings = settings.add_source(
            Environment::with_prefix("GUARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = settings.build()?.try_deserialize()?;

        // 验证配置
        config.validate()?;

        Ok(config)
    }

    /// 验证配置合法性
    pub fn validate(&self) -> Result<(), ConfigError> {
        // 验证端口范围
        if let Some(port_str) = self.server.addr.split(':').next_back() {
            if let Ok(port) = port_str.parse::<u16>() {
                if port != 0 && port < 1024 {
                    return Err(ConfigError::Message("Server port should be >= 1024".to_string()));
                }
            }
        }

        // 验证日志级别
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                )))
            }
        }

        // 验证日志格式
        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => {
                return Err(ConfigError::Message(format!(
                    "Invalid log format: {}. Must be one of: json, pretty",
                    self.logging.format
                )))
            }
        }

        // 验证数据库连接池配置
        if self.database.max_connections < self.database.min_connections {
            return Err(ConfigError::Message(
                "max_connections must be >= min_connections".to_string(),
            ));
        }

        // 验证 JWT 密钥长度（至少 32 字符）
        if self.security.jwt_secret.expose_secret().len() < 32 {
            return Err(ConfigError::Message(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }

        if self.security.reporting_role.trim().is_empty() {
            return Err(ConfigError::Message("reporting_role must not be empty".to_string()));
        }

        // 报表角色与管理员角色必须分离
        if self.security.reporting_role == self.security.admin_role {
            return Err(ConfigError::Message(
                "reporting_role and admin_role must be different roles".to_string(),
            ));
        }

        if self.security.emergency_role.trim().is_empty() {
            return Err(ConfigError::Message("emergency_role must not be empty".to_string()));
        }

        // 紧急访问不能与报表角色合并，否则报表账号可绕过脱敏
        if self.security.emergency_role == self.security.reporting_role {
            return Err(ConfigError::Message(
                "emergency_role and reporting_role must be different roles".to_string(),
            ));
        }

        if self.security.emergency_max_minutes == 0 || self.security.emergency_max_minutes > 1440 {
            return Err(ConfigError::Message(
                "emergency_max_minutes must be between 1 and 1440".to_string(),
            ));
        }

        // 验证清理批次配置
        if self.retention.batch_size < 1 || self.retention.batch_size > 100_000 {
            return Err(ConfigError::Message(
                "retention.batch_size must be between 1 and 100000".to_string(),
            ));
        }

        if self.retention.sweep_interval_secs < 60 {
            return Err(ConfigError::Message(
                "retention.sweep_interval_secs must be >= 60".to_string(),
            ));
        }

        if self.partitioning.precreate_periods > 24 {
            return Err(ConfigError::Message(
                "partitioning.precreate_periods must be <= 24".to_string(),
            ));
        }

        Ok(())
    }
}
