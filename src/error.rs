//! 统一错误模型
//! 定义所有错误类型和错误响应格式
//!
//! 隔离与脱敏失败属于安全关键路径，一律失败即拒绝；
//! 审计与保留策略的簿记失败属于可用性路径，只记录告警不影响业务。

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use thiserror::Error;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

/// 应用错误类型
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed")]
    Unauthorized,

    #[error("Access denied")]
    Forbidden,

    /// 资源不存在，或者隔离策略拒绝访问（两者对外不可区分）
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// 报表路径脱敏失败：绝不返回部分未脱敏数据
    #[error("Report unavailable: {0}")]
    ReportUnavailable(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// 获取 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::ReportUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Database(_) | AppError::Config(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    ///
    /// NotFound 不回显内部细节，避免通过错误信息探测其他家庭的数据是否存在。
    pub fn user_message(&self) -> String {
        match self {
            AppError::Unauthorized => "Authentication failed".to_string(),
            AppError::Forbidden => "Access denied".to_string(),
            AppError::NotFound(_) => "Resource not found".to_string(),
            AppError::BadRequest(msg) => msg.clone(),
            AppError::Validation(msg) => msg.clone(),
            AppError::ReportUnavailable(_) => "Report unavailable".to_string(),
            AppError::Database(_) => "Database error occurred".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Internal(_) => "Internal server error".to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> u16 {
        self.status_code().as_u16()
    }

    // 便捷方法
    pub fn not_found(msg: &str) -> Self {
        AppError::NotFound(msg.to_string())
    }

    pub fn validation(msg: &str) -> Self {
        AppError::Validation(msg.to_string())
    }

    pub fn internal_error(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}

/// 错误响应 DTO
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: u16,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = uuid::Uuid::new_v4().to_string();

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code(),
                message: self.user_message(),
                request_id,
            },
        };

        // 4xx 属于预期内的拒绝，5xx 才按错误级别记录
        if status.is_server_error() {
            tracing::error!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Application error"
            );
        } else {
            tracing::debug!(
                code = self.code(),
                message = %self,
                request_id = %error_response.error.request_id,
                "Request rejected"
            );
        }

        (status, Json(error_response)).into_response()
    }
}

/// 从 String 转换为 AppError::Config
impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Config(s)
    }
}

/// 从 config::ConfigError 转换
impl From<config::ConfigError> for AppError {
    fn from(e: config::ConfigError) -> Self {
        AppError::Config(e.to_string())
    }
}

/// 从 validator::ValidationErrors 转换
impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// 隔离拒绝一律表现为“不存在”
impl From<crate::services::isolation_service::IsolationError> for AppError {
    fn from(e: crate::services::isolation_service::IsolationError) -> Self {
        metrics::counter!("isolation_denied_total").increment(1);
        AppError::NotFound(e.to_string())
    }
}

/// 未注册的表同样表现为“不存在”
impl From<crate::services::table_registry::RegistryError> for AppError {
    fn from(e: crate::services::table_registry::RegistryError) -> Self {
        match e {
            crate::services::table_registry::RegistryError::UnknownTable(table) => {
                AppError::NotFound(format!("table {}", table))
            }
            other => AppError::Config(other.to_string()),
        }
    }
}

impl From<crate::services::partition_service::PartitionError> for AppError {
    fn from(e: crate::services::partition_service::PartitionError) -> Self {
        AppError::Internal(format!("Partition error: {}", e))
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(e: crate::db::DbError) -> Self {
        AppError::Internal(e.to_string())
    }
}
