//! Business logic services layer

pub mod anonymizer;
pub mod audit_service;
pub mod emergency_service;
pub mod isolation_service;
pub mod partition_service;
pub mod reporting_service;
pub mod retention_service;
pub mod table_registry;
pub mod tenant_store;

pub use audit_service::{AuditOutcome, AuditService};
pub use emergency_service::EmergencyService;
pub use isolation_service::IsolationEnforcer;
pub use partition_service::PartitionManager;
pub use reporting_service::ReportingService;
pub use retention_service::RetentionService;
pub use table_registry::TableRegistry;
pub use tenant_store::TenantStore;
