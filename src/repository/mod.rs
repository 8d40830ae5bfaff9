//! Database repository layer

pub mod audit_repo;
pub mod emergency_repo;
pub mod membership_repo;
pub mod predicate;
pub mod retention_repo;
pub mod row_repo;

pub use audit_repo::*;
pub use emergency_repo::*;
pub use membership_repo::*;
pub use predicate::RowPredicate;
pub use retention_repo::*;
pub use row_repo::*;
