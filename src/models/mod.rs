//! Domain models

pub mod anonymization;
pub mod audit;
pub mod diff;
pub mod emergency;
pub mod partition;
pub mod retention;
pub mod table;

pub use table::Row;
