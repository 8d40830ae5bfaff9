//! HTTP 处理器模块

pub mod activity;
pub mod admin;
pub mod emergency;
pub mod health;
pub mod reports;
pub mod rows;
