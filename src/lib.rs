//! 家庭数据隔离与合规审计服务库

pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod routes;
pub mod services;
pub mod telemetry;
