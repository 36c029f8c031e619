//! Infrastructure layer: storage adapters, audit log, services, config.

pub mod audit;
pub mod config;
pub mod db;
pub mod services;
pub mod store;
