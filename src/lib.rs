pub mod api;
pub mod clients;
pub mod config;
pub mod db;
pub mod driver;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use db::{create_pool, ensure_schema};
pub use service::{BatchRunner, JobManager};
