pub mod agent;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod ingest;
pub mod knowledge;
pub mod models;
pub mod ollama;
pub mod qdrant_store;
pub mod server;
pub mod ui;

pub use config::AppConfig;
pub use server::run_server;
pub use ui::run_ui;
