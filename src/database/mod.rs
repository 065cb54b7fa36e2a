// Database module for leafcheck
// SQLite persistence for the local detection cache and configuration overrides

pub mod manager;
pub mod migrations;
pub mod models;
pub mod detections_repo;
pub mod settings_repo;

pub use manager::DatabaseManager;
pub use models::*;
