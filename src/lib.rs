// State Loader - Core Library
// Exposes all modules for use in the CLI, the HTTP server, and tests

pub mod config;
pub mod error;
pub mod loader;
pub mod logging;
pub mod record;
pub mod storage;
pub mod warehouse;

#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use config::LoaderConfig;
pub use error::{LoadError, LoadResult};
pub use loader::{run_load, LoadReport, Loader};
pub use record::{parse_records, StateRecord, HEADER};
pub use storage::{LocalObjectStore, ObjectStore, ObjectUri};
pub use warehouse::{SqliteWarehouse, TableId, Warehouse, WriteDisposition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
