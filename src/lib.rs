pub mod api;
pub mod blobstore;
pub mod broker;
pub mod config;
pub mod files;
pub mod logging;
pub mod queue;
pub mod store;
pub mod supervisor;
pub mod tokens;
pub mod workers;

// Re-export commonly used types
pub use api::{AppError, AppState, create_router};
pub use config::AppConfig;
pub use logging::{LogConfig, LogGuard, init_logging};
pub use store::SyncStore;
