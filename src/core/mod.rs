// Infrastructure shared by the router and the binary

pub mod config;
pub mod errors;

// Re-export commonly used types
pub use config::{ManagerConfig, ManagerConfigBuilder};
pub use errors::{Result, StagehandError};
