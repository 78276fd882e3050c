//! # stagehand: per-request stage routing
//!
//! Each registered stage runs on its own worker task behind its own channel.
//! A request carries its route, so the same workers serve any sequence of
//! stages, including repeats.
//!
//! ```rust,no_run
//! use stagehand::{ManagerBuilder, StageRegistry};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> stagehand::Result<()> {
//!     let manager = ManagerBuilder::new()
//!         .with_registry(StageRegistry::arithmetic()?)
//!         .build()
//!         .await?;
//!
//!     manager
//!         .submit(json!(0), ["module_add", "module_add", "module_multiply"])
//!         .await?;
//!
//!     manager.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod logging;
pub mod route;
pub mod stages;

// Re-exports for convenience
pub use crate::core::errors::{Result, StagehandError};
pub use crate::core::config::{ManagerConfig, ManagerConfigBuilder};
pub use route::{
    ChannelSink, Completion, CompositeSink, Envelope, Finish, FnSink, LoggingSink, Manager,
    ManagerBuilder, PipelineStats, PreparedStage, RequestId, RequestState, ShutdownReport, Stage,
    StageFactory, StageRegistry, WorkerFailure,
};
