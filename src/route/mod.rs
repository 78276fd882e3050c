//! Per-request stage routing
//!
//! Every registered stage runs on its own worker task behind its own channel.
//! Requests carry their route with them, so one set of workers serves any
//! sequence of stages.

pub mod builder;
pub mod channel;
pub mod finisher;
pub mod manager;
pub mod registry;
pub mod stage;
pub mod stats;
pub mod types;
pub mod worker;

pub use builder::*;
pub use channel::*;
pub use finisher::*;
pub use manager::*;
pub use registry::*;
pub use stage::*;
pub use stats::*;
pub use types::*;
pub use worker::*;
