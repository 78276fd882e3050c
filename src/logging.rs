use tracing_subscriber::EnvFilter;

use crate::core::errors::{Result, StagehandError};

/// Install a global fmt subscriber.
///
/// `RUST_LOG` wins over `default_filter` when set. Fails if a subscriber is
/// already installed.
pub fn init(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| StagehandError::configuration(format!("invalid log filter: {}", e)))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| StagehandError::internal(format!("failed to install subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        let _ = init("info");
        assert!(init("info").is_err());
    }
}
