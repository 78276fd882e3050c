use thiserror::Error;

/// Unified error type for the stagehand library
#[derive(Debug, Error)]
pub enum StagehandError {
    /// Raised while building the topology; nothing is served when this occurs
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// A submitted route was empty or named an unknown stage
    #[error("Invalid route: {message}")]
    InvalidRoute {
        message: String,
        namespace: Option<String>,
    },

    /// A stage failed while processing a payload
    #[error("Stage error: {stage} - {message}")]
    Stage {
        stage: String,
        request_id: Option<String>,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Channel/messaging errors
    #[error("Channel error: {channel} - {message}")]
    Channel { channel: String, message: String },

    #[error("Manager is shutting down")]
    ShuttingDown,

    /// Generic internal errors
    #[error("Internal error: {message}")]
    Internal {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl StagehandError {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
            field: None,
        }
    }

    /// Create a configuration error naming the offending field
    pub fn configuration_field<S: Into<String>, F: Into<String>>(message: S, field: F) -> Self {
        Self::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a route error
    pub fn invalid_route<S: Into<String>>(message: S) -> Self {
        Self::InvalidRoute {
            message: message.into(),
            namespace: None,
        }
    }

    /// Create a route error for an unregistered namespace
    pub fn unknown_stage<S: Into<String>>(namespace: S) -> Self {
        let namespace = namespace.into();
        Self::InvalidRoute {
            message: format!("stage '{}' is not registered", namespace),
            namespace: Some(namespace),
        }
    }

    /// Create a stage error from a failed `process` call
    pub fn stage<S: Into<String>, R: Into<String>>(
        stage: S,
        request_id: R,
        source: anyhow::Error,
    ) -> Self {
        Self::Stage {
            stage: stage.into(),
            request_id: Some(request_id.into()),
            message: format!("{:#}", source),
            source: Some(source.into()),
        }
    }

    /// Create a channel error
    pub fn channel<S: Into<String>, M: Into<String>>(channel: S, message: M) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Whether the error ends the worker that produced it
    pub fn is_fatal_to_worker(&self) -> bool {
        matches!(self, Self::Stage { .. } | Self::Channel { .. })
    }

    /// Get error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration",
            Self::InvalidRoute { .. } => "route",
            Self::Stage { .. } => "stage",
            Self::Channel { .. } => "channel",
            Self::ShuttingDown => "shutdown",
            Self::Internal { .. } => "internal",
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, StagehandError>;

impl From<serde_json::Error> for StagehandError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration {
            message: format!("failed to parse configuration: {}", err),
            field: None,
        }
    }
}

impl From<std::io::Error> for StagehandError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: "io operation failed".to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<tokio::task::JoinError> for StagehandError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal {
            message: format!("task join failed: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(StagehandError::configuration("dup").category(), "configuration");
        assert_eq!(StagehandError::unknown_stage("nope").category(), "route");
        assert_eq!(StagehandError::channel("module_add", "closed").category(), "channel");
        assert_eq!(StagehandError::ShuttingDown.category(), "shutdown");
    }

    #[test]
    fn test_unknown_stage_carries_namespace() {
        let err = StagehandError::unknown_stage("module_pow");
        match err {
            StagehandError::InvalidRoute { namespace, message } => {
                assert_eq!(namespace.as_deref(), Some("module_pow"));
                assert!(message.contains("module_pow"));
            }
            other => panic!("Expected route error, got {:?}", other),
        }
    }

    #[test]
    fn test_worker_fatality() {
        let stage = StagehandError::stage("module_add", "req-1", anyhow::anyhow!("boom"));
        assert!(stage.is_fatal_to_worker());
        assert!(stage.to_string().contains("boom"));
        assert!(!StagehandError::invalid_route("empty").is_fatal_to_worker());
    }
}
