//! Error handling for benchgrid core types

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while building catalogs, probe identities and configuration
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Configuration failed validation
    #[error("Configuration error: {0}")]
    InvalidConfiguration(String),

    /// A model id is not present in the catalog
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// A scalar value is out of its permitted range
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A probe result violates one of its structural invariants
    #[error("Invariant violated: {0}")]
    Invariant(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Layered configuration errors
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl CoreError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an invalid value error
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Create an invariant error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant(msg.into())
    }

    /// True when the error comes from user-supplied configuration
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CoreError::InvalidConfiguration(_)
                | CoreError::UnknownModel(_)
                | CoreError::Config(_)
                | CoreError::Yaml(_)
        )
    }
}
