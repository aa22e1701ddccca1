//! Domain-level error taxonomy.

/// Errors produced while loading or validating build descriptors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid discovery filter '{filter}': {source}")]
    InvalidFilter {
        filter: String,
        #[source]
        source: regex::Error,
    },

    #[error("password acquisition failed for {user}@{address}: {reason}")]
    Password {
        user: String,
        address: String,
        reason: String,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for domain operations.
pub type CoreResult<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_error_display() {
        let err = CoreError::InvalidDescriptor("target id is empty".to_string());
        assert!(err.to_string().contains("invalid descriptor"));

        let err = CoreError::Password {
            user: "synth".to_string(),
            address: "build01".to_string(),
            reason: "prompt closed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("synth@build01"));
        assert!(msg.contains("prompt closed"));
    }
}
