//! Error types for session channels.

use std::time::Duration;

/// Errors produced by a session channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel is not open")]
    NotOpen,

    #[error("authentication failed for {user}@{address}: {reason}")]
    Auth {
        user: String,
        address: String,
        reason: String,
    },

    #[error("connection to {address} failed: {reason}")]
    Connect { address: String, reason: String },

    #[error("{channel} sub-connection failed: {reason}")]
    SubConnection {
        channel: &'static str,
        reason: String,
    },

    #[error("transfer of {path} failed: {reason}")]
    Transfer { path: String, reason: String },

    #[error("timed out after {}s waiting for {what}", .after.as_secs())]
    Timeout { what: String, after: Duration },

    #[error("remote shell closed before {what} completed")]
    Disconnected { what: String },

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported on this host: {0}")]
    Unsupported(String),

    #[error("ssh error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("background task failed: {0}")]
    Task(String),
}

impl ChannelError {
    /// Authentication failures clear the cached password upstream.
    pub fn is_auth(&self) -> bool {
        matches!(self, ChannelError::Auth { .. })
    }
}

impl From<tokio::task::JoinError> for ChannelError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChannelError::Task(err.to_string())
    }
}

/// Result type for channel operations.
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;
