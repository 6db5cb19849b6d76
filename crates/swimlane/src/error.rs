//! Membership error types

use crate::member::PeerId;
use thiserror::Error;

/// Result type for membership operations
pub type Result<T> = std::result::Result<T, SwimError>;

/// Membership errors
#[derive(Debug, Error)]
pub enum SwimError {
    // ==================== Configuration Errors ====================
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid peer address: {0}")]
    InvalidPeer(String),

    // ==================== Lifecycle Errors ====================
    #[error("node is already running")]
    AlreadyRunning,

    #[error("node is not running")]
    NotRunning,

    // ==================== Protocol Errors ====================
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    // ==================== Network Errors ====================
    #[error("peer unreachable: {0}")]
    Unreachable(PeerId),

    #[error("transport closed")]
    TransportClosed,

    #[error("network error: {0}")]
    Network(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // ==================== Internal Errors ====================
    #[error("channel closed")]
    ChannelClosed,
}

impl SwimError {
    /// Check if a later protocol period may succeed where this one failed
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            SwimError::Unreachable(_) | SwimError::Network(_) | SwimError::Io(_)
        )
    }

    /// Check if this error means the node has been torn down
    pub fn is_shutdown(&self) -> bool {
        matches!(
            self,
            SwimError::NotRunning | SwimError::ChannelClosed | SwimError::TransportClosed
        )
    }
}

// Conversion from channel errors
impl<T> From<tokio::sync::mpsc::error::SendError<T>> for SwimError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        SwimError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for SwimError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        SwimError::ChannelClosed
    }
}

// Conversion from postcard for serialization
impl From<postcard::Error> for SwimError {
    fn from(e: postcard::Error) -> Self {
        SwimError::Serialization(e.to_string())
    }
}
