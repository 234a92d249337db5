//! Error types for the parts market

use crate::types::ComponentKind;
use thiserror::Error;

/// Main error type for the parts market
#[derive(Error, Debug)]
pub enum MarketError {
    // Protocol errors
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Message routing error: {0}")]
    MessageRouting(String),

    #[error("Round not found: {0}")]
    RoundNotFound(String),

    // Trading errors
    #[error("Capacity exceeded: no {0} left in stock")]
    CapacityExceeded(ComponentKind),

    #[error("Empty quote set for round {0}")]
    EmptyQuoteSet(String),

    #[error("Insufficient balance: required {required:.2}, available {available:.2}")]
    InsufficientBalance { required: f64, available: f64 },

    #[error("No price configured for {0}")]
    UnknownComponent(ComponentKind),

    // Transport errors
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent already registered: {0}")]
    AgentAlreadyRegistered(String),

    #[error("Mailbox closed: {0}")]
    ChannelClosed(String),

    #[error("No broker advertises capability: {0}")]
    NoBrokerFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration value: {0}")]
    InvalidConfig(String),

    // General errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MarketError {
    /// Stale, duplicate or out-of-order traffic. Logged and dropped, never
    /// reported to another party.
    pub fn is_routing(&self) -> bool {
        matches!(
            self,
            MarketError::MessageRouting(_) | MarketError::RoundNotFound(_)
        )
    }
}

/// Result type alias for market operations
pub type Result<T> = std::result::Result<T, MarketError>;
