//! Error types for nostr-frontier

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontierError {
    #[error("Not connected to relays")]
    NotConnected,

    #[error("Not in a world")]
    NotInWorld,

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Signing denied")]
    SigningDenied,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Publish error: {0}")]
    Publish(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Unknown trade: {0}")]
    UnknownTrade(String),

    #[error("Unknown guild: {0}")]
    UnknownGuild(String),

    #[error("Nostr error: {0}")]
    Nostr(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FrontierError>;
