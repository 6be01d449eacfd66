//! Grid protocol networking
//!
//! Reliable-UDP circuits to simulator hosts (sequencing, selective ACK,
//! retransmission, duplicate suppression, zero-coding), a connection manager
//! with a single dispatch pump, and the XML-RPC login bootstrap.

pub mod auth;
pub mod circuit;
pub mod dispatch;
pub mod manager;
pub mod messages;
pub mod serialization;

// Re-export main types for convenience
pub use auth::{LoginClient, LoginParams, LoginResponse, LoginStatus};
pub use circuit::{Circuit, CircuitOptions, CircuitState, ConnectOutcome};
pub use dispatch::{CallbackId, FnCallback, PacketCallback, PacketEventRegistry};
pub use manager::{DisconnectReason, NetworkEvent, NetworkManager, SessionCredentials};
pub use messages::{Frequency, Message, ReceivedPacket};

// Error types
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum NetworkError {
    #[error("Connection lost to {address}")]
    ConnectionLost { address: std::net::SocketAddr },

    #[error("Packet decode failed: {reason}")]
    PacketDecode { reason: String },

    #[error("Packet encode failed: {reason}")]
    PacketEncode { reason: String },

    #[error("Circuit not found: {address}")]
    CircuitNotFound { address: std::net::SocketAddr },

    #[error("Handshake timeout")]
    HandshakeTimeout,

    #[error("Not connected to a simulator")]
    NotConnected,

    #[error("No session credentials, log in first")]
    MissingCredentials,

    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    #[error("Login server rejected credentials: {reason}")]
    LoginRejected { reason: String },

    #[error("Login redirected more than {limit} times")]
    TooManyRedirects { limit: u32 },

    #[error("Transport error: {reason}")]
    Transport { reason: String },
}

pub type NetworkResult<T> = Result<T, NetworkError>;

impl From<std::io::Error> for NetworkError {
    fn from(err: std::io::Error) -> Self {
        NetworkError::Transport { reason: err.to_string() }
    }
}
