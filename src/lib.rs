//! gridlink: client networking for virtual-world grids
//!
//! Reliable-UDP circuits with selective acknowledgement, retransmission,
//! duplicate suppression and zero-coding, a connection manager with a
//! single dispatch pump, and the XML-RPC login handshake.

pub mod config;
pub mod networking;
pub mod utils;

// Re-export commonly used types for convenience
pub use config::NetworkSettings;
pub use networking::{
    Circuit, LoginClient, LoginParams, NetworkError, NetworkEvent, NetworkManager, NetworkResult,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
