//! Grid message definitions and dynamic packet handling
//!
//! Message ids are frequency-coded on the wire; the `(frequency, id)` pair
//! folds into a single `u32` lookup key used by the dispatch tables.

use crate::networking::{NetworkError, NetworkResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::OnceLock;

pub mod control;

pub use control::*;

/// Message frequency determines the id encoding size
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Frequency {
    /// 1-byte id
    High,
    /// 0xFF + 1-byte id
    Medium,
    /// 0xFF 0xFF + 2-byte big-endian id
    Low,
    /// 0xFF 0xFF 0xFF + 1-byte id
    Fixed,
}

/// Trait implemented by every wire message
pub trait Message: Serialize + for<'de> Deserialize<'de> + Debug + Clone + Send + Sync {
    /// Message id within its frequency range
    const ID: u16;

    /// Frequency, which fixes the id encoding
    const FREQUENCY: Frequency;

    /// Whether this message is sent reliably by default
    const RELIABLE: bool;

    /// Whether the payload is zero-coded on the wire
    const ZEROCODED: bool;

    /// Human-readable name for logging
    fn name() -> &'static str;

    fn lookup_key() -> u32 {
        lookup_key(Self::ID, Self::FREQUENCY)
    }
}

/// Fold a frequency and id into a dispatch key
pub fn lookup_key(id: u16, frequency: Frequency) -> u32 {
    match frequency {
        Frequency::High => id as u32,
        Frequency::Medium => (1 << 16) | (id as u32),
        Frequency::Low => (2 << 16) | (id as u32),
        Frequency::Fixed => (3 << 16) | (id as u32),
    }
}

/// A parsed inbound packet, body still in wire form
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    pub body: Vec<u8>,
    pub message_id: u16,
    pub frequency: Frequency,
    pub sequence: u32,
    pub reliable: bool,
    pub resent: bool,
    pub zerocoded: bool,
    /// Sequence ids acknowledged by the appended trailer
    pub acks: Vec<u32>,
}

impl ReceivedPacket {
    pub fn lookup_key(&self) -> u32 {
        lookup_key(self.message_id, self.frequency)
    }

    pub fn is<M: Message>(&self) -> bool {
        self.lookup_key() == M::lookup_key()
    }

    /// Name of the message type if it is one we know
    pub fn message_name(&self) -> &'static str {
        message_name(self.lookup_key()).unwrap_or("Unknown")
    }

    pub fn decode<M: Message>(&self) -> NetworkResult<M> {
        if self.message_id != M::ID || self.frequency != M::FREQUENCY {
            return Err(NetworkError::PacketDecode {
                reason: format!(
                    "Message type mismatch: expected {}:{:?}, got {}:{:?}",
                    M::ID,
                    M::FREQUENCY,
                    self.message_id,
                    self.frequency
                ),
            });
        }

        bincode::deserialize(&self.body).map_err(|e| NetworkError::PacketDecode {
            reason: format!("Failed to deserialize {}: {}", M::name(), e),
        })
    }
}

static MESSAGE_NAMES: OnceLock<HashMap<u32, &'static str>> = OnceLock::new();

fn names() -> &'static HashMap<u32, &'static str> {
    MESSAGE_NAMES.get_or_init(|| {
        let mut registry = HashMap::new();
        register::<UseCircuitCode>(&mut registry);
        register::<PacketAck>(&mut registry);
        register::<StartPingCheck>(&mut registry);
        register::<CompletePingCheck>(&mut registry);
        register::<CloseCircuit>(&mut registry);
        register::<LogoutRequest>(&mut registry);
        register::<LogoutReply>(&mut registry);
        register::<KickUser>(&mut registry);
        register::<DisableSimulator>(&mut registry);
        registry
    })
}

fn register<M: Message>(registry: &mut HashMap<u32, &'static str>) {
    registry.insert(M::lookup_key(), M::name());
}

/// Look up a message name by dispatch key
pub fn message_name(key: u32) -> Option<&'static str> {
    names().get(&key).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_keys_do_not_collide_across_frequencies() {
        assert_ne!(
            lookup_key(1, Frequency::High),
            lookup_key(1, Frequency::Low)
        );
        assert_ne!(
            lookup_key(252, Frequency::Low),
            lookup_key(252, Frequency::Fixed)
        );
    }

    #[test]
    fn known_messages_have_names() {
        assert_eq!(
            message_name(StartPingCheck::lookup_key()),
            Some("StartPingCheck")
        );
        assert_eq!(message_name(PacketAck::lookup_key()), Some("PacketAck"));
        assert_eq!(message_name(0x000F_FFFF), None);
    }
}
