//! Transport-level control messages
//!
//! Ids and frequencies follow the grid's message template. Bodies are
//! bincode-encoded; variable-count blocks become `Vec` fields.

use super::{Frequency, Message};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// First packet on every circuit; binds the UDP flow to a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UseCircuitCode {
    pub circuit_code: u32,
    pub session_id: Uuid,
    pub agent_id: Uuid,
}

impl Message for UseCircuitCode {
    const ID: u16 = 3;
    const FREQUENCY: Frequency = Frequency::Low;
    const RELIABLE: bool = true;
    const ZEROCODED: bool = false;

    fn name() -> &'static str {
        "UseCircuitCode"
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AckBlock {
    pub id: u32,
}

/// Standalone batch of selective acknowledgements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketAck {
    pub packets: Vec<AckBlock>,
}

impl Message for PacketAck {
    const ID: u16 = 251;
    const FREQUENCY: Frequency = Frequency::Fixed;
    const RELIABLE: bool = false;
    const ZEROCODED: bool = false;

    fn name() -> &'static str {
        "PacketAck"
    }
}

/// Keepalive probe; `oldest_unacked` lets the peer spot ACK loss
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StartPingCheck {
    pub ping_id: u8,
    pub oldest_unacked: u32,
}

impl Message for StartPingCheck {
    const ID: u16 = 1;
    const FREQUENCY: Frequency = Frequency::High;
    const RELIABLE: bool = false;
    const ZEROCODED: bool = false;

    fn name() -> &'static str {
        "StartPingCheck"
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CompletePingCheck {
    pub ping_id: u8,
}

impl Message for CompletePingCheck {
    const ID: u16 = 2;
    const FREQUENCY: Frequency = Frequency::High;
    const RELIABLE: bool = false;
    const ZEROCODED: bool = false;

    fn name() -> &'static str {
        "CompletePingCheck"
    }
}

/// Courtesy notice that this end is closing the circuit
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CloseCircuit;

impl Message for CloseCircuit {
    const ID: u16 = 252;
    const FREQUENCY: Frequency = Frequency::Fixed;
    const RELIABLE: bool = false;
    const ZEROCODED: bool = false;

    fn name() -> &'static str {
        "CloseCircuit"
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LogoutRequest {
    pub agent_id: Uuid,
    pub session_id: Uuid,
}

impl Message for LogoutRequest {
    const ID: u16 = 252;
    const FREQUENCY: Frequency = Frequency::Low;
    const RELIABLE: bool = true;
    const ZEROCODED: bool = false;

    fn name() -> &'static str {
        "LogoutRequest"
    }
}

/// Simulator confirmation of a logout, with any items still being saved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogoutReply {
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub inventory_items: Vec<Uuid>,
}

impl Message for LogoutReply {
    const ID: u16 = 253;
    const FREQUENCY: Frequency = Frequency::Low;
    const RELIABLE: bool = true;
    const ZEROCODED: bool = true;

    fn name() -> &'static str {
        "LogoutReply"
    }
}

/// Server-initiated disconnect with a user-facing reason
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KickUser {
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub reason: String,
}

impl Message for KickUser {
    const ID: u16 = 163;
    const FREQUENCY: Frequency = Frequency::Low;
    const RELIABLE: bool = true;
    const ZEROCODED: bool = true;

    fn name() -> &'static str {
        "KickUser"
    }
}

/// The simulator is shutting this circuit down
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DisableSimulator;

impl Message for DisableSimulator {
    const ID: u16 = 152;
    const FREQUENCY: Frequency = Frequency::Low;
    const RELIABLE: bool = true;
    const ZEROCODED: bool = false;

    fn name() -> &'static str {
        "DisableSimulator"
    }
}
