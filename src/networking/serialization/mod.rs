//! Wire codec for the grid UDP protocol
//!
//! Layout: `[flags:1] [sequence:4 BE] [extra:1] [message id:1-4] [body]`
//! with an optional appended-ACK trailer of 4-byte big-endian sequence ids
//! followed by a count byte. Zero-coding covers the message id and body,
//! never the header or the trailer.

use crate::networking::messages::{Frequency, Message, ReceivedPacket};
use crate::networking::{NetworkError, NetworkResult};
use bytes::{BufMut, BytesMut};

pub mod packet_buffer;
pub mod zerocode;

pub use packet_buffer::PacketBuffer;

/// Sequence numbers wrap back to 1 past this value
pub const MAX_SEQUENCE: u32 = 0x00FF_FFFF;

/// Packet flags
pub const RELIABLE_FLAG: u8 = 0x40;
pub const RESENT_FLAG: u8 = 0x20;
pub const ZEROCODED_FLAG: u8 = 0x80;
pub const APPENDED_ACKS_FLAG: u8 = 0x10;

/// Flags byte + sequence + extra byte
pub const HEADER_LEN: usize = 6;

/// Bytes per appended ACK id
pub const ACK_LEN: usize = 4;

/// Encode a message into wire form with a zeroed sequence field.
///
/// The sequence is stamped later by [`stamp_sequence`], immediately before
/// the datagram goes out, so resends keep their original number.
pub fn encode_message<M: Message>(message: &M, reliable: bool) -> NetworkResult<Vec<u8>> {
    let body = bincode::serialize(message).map_err(|e| NetworkError::PacketEncode {
        reason: format!("Failed to serialize {}: {}", M::name(), e),
    })?;

    let mut payload = BytesMut::with_capacity(4 + body.len());
    write_message_id(&mut payload, M::ID, M::FREQUENCY);
    payload.extend_from_slice(&body);

    let payload = if M::ZEROCODED {
        zerocode::encode(&payload)
    } else {
        payload.to_vec()
    };

    let mut flags = 0u8;
    if reliable {
        flags |= RELIABLE_FLAG;
    }
    if M::ZEROCODED {
        flags |= ZEROCODED_FLAG;
    }

    let mut buffer = Vec::with_capacity(HEADER_LEN + payload.len());
    buffer.put_u8(flags);
    buffer.put_u32(0); // sequence placeholder
    buffer.put_u8(0); // extra header byte
    buffer.extend_from_slice(&payload);

    Ok(buffer)
}

/// Write the assigned sequence number into an encoded packet
pub fn stamp_sequence(data: &mut [u8], sequence: u32) {
    data[1..5].copy_from_slice(&sequence.to_be_bytes());
}

/// Flag an encoded packet as a retransmission
pub fn mark_resent(data: &mut [u8]) {
    data[0] |= RESENT_FLAG;
}

/// Append an ACK trailer to an encoded packet.
///
/// The trailer rides after any zero-coded payload as raw bytes; the caller
/// is responsible for keeping the result under the datagram size limit and
/// the ack count at or below 255.
pub fn append_acks(data: &mut Vec<u8>, acks: &[u32]) {
    if acks.is_empty() {
        return;
    }
    for &ack in acks {
        data.extend_from_slice(&ack.to_be_bytes());
    }
    data.push(acks.len() as u8);
    data[0] |= APPENDED_ACKS_FLAG;
}

/// Parse a raw datagram into a [`ReceivedPacket`]
pub fn decode_raw(data: &[u8]) -> NetworkResult<ReceivedPacket> {
    if data.len() < HEADER_LEN + 1 {
        return Err(NetworkError::PacketDecode {
            reason: "Packet too short for header".to_string(),
        });
    }

    let flags = data[0];
    let sequence = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    // data[5] is the extra header byte, always skipped

    let reliable = (flags & RELIABLE_FLAG) != 0;
    let resent = (flags & RESENT_FLAG) != 0;
    let zerocoded = (flags & ZEROCODED_FLAG) != 0;

    // Strip the ACK trailer before any zero-decoding
    let mut payload_end = data.len();
    let mut acks = Vec::new();
    if (flags & APPENDED_ACKS_FLAG) != 0 {
        let count = data[data.len() - 1] as usize;
        let trailer_len = count * ACK_LEN + 1;
        if data.len() < HEADER_LEN + 1 + trailer_len {
            return Err(NetworkError::PacketDecode {
                reason: format!("ACK trailer of {} entries overruns packet", count),
            });
        }
        payload_end = data.len() - trailer_len;
        let mut reader = PacketBuffer::new(&data[payload_end..data.len() - 1]);
        for _ in 0..count {
            acks.push(reader.get_u32()?);
        }
    }

    let payload = if zerocoded {
        zerocode::decode(&data[HEADER_LEN..payload_end])?
    } else {
        data[HEADER_LEN..payload_end].to_vec()
    };

    let mut reader = PacketBuffer::new(&payload);
    let (message_id, frequency) = parse_message_id(&mut reader)?;
    let body = reader.remaining_bytes().to_vec();

    Ok(ReceivedPacket {
        body,
        message_id,
        frequency,
        sequence,
        reliable,
        resent,
        zerocoded,
        acks,
    })
}

/// Frequency-coded message id prefix
fn write_message_id(buffer: &mut BytesMut, message_id: u16, frequency: Frequency) {
    match frequency {
        Frequency::High => {
            buffer.put_u8(message_id as u8);
        }
        Frequency::Medium => {
            buffer.put_u8(0xFF);
            buffer.put_u8(message_id as u8);
        }
        Frequency::Low => {
            buffer.put_u8(0xFF);
            buffer.put_u8(0xFF);
            buffer.put_u16(message_id);
        }
        Frequency::Fixed => {
            buffer.put_u8(0xFF);
            buffer.put_u8(0xFF);
            buffer.put_u8(0xFF);
            buffer.put_u8(message_id as u8);
        }
    }
}

fn parse_message_id(reader: &mut PacketBuffer) -> NetworkResult<(u16, Frequency)> {
    let first_byte = reader.get_u8()?;
    if first_byte != 0xFF {
        return Ok((first_byte as u16, Frequency::High));
    }

    let second_byte = reader.get_u8()?;
    if second_byte != 0xFF {
        return Ok((second_byte as u16, Frequency::Medium));
    }

    let third_byte = reader.get_u8()?;
    if third_byte != 0xFF {
        let fourth_byte = reader.get_u8()?;
        let id = ((third_byte as u16) << 8) | (fourth_byte as u16);
        return Ok((id, Frequency::Low));
    }

    let id = reader.get_u8()? as u16;
    Ok((id, Frequency::Fixed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networking::messages::{
        AckBlock, CompletePingCheck, LogoutReply, LogoutRequest, PacketAck, StartPingCheck,
        UseCircuitCode,
    };
    use uuid::Uuid;

    #[test]
    fn low_frequency_round_trip() {
        let message = LogoutRequest {
            agent_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
        };
        let mut data = encode_message(&message, true).unwrap();
        stamp_sequence(&mut data, 42);

        let packet = decode_raw(&data).unwrap();
        assert_eq!(packet.sequence, 42);
        assert!(packet.reliable);
        assert!(!packet.resent);
        assert_eq!(packet.lookup_key(), LogoutRequest::lookup_key());

        let decoded: LogoutRequest = packet.decode().unwrap();
        assert_eq!(decoded.agent_id, message.agent_id);
        assert_eq!(decoded.session_id, message.session_id);
    }

    #[test]
    fn high_frequency_round_trip() {
        let message = StartPingCheck { ping_id: 7, oldest_unacked: 99 };
        let mut data = encode_message(&message, false).unwrap();
        stamp_sequence(&mut data, 1);

        let packet = decode_raw(&data).unwrap();
        assert!(!packet.reliable);
        assert_eq!(packet.lookup_key(), StartPingCheck::lookup_key());
        let decoded: StartPingCheck = packet.decode().unwrap();
        assert_eq!(decoded.ping_id, 7);
        assert_eq!(decoded.oldest_unacked, 99);
    }

    #[test]
    fn fixed_frequency_round_trip() {
        let message = PacketAck {
            packets: vec![AckBlock { id: 3 }, AckBlock { id: 9 }],
        };
        let mut data = encode_message(&message, false).unwrap();
        stamp_sequence(&mut data, 5);

        let packet = decode_raw(&data).unwrap();
        assert_eq!(packet.lookup_key(), PacketAck::lookup_key());
        let decoded: PacketAck = packet.decode().unwrap();
        assert_eq!(decoded.packets.len(), 2);
        assert_eq!(decoded.packets[1].id, 9);
    }

    #[test]
    fn zerocoded_message_round_trip() {
        // LogoutReply is zero-coded on the wire; UUID payloads carry zero runs
        let message = LogoutReply {
            agent_id: Uuid::nil(),
            session_id: Uuid::new_v4(),
            inventory_items: vec![Uuid::nil()],
        };
        let mut data = encode_message(&message, true).unwrap();
        stamp_sequence(&mut data, 8);
        assert_ne!(data[0] & ZEROCODED_FLAG, 0);

        let packet = decode_raw(&data).unwrap();
        assert!(packet.zerocoded);
        let decoded: LogoutReply = packet.decode().unwrap();
        assert_eq!(decoded.agent_id, Uuid::nil());
        assert_eq!(decoded.session_id, message.session_id);
    }

    #[test]
    fn ack_trailer_survives_zerocoding() {
        let message = LogoutReply {
            agent_id: Uuid::nil(),
            session_id: Uuid::nil(),
            inventory_items: Vec::new(),
        };
        let mut data = encode_message(&message, true).unwrap();
        // Trailer ids full of zero bytes must not confuse the zero-decoder
        append_acks(&mut data, &[1, 0x0100, 7]);
        stamp_sequence(&mut data, 12);

        let packet = decode_raw(&data).unwrap();
        assert_eq!(packet.acks, vec![1, 0x0100, 7]);
        assert!(packet.decode::<LogoutReply>().is_ok());
    }

    #[test]
    fn empty_ack_list_leaves_packet_untouched() {
        let message = CompletePingCheck { ping_id: 1 };
        let mut data = encode_message(&message, false).unwrap();
        let before = data.clone();
        append_acks(&mut data, &[]);
        assert_eq!(data, before);
        assert_eq!(data[0] & APPENDED_ACKS_FLAG, 0);
    }

    #[test]
    fn sequence_stamp_caps_at_max() {
        let message = CompletePingCheck { ping_id: 1 };
        let mut data = encode_message(&message, false).unwrap();
        stamp_sequence(&mut data, MAX_SEQUENCE);
        let packet = decode_raw(&data).unwrap();
        assert_eq!(packet.sequence, MAX_SEQUENCE);
    }

    #[test]
    fn truncated_packet_is_rejected() {
        assert!(decode_raw(&[0x40, 0, 0, 0]).is_err());
    }

    #[test]
    fn oversized_ack_trailer_is_rejected() {
        let message = UseCircuitCode {
            circuit_code: 1,
            session_id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
        };
        let mut data = encode_message(&message, true).unwrap();
        data[0] |= APPENDED_ACKS_FLAG;
        data.push(200); // claims 200 ACKs that are not there
        assert!(decode_raw(&data).is_err());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let message = CompletePingCheck { ping_id: 3 };
        let mut data = encode_message(&message, false).unwrap();
        stamp_sequence(&mut data, 2);
        let packet = decode_raw(&data).unwrap();
        assert!(packet.decode::<StartPingCheck>().is_err());
    }
}
