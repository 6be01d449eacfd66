//! Circuit-level behavior against a hand-driven peer on loopback UDP

mod common;

use common::{fast_settings, MockSim};
use gridlink::config::NetworkSettings;
use gridlink::networking::circuit::{
    Circuit, CircuitOptions, CircuitState, ConnectOutcome, IncomingPacket,
};
use gridlink::networking::messages::{
    CloseCircuit, CompletePingCheck, LogoutRequest, Message, PacketAck, StartPingCheck,
    UseCircuitCode,
};
use gridlink::networking::serialization;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

fn options(address: SocketAddr) -> CircuitOptions {
    CircuitOptions {
        address,
        circuit_code: 42,
        agent_id: Uuid::new_v4(),
        session_id: Uuid::new_v4(),
    }
}

/// Stand-in for the manager's pump: apply inbound ACK bookkeeping so
/// tracked sends resolve
fn spawn_ack_pump(mut inbox_rx: mpsc::Receiver<IncomingPacket>) {
    tokio::spawn(async move {
        while let Some(incoming) = inbox_rx.recv().await {
            for &sequence in &incoming.packet.acks {
                incoming.circuit.acknowledge(sequence).await;
            }
            if incoming.packet.is::<PacketAck>() {
                if let Ok(acks) = incoming.packet.decode::<PacketAck>() {
                    for block in acks.packets {
                        incoming.circuit.acknowledge(block.id).await;
                    }
                }
            }
        }
    });
}

async fn connected_circuit(
    sim: &MockSim,
    settings: NetworkSettings,
) -> (Arc<Circuit>, SocketAddr) {
    let (inbox_tx, inbox_rx) = mpsc::channel(32);
    spawn_ack_pump(inbox_rx);
    let circuit = Circuit::new(options(sim.addr()), Arc::new(settings), inbox_tx)
        .await
        .unwrap();

    let handle = {
        let circuit = circuit.clone();
        tokio::spawn(async move { circuit.connect().await })
    };
    let (packet, peer) = sim.recv_message(UseCircuitCode::lookup_key()).await;
    sim.ack(peer, packet.sequence).await;
    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, ConnectOutcome::Confirmed);
    (circuit, peer)
}

#[tokio::test]
async fn handshake_is_confirmed_by_an_ack() {
    let sim = MockSim::bind().await;
    let (inbox_tx, inbox_rx) = mpsc::channel(32);
    spawn_ack_pump(inbox_rx);
    let circuit = Circuit::new(options(sim.addr()), Arc::new(fast_settings()), inbox_tx)
        .await
        .unwrap();

    let handle = {
        let circuit = circuit.clone();
        tokio::spawn(async move { circuit.connect().await })
    };

    let (packet, peer) = sim.recv_message(UseCircuitCode::lookup_key()).await;
    assert!(packet.reliable);
    assert_eq!(packet.sequence, 1);
    let open: UseCircuitCode = packet.decode().unwrap();
    assert_eq!(open.circuit_code, 42);
    assert_eq!(open.agent_id, circuit.agent_id());

    sim.ack(peer, packet.sequence).await;

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, ConnectOutcome::Confirmed);
    assert_eq!(circuit.state().await, CircuitState::Connected);
    assert_eq!(circuit.unacked_count().await, 0);
}

#[tokio::test]
async fn silent_peer_yields_unconfirmed_handshake_after_resends() {
    let sim = MockSim::bind().await;
    let mut settings = fast_settings();
    settings.login_timeout_ms = 600;
    settings.resend_timeout_ms = 100;
    settings.network_tick_ms = 50;
    settings.max_resend_count = 1;

    let (inbox_tx, inbox_rx) = mpsc::channel(32);
    spawn_ack_pump(inbox_rx);
    let circuit = Circuit::new(options(sim.addr()), Arc::new(settings), inbox_tx)
        .await
        .unwrap();

    let handle = {
        let circuit = circuit.clone();
        tokio::spawn(async move { circuit.connect().await })
    };

    let key = UseCircuitCode::lookup_key();
    let (first, _) = sim.recv_message(key).await;
    assert!(!first.resent);
    let (second, _) = sim.recv_message(key).await;
    // Retransmission keeps the original sequence and sets the resent flag
    assert_eq!(second.sequence, first.sequence);
    assert!(second.resent);

    let outcome = handle.await.unwrap().unwrap();
    assert_eq!(outcome, ConnectOutcome::Unconfirmed);
    assert_eq!(circuit.state().await, CircuitState::Connected);
}

#[tokio::test]
async fn ack_stops_retransmission() {
    let sim = MockSim::bind().await;
    let mut settings = fast_settings();
    settings.resend_timeout_ms = 100;
    settings.network_tick_ms = 50;
    let (circuit, peer) = connected_circuit(&sim, settings).await;

    circuit
        .send(&LogoutRequest {
            agent_id: circuit.agent_id(),
            session_id: circuit.session_id(),
        })
        .await
        .unwrap();

    let key = LogoutRequest::lookup_key();
    let (request, _) = sim.recv_message(key).await;
    assert!(request.reliable);
    assert_eq!(circuit.unacked_count().await, 1);

    sim.ack(peer, request.sequence).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(circuit.unacked_count().await, 0);

    // With the entry resolved, nothing gets retransmitted
    assert!(sim
        .recv_message_within(key, Duration::from_millis(400))
        .await
        .is_none());
}

#[tokio::test]
async fn queued_acks_piggyback_on_the_next_send() {
    let sim = MockSim::bind().await;
    let mut settings = fast_settings();
    settings.network_tick_ms = 5_000; // keep the standalone flush out of the way
    settings.max_pending_acks = 100;
    let (circuit, peer) = connected_circuit(&sim, settings).await;

    let probe = StartPingCheck {
        ping_id: 0,
        oldest_unacked: 0,
    };
    sim.send(peer, &probe, 77, true, false).await;

    // The queued ACK must wait for the next outbound packet; no standalone
    // PacketAck may fire ahead of it
    assert!(sim
        .recv_message_within(PacketAck::lookup_key(), Duration::from_millis(150))
        .await
        .is_none());

    circuit
        .send(&LogoutRequest {
            agent_id: circuit.agent_id(),
            session_id: circuit.session_id(),
        })
        .await
        .unwrap();

    let (request, _) = sim.recv_message(LogoutRequest::lookup_key()).await;
    assert_eq!(request.acks, vec![77]);
}

#[tokio::test]
async fn pending_acks_flush_early_when_the_queue_fills() {
    let sim = MockSim::bind().await;
    let mut settings = fast_settings();
    settings.network_tick_ms = 5_000;
    settings.max_pending_acks = 3;
    let (_circuit, peer) = connected_circuit(&sim, settings).await;

    let probe = StartPingCheck {
        ping_id: 0,
        oldest_unacked: 0,
    };
    for sequence in [10, 11, 12] {
        sim.send(peer, &probe, sequence, true, false).await;
    }

    // The third queued ACK crosses max_pending_acks and forces a flush
    // well before the 5s tick
    let (ack_packet, _) = sim
        .recv_message_within(PacketAck::lookup_key(), Duration::from_secs(1))
        .await
        .expect("forced ack flush");
    let acks: PacketAck = ack_packet.decode().unwrap();
    let mut ids: Vec<u32> = acks.packets.iter().map(|block| block.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![10, 11, 12]);
}

#[tokio::test]
async fn concurrent_sends_get_distinct_sequences() {
    let sim = MockSim::bind().await;
    let (circuit, _peer) = connected_circuit(&sim, fast_settings()).await;

    // The handshake used sequence 1; 32 racing senders must split the
    // next 32 numbers between them with no gaps and no repeats
    let mut handles = Vec::new();
    for _ in 0..32 {
        let circuit = circuit.clone();
        handles.push(tokio::spawn(async move {
            circuit
                .send(&StartPingCheck {
                    ping_id: 0,
                    oldest_unacked: 0,
                })
                .await
                .unwrap()
        }));
    }

    let mut sequences = Vec::new();
    for handle in handles {
        sequences.push(handle.await.unwrap());
    }
    sequences.sort_unstable();
    sequences.dedup();
    assert_eq!(sequences.len(), 32);
    assert_eq!(sequences[0], 2);
    assert_eq!(sequences[31], 33);
}

#[tokio::test]
async fn raw_sends_go_out_with_a_fresh_sequence() {
    let sim = MockSim::bind().await;
    let (circuit, _peer) = connected_circuit(&sim, fast_settings()).await;

    let encoded = serialization::encode_message(&CompletePingCheck { ping_id: 3 }, false).unwrap();
    let sequence = circuit.send_raw(encoded, true).await.unwrap();
    assert!(sequence > 0);

    let (packet, _) = sim.recv_message(CompletePingCheck::lookup_key()).await;
    assert_eq!(packet.sequence, sequence);

    // Undersized buffers are rejected before they reach the socket
    assert!(circuit.send_raw(vec![0u8; 3], true).await.is_err());
}

#[tokio::test]
async fn disconnect_notifies_the_peer_once() {
    let sim = MockSim::bind().await;
    let (circuit, _peer) = connected_circuit(&sim, fast_settings()).await;

    circuit.disconnect(true).await;
    assert_eq!(circuit.state().await, CircuitState::Disconnected);
    assert!(sim
        .recv_message_within(CloseCircuit::lookup_key(), Duration::from_secs(1))
        .await
        .is_some());

    // Disconnecting again is a no-op
    circuit.disconnect(true).await;
    assert!(sim
        .recv_message_within(CloseCircuit::lookup_key(), Duration::from_millis(300))
        .await
        .is_none());
}
