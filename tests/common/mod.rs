//! Shared fixtures: mock simulators on loopback UDP and fast timer settings
#![allow(dead_code)]

use gridlink::config::NetworkSettings;
use gridlink::networking::manager::NetworkEvent;
use gridlink::networking::messages::{AckBlock, Message, PacketAck, ReceivedPacket};
use gridlink::networking::serialization;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

/// Protocol defaults scaled down so tests finish quickly
pub fn fast_settings() -> NetworkSettings {
    let mut settings = NetworkSettings::default();
    settings.network_tick_ms = 50;
    settings.resend_timeout_ms = 150;
    settings.login_timeout_ms = 2_000;
    settings.logout_timeout_ms = 2_000;
    settings.send_pings = false;
    settings
}

/// Hand-driven peer endpoint
pub struct MockSim {
    pub socket: UdpSocket,
}

impl MockSim {
    pub async fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        Self { socket }
    }

    pub fn addr(&self) -> SocketAddr {
        self.socket.local_addr().unwrap()
    }

    pub async fn recv(&self) -> (ReceivedPacket, SocketAddr) {
        let mut buf = vec![0u8; 4096];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await.unwrap();
            if let Ok(packet) = serialization::decode_raw(&buf[..len]) {
                return (packet, peer);
            }
        }
    }

    /// Receive, skipping packets of other types
    pub async fn recv_message(&self, key: u32) -> (ReceivedPacket, SocketAddr) {
        loop {
            let (packet, peer) = self.recv().await;
            if packet.lookup_key() == key {
                return (packet, peer);
            }
        }
    }

    pub async fn recv_message_within(
        &self,
        key: u32,
        within: Duration,
    ) -> Option<(ReceivedPacket, SocketAddr)> {
        tokio::time::timeout(within, self.recv_message(key)).await.ok()
    }

    pub async fn send<M: Message>(
        &self,
        peer: SocketAddr,
        message: &M,
        sequence: u32,
        reliable: bool,
        resent: bool,
    ) {
        let mut data = serialization::encode_message(message, reliable).unwrap();
        if resent {
            serialization::mark_resent(&mut data);
        }
        serialization::stamp_sequence(&mut data, sequence);
        self.socket.send_to(&data, peer).await.unwrap();
    }

    /// Acknowledge one reliable sequence from the peer
    pub async fn ack(&self, peer: SocketAddr, sequence: u32) {
        let ack = PacketAck {
            packets: vec![AckBlock { id: sequence }],
        };
        self.send(peer, &ack, 0, false, false).await;
    }
}

/// Peer endpoint that ACKs every reliable packet and forwards what it saw
pub struct AutoAckSim {
    pub socket: Arc<UdpSocket>,
    pub addr: SocketAddr,
    pub packets: mpsc::UnboundedReceiver<(ReceivedPacket, SocketAddr)>,
}

impl AutoAckSim {
    pub async fn spawn() -> Self {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let addr = socket.local_addr().unwrap();
        let (forward_tx, forward_rx) = mpsc::unbounded_channel();

        let recv_socket = socket.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            let mut sequence = 1u32;
            loop {
                let Ok((len, peer)) = recv_socket.recv_from(&mut buf).await else {
                    break;
                };
                let Ok(packet) = serialization::decode_raw(&buf[..len]) else {
                    continue;
                };
                if packet.reliable {
                    let ack = PacketAck {
                        packets: vec![AckBlock { id: packet.sequence }],
                    };
                    let mut data = serialization::encode_message(&ack, false).unwrap();
                    serialization::stamp_sequence(&mut data, sequence);
                    sequence += 1;
                    let _ = recv_socket.send_to(&data, peer).await;
                }
                if forward_tx.send((packet, peer)).is_err() {
                    break;
                }
            }
        });

        Self {
            socket,
            addr,
            packets: forward_rx,
        }
    }

    pub async fn send<M: Message>(
        &self,
        peer: SocketAddr,
        message: &M,
        sequence: u32,
        reliable: bool,
        resent: bool,
    ) {
        let mut data = serialization::encode_message(message, reliable).unwrap();
        if resent {
            serialization::mark_resent(&mut data);
        }
        serialization::stamp_sequence(&mut data, sequence);
        self.socket.send_to(&data, peer).await.unwrap();
    }

    /// Pull forwarded packets until one matches, bounded by `within`
    pub async fn expect_message(
        &mut self,
        key: u32,
        within: Duration,
    ) -> Option<(ReceivedPacket, SocketAddr)> {
        tokio::time::timeout(within, async {
            loop {
                match self.packets.recv().await {
                    Some((packet, peer)) if packet.lookup_key() == key => {
                        return Some((packet, peer))
                    }
                    Some(_) => continue,
                    None => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }
}

/// Wait for a broadcast event matching the predicate
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<NetworkEvent>,
    within: Duration,
    matches: F,
) -> Option<NetworkEvent>
where
    F: Fn(&NetworkEvent) -> bool,
{
    tokio::time::timeout(within, async {
        loop {
            match events.recv().await {
                Ok(event) if matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}
