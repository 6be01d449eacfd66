//! One reliable-UDP circuit to a simulator host
//!
//! A circuit owns its socket and receive task, assigns outgoing sequence
//! numbers, tracks unacknowledged reliable packets for retransmission,
//! batches outbound ACKs, and runs the keepalive ping. Inbound packets are
//! handed to the connection manager's pump through a bounded queue;
//! duplicate suppression and ACK bookkeeping for inbound traffic happen
//! there, driven by the methods this type exposes.

use crate::config::NetworkSettings;
use crate::networking::messages::{
    AckBlock, CloseCircuit, Message, PacketAck, ReceivedPacket, StartPingCheck, UseCircuitCode,
};
use crate::networking::serialization::{self, MAX_SEQUENCE};
use crate::networking::{NetworkError, NetworkResult};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock};
use tokio::time::{interval, timeout};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Oldest entries evicted together when the duplicate archive fills
const ARCHIVE_EVICT_BATCH: usize = 4;

/// Identity a circuit binds to its UDP flow
#[derive(Debug, Clone)]
pub struct CircuitOptions {
    pub address: SocketAddr,
    pub circuit_code: u32,
    pub agent_id: Uuid,
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Connecting,
    Connected,
    Disconnected,
}

/// How the connect handshake resolved.
///
/// `Unconfirmed` means the UseCircuitCode ACK never arrived; the circuit is
/// treated as connected anyway and real traffic usually follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    Confirmed,
    Unconfirmed,
}

/// A decoded packet travelling from a circuit's receive task to the pump
pub struct IncomingPacket {
    pub circuit: Arc<Circuit>,
    pub packet: ReceivedPacket,
}

/// Reliable packet awaiting acknowledgement
struct UnackedPacket {
    data: Vec<u8>,
    message: &'static str,
    sent_at: Instant,
    resend_count: u32,
    notify: Option<oneshot::Sender<()>>,
}

/// Ring of recently seen inbound sequence numbers
struct PacketArchive {
    order: VecDeque<u32>,
    seen: HashSet<u32>,
    capacity: usize,
}

impl PacketArchive {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
            capacity: capacity.max(ARCHIVE_EVICT_BATCH),
        }
    }

    /// Record a sequence; false means it was already present
    fn try_enqueue(&mut self, sequence: u32) -> bool {
        if !self.seen.insert(sequence) {
            return false;
        }
        self.order.push_back(sequence);
        if self.order.len() > self.capacity {
            for _ in 0..ARCHIVE_EVICT_BATCH {
                if let Some(oldest) = self.order.pop_front() {
                    self.seen.remove(&oldest);
                }
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

struct PingTracker {
    next_ping_id: u8,
    last_ping_id: u8,
    last_ping_sent: Option<Instant>,
}

impl PingTracker {
    fn new() -> Self {
        Self {
            next_ping_id: 0,
            last_ping_id: 0,
            last_ping_sent: None,
        }
    }

    fn begin_ping(&mut self) -> u8 {
        let ping_id = self.next_ping_id;
        self.next_ping_id = self.next_ping_id.wrapping_add(1);
        self.last_ping_id = ping_id;
        self.last_ping_sent = Some(Instant::now());
        ping_id
    }

    /// Round-trip time if `ping_id` matches the outstanding probe
    fn complete(&mut self, ping_id: u8) -> Option<Duration> {
        if self.last_ping_id != ping_id {
            return None;
        }
        self.last_ping_sent.take().map(|sent| sent.elapsed())
    }
}

struct ThrottleState {
    allowance: f64,
    last_refill: Instant,
}

struct StatsInner {
    sent_packets: u64,
    recv_packets: u64,
    sent_bytes: u64,
    recv_bytes: u64,
    resent_packets: u64,
    received_resends: u64,
    sent_pings: u64,
    received_pongs: u64,
    incoming_history: VecDeque<u64>,
    outgoing_history: VecDeque<u64>,
    incoming_bps: u64,
    outgoing_bps: u64,
    last_lag: Option<Duration>,
}

/// Point-in-time throughput and reliability counters for one circuit
#[derive(Debug, Clone, Default)]
pub struct CircuitStats {
    pub sent_packets: u64,
    pub recv_packets: u64,
    pub sent_bytes: u64,
    pub recv_bytes: u64,
    pub resent_packets: u64,
    pub received_resends: u64,
    pub sent_pings: u64,
    pub received_pongs: u64,
    /// Bytes per second over the stats window
    pub incoming_bps: u64,
    pub outgoing_bps: u64,
    pub last_lag: Option<Duration>,
}

pub struct Circuit {
    options: CircuitOptions,
    settings: Arc<NetworkSettings>,
    socket: UdpSocket,
    state: RwLock<CircuitState>,
    sequence: StdMutex<u32>,
    unacked: Mutex<BTreeMap<u32, UnackedPacket>>,
    pending_acks: Mutex<BTreeSet<u32>>,
    archive: StdMutex<PacketArchive>,
    ping: StdMutex<PingTracker>,
    throttle: StdMutex<ThrottleState>,
    stats: StdMutex<StatsInner>,
    disconnect_candidate: AtomicBool,
    seed_capability: StdMutex<Option<String>>,
    inbox_tx: mpsc::Sender<IncomingPacket>,
    shutdown_tx: watch::Sender<bool>,
}

impl Circuit {
    /// Bind a local socket for the given endpoint. The circuit is inert
    /// until [`connect`](Self::connect) starts its tasks.
    pub async fn new(
        options: CircuitOptions,
        settings: Arc<NetworkSettings>,
        inbox_tx: mpsc::Sender<IncomingPacket>,
    ) -> NetworkResult<Arc<Self>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(options.address).await?;
        let (shutdown_tx, _) = watch::channel(false);

        Ok(Arc::new(Self {
            archive: StdMutex::new(PacketArchive::new(settings.packet_archive_size)),
            options,
            settings,
            socket,
            state: RwLock::new(CircuitState::Connecting),
            sequence: StdMutex::new(1),
            unacked: Mutex::new(BTreeMap::new()),
            pending_acks: Mutex::new(BTreeSet::new()),
            ping: StdMutex::new(PingTracker::new()),
            throttle: StdMutex::new(ThrottleState {
                allowance: 0.0,
                last_refill: Instant::now(),
            }),
            stats: StdMutex::new(StatsInner {
                sent_packets: 0,
                recv_packets: 0,
                sent_bytes: 0,
                recv_bytes: 0,
                resent_packets: 0,
                received_resends: 0,
                sent_pings: 0,
                received_pongs: 0,
                incoming_history: VecDeque::new(),
                outgoing_history: VecDeque::new(),
                incoming_bps: 0,
                outgoing_bps: 0,
                last_lag: None,
            }),
            disconnect_candidate: AtomicBool::new(false),
            seed_capability: StdMutex::new(None),
            inbox_tx,
            shutdown_tx,
        }))
    }

    /// Open the circuit: start the receive and maintenance tasks, send
    /// UseCircuitCode reliably, and wait out the handshake ACK.
    pub async fn connect(self: &Arc<Self>) -> NetworkResult<ConnectOutcome> {
        {
            let mut state = self.state.write().await;
            *state = CircuitState::Connecting;
        }
        self.start_tasks();

        let open = UseCircuitCode {
            circuit_code: self.options.circuit_code,
            session_id: self.options.session_id,
            agent_id: self.options.agent_id,
        };
        let ack_rx = self.send_reliable_tracked(&open).await?;

        let outcome = match timeout(self.settings.login_timeout(), ack_rx).await {
            Ok(Ok(())) => {
                info!(address = %self.options.address, "circuit handshake acknowledged");
                ConnectOutcome::Confirmed
            }
            Ok(Err(_)) | Err(_) => {
                warn!(
                    address = %self.options.address,
                    "no UseCircuitCode ACK, proceeding optimistically"
                );
                ConnectOutcome::Unconfirmed
            }
        };

        {
            let mut state = self.state.write().await;
            if *state == CircuitState::Disconnected {
                return Err(NetworkError::ConnectionLost {
                    address: self.options.address,
                });
            }
            *state = CircuitState::Connected;
        }
        Ok(outcome)
    }

    fn start_tasks(self: &Arc<Self>) {
        let circuit = self.clone();
        tokio::spawn(async move { circuit.receive_loop().await });

        let circuit = self.clone();
        tokio::spawn(async move { circuit.maintenance_loop().await });

        if self.settings.send_pings {
            let circuit = self.clone();
            tokio::spawn(async move { circuit.ping_loop().await });
        }

        let circuit = self.clone();
        tokio::spawn(async move { circuit.stats_loop().await });
    }

    // --- Sending ---

    /// Send a message with its default reliability
    pub async fn send<M: Message>(&self, message: &M) -> NetworkResult<u32> {
        self.send_message_with(message, M::RELIABLE, None).await
    }

    /// Send reliably and get a receiver that resolves when the peer ACKs.
    /// The receiver errors if the packet exhausts its resends.
    pub async fn send_reliable_tracked<M: Message>(
        &self,
        message: &M,
    ) -> NetworkResult<oneshot::Receiver<()>> {
        let (notify_tx, notify_rx) = oneshot::channel();
        self.send_message_with(message, true, Some(notify_tx)).await?;
        Ok(notify_rx)
    }

    /// Send a pre-encoded packet as-is, optionally assigning it a fresh
    /// sequence number. No reliability tracking and no piggybacked ACKs.
    pub async fn send_raw(&self, mut data: Vec<u8>, set_sequence: bool) -> NetworkResult<u32> {
        if data.len() < serialization::HEADER_LEN + 1 {
            return Err(NetworkError::PacketEncode {
                reason: "raw packet shorter than a header".to_string(),
            });
        }
        let sequence = if set_sequence {
            let sequence = self.next_sequence();
            serialization::stamp_sequence(&mut data, sequence);
            sequence
        } else {
            u32::from_be_bytes([data[1], data[2], data[3], data[4]])
        };
        self.transmit(&data).await?;
        trace!(sequence, len = data.len(), "sent raw packet");
        Ok(sequence)
    }

    async fn send_message_with<M: Message>(
        &self,
        message: &M,
        reliable: bool,
        notify: Option<oneshot::Sender<()>>,
    ) -> NetworkResult<u32> {
        let mut data = serialization::encode_message(message, reliable)?;
        let appended = self.take_pending_acks(&mut data).await;
        let sequence = self.next_sequence();
        serialization::stamp_sequence(&mut data, sequence);

        if reliable {
            let mut unacked = self.unacked.lock().await;
            unacked.insert(
                sequence,
                UnackedPacket {
                    data: data.clone(),
                    message: M::name(),
                    sent_at: Instant::now(),
                    resend_count: 0,
                    notify,
                },
            );
        }

        self.transmit(&data).await?;
        trace!(
            message = M::name(),
            sequence,
            reliable,
            appended_acks = appended,
            "sent packet"
        );
        Ok(sequence)
    }

    /// Drain queued ACKs into an encoded packet's trailer, as many as fit
    async fn take_pending_acks(&self, data: &mut Vec<u8>) -> usize {
        let batch: Vec<u32> = {
            let mut pending = self.pending_acks.lock().await;
            if pending.is_empty() {
                return 0;
            }
            let room = self
                .settings
                .max_packet_size
                .saturating_sub(data.len() + 1)
                / serialization::ACK_LEN;
            let limit = room.min(self.settings.max_appended_acks).min(255);
            if limit == 0 {
                return 0;
            }
            let batch: Vec<u32> = pending.iter().take(limit).copied().collect();
            for sequence in &batch {
                pending.remove(sequence);
            }
            batch
        };
        serialization::append_acks(data, &batch);
        batch.len()
    }

    async fn transmit(&self, data: &[u8]) -> NetworkResult<()> {
        self.throttle(data.len()).await;
        match self.socket.send(data).await {
            Ok(sent) => {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.sent_packets += 1;
                    stats.sent_bytes += sent as u64;
                }
                Ok(())
            }
            Err(e) => {
                warn!(address = %self.options.address, error = %e, "UDP send failed");
                self.mark_disconnected().await;
                Err(NetworkError::ConnectionLost {
                    address: self.options.address,
                })
            }
        }
    }

    /// Outgoing byte-rate cap, token-bucket with a one-second burst
    async fn throttle(&self, len: usize) {
        let cap = self.settings.outgoing_bytes_per_second;
        if cap == 0 {
            return;
        }
        let wait = {
            let mut throttle = match self.throttle.lock() {
                Ok(t) => t,
                Err(_) => return,
            };
            let elapsed = throttle.last_refill.elapsed().as_secs_f64();
            throttle.last_refill = Instant::now();
            throttle.allowance = (throttle.allowance + elapsed * cap as f64).min(cap as f64);
            if throttle.allowance >= len as f64 {
                throttle.allowance -= len as f64;
                None
            } else {
                let deficit = len as f64 - throttle.allowance;
                throttle.allowance = 0.0;
                Some(Duration::from_secs_f64(deficit / cap as f64))
            }
        };
        if let Some(wait) = wait {
            tokio::time::sleep(wait).await;
        }
    }

    fn next_sequence(&self) -> u32 {
        let mut sequence = match self.sequence.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        let value = *sequence;
        *sequence += 1;
        if *sequence > MAX_SEQUENCE {
            *sequence = 1;
        }
        value
    }

    // --- Inbound bookkeeping, driven by the manager's pump ---

    /// Resolve an outstanding reliable packet; true if it was pending
    pub async fn acknowledge(&self, sequence: u32) -> bool {
        let removed = self.unacked.lock().await.remove(&sequence);
        match removed {
            Some(packet) => {
                if let Some(notify) = packet.notify {
                    let _ = notify.send(());
                }
                trace!(sequence, message = packet.message, "packet acknowledged");
                true
            }
            None => false,
        }
    }

    /// Record an inbound reliable sequence; false means duplicate
    pub fn archive_sequence(&self, sequence: u32) -> bool {
        match self.archive.lock() {
            Ok(mut archive) => archive.try_enqueue(sequence),
            Err(poisoned) => poisoned.into_inner().try_enqueue(sequence),
        }
    }

    /// Record a ping reply and update the lag estimate
    pub fn complete_ping(&self, ping_id: u8) {
        let lag = match self.ping.lock() {
            Ok(mut ping) => ping.complete(ping_id),
            Err(poisoned) => poisoned.into_inner().complete(ping_id),
        };
        if let Some(lag) = lag {
            if let Ok(mut stats) = self.stats.lock() {
                stats.received_pongs += 1;
                stats.last_lag = Some(lag);
            }
            trace!(address = %self.options.address, ?lag, "ping round trip");
        }
    }

    // --- Background tasks ---

    async fn receive_loop(self: Arc<Self>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let mut buf = vec![0u8; self.settings.max_packet_size * 2];
        loop {
            let len = tokio::select! {
                result = self.socket.recv(&mut buf) => match result {
                    Ok(len) => len,
                    Err(e) => {
                        if self.state().await != CircuitState::Disconnected {
                            warn!(address = %self.options.address, error = %e, "UDP receive failed");
                            self.mark_disconnected().await;
                        }
                        break;
                    }
                },
                _ = shutdown_rx.changed() => break,
            };

            self.disconnect_candidate.store(false, Ordering::Relaxed);
            if let Ok(mut stats) = self.stats.lock() {
                stats.recv_packets += 1;
                stats.recv_bytes += len as u64;
            }

            let packet = match serialization::decode_raw(&buf[..len]) {
                Ok(packet) => packet,
                Err(e) => {
                    warn!(address = %self.options.address, error = %e, "dropping malformed packet");
                    continue;
                }
            };

            if packet.resent {
                if let Ok(mut stats) = self.stats.lock() {
                    stats.received_resends += 1;
                }
            }

            if packet.reliable {
                let flush_now = {
                    let mut pending = self.pending_acks.lock().await;
                    pending.insert(packet.sequence);
                    pending.len() >= self.settings.max_pending_acks
                };
                if flush_now {
                    self.flush_acks().await;
                }
            }

            let incoming = IncomingPacket {
                circuit: self.clone(),
                packet,
            };
            if self.inbox_tx.send(incoming).await.is_err() {
                break;
            }
        }
        debug!(address = %self.options.address, "receive loop ended");
    }

    /// ACK flush plus retransmission scan, every network tick
    async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = interval(self.settings.network_tick());
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            if self.state().await == CircuitState::Disconnected {
                break;
            }
            self.flush_acks().await;
            self.resend_unacked().await;
        }
    }

    /// Send any queued ACKs as a standalone PacketAck
    async fn flush_acks(&self) {
        let batch: Vec<u32> = {
            let mut pending = self.pending_acks.lock().await;
            std::mem::take(&mut *pending).into_iter().collect()
        };
        if batch.is_empty() {
            return;
        }
        let message = PacketAck {
            packets: batch.iter().map(|&id| AckBlock { id }).collect(),
        };
        if let Err(e) = self.send(&message).await {
            debug!(error = %e, "failed to flush ack batch");
        }
    }

    async fn resend_unacked(&self) {
        let now = Instant::now();
        let resend_timeout = self.settings.resend_timeout();
        let max_resends = self.settings.max_resend_count;

        let mut to_send: Vec<Vec<u8>> = Vec::new();
        {
            let mut unacked = self.unacked.lock().await;
            let mut exhausted: Vec<u32> = Vec::new();
            for (&sequence, packet) in unacked.iter_mut() {
                if now.duration_since(packet.sent_at) < resend_timeout {
                    continue;
                }
                if packet.resend_count >= max_resends {
                    exhausted.push(sequence);
                    continue;
                }
                serialization::mark_resent(&mut packet.data);
                packet.resend_count += 1;
                packet.sent_at = now;
                debug!(
                    sequence,
                    message = packet.message,
                    attempt = packet.resend_count,
                    "resending unacknowledged packet"
                );
                to_send.push(packet.data.clone());
            }
            for sequence in exhausted {
                if let Some(packet) = unacked.remove(&sequence) {
                    warn!(
                        sequence,
                        message = packet.message,
                        "dropping packet after {} resends",
                        max_resends
                    );
                    // dropping `packet.notify` fails any tracked waiter
                }
            }
        }

        for data in to_send {
            if let Ok(mut stats) = self.stats.lock() {
                stats.resent_packets += 1;
            }
            if self.transmit(&data).await.is_err() {
                break;
            }
        }
    }

    async fn ping_loop(self: Arc<Self>) {
        let mut ticker = interval(self.settings.ping_interval());
        loop {
            ticker.tick().await;
            match self.state().await {
                CircuitState::Disconnected => break,
                CircuitState::Connecting => continue,
                CircuitState::Connected => {}
            }

            let oldest_unacked = self
                .unacked
                .lock()
                .await
                .keys()
                .next()
                .copied()
                .unwrap_or(0);
            let ping_id = match self.ping.lock() {
                Ok(mut ping) => ping.begin_ping(),
                Err(poisoned) => poisoned.into_inner().begin_ping(),
            };
            if let Ok(mut stats) = self.stats.lock() {
                stats.sent_pings += 1;
            }

            let probe = StartPingCheck { ping_id, oldest_unacked };
            if self.send(&probe).await.is_err() {
                break;
            }
        }
    }

    async fn stats_loop(self: Arc<Self>) {
        let mut ticker = interval(self.settings.stats_interval());
        loop {
            ticker.tick().await;
            if self.state().await == CircuitState::Disconnected {
                break;
            }
            self.roll_stats();
        }
    }

    fn roll_stats(&self) {
        let window = self.settings.stats_window.max(2);
        let interval_ms = self.settings.stats_interval_ms.max(1);
        let Ok(mut stats) = self.stats.lock() else {
            return;
        };
        let recv_bytes = stats.recv_bytes;
        let sent_bytes = stats.sent_bytes;
        stats.incoming_history.push_back(recv_bytes);
        stats.outgoing_history.push_back(sent_bytes);
        while stats.incoming_history.len() > window {
            stats.incoming_history.pop_front();
        }
        while stats.outgoing_history.len() > window {
            stats.outgoing_history.pop_front();
        }
        stats.incoming_bps = windowed_rate(&stats.incoming_history, interval_ms);
        stats.outgoing_bps = windowed_rate(&stats.outgoing_history, interval_ms);
    }

    // --- Teardown ---

    /// Close the circuit, optionally telling the peer first. Idempotent.
    pub async fn disconnect(&self, send_close: bool) {
        {
            let mut state = self.state.write().await;
            if *state == CircuitState::Disconnected {
                return;
            }
            *state = CircuitState::Disconnected;
        }
        if send_close {
            if let Err(e) = self.send(&CloseCircuit).await {
                debug!(address = %self.options.address, error = %e, "CloseCircuit not sent");
            }
        }
        let _ = self.shutdown_tx.send(true);
        self.unacked.lock().await.clear();
        self.pending_acks.lock().await.clear();
        info!(address = %self.options.address, "circuit disconnected");
    }

    async fn mark_disconnected(&self) {
        {
            let mut state = self.state.write().await;
            if *state == CircuitState::Disconnected {
                return;
            }
            *state = CircuitState::Disconnected;
        }
        let _ = self.shutdown_tx.send(true);
    }

    // --- Accessors ---

    pub fn address(&self) -> SocketAddr {
        self.options.address
    }

    pub fn circuit_code(&self) -> u32 {
        self.options.circuit_code
    }

    pub fn agent_id(&self) -> Uuid {
        self.options.agent_id
    }

    pub fn session_id(&self) -> Uuid {
        self.options.session_id
    }

    pub async fn state(&self) -> CircuitState {
        *self.state.read().await
    }

    pub async fn unacked_count(&self) -> usize {
        self.unacked.lock().await.len()
    }

    pub fn is_disconnect_candidate(&self) -> bool {
        self.disconnect_candidate.load(Ordering::Relaxed)
    }

    pub fn set_disconnect_candidate(&self, candidate: bool) {
        self.disconnect_candidate.store(candidate, Ordering::Relaxed);
    }

    pub fn seed_capability(&self) -> Option<String> {
        self.seed_capability
            .lock()
            .ok()
            .and_then(|seed| seed.clone())
    }

    pub fn set_seed_capability(&self, seed: String) {
        if let Ok(mut slot) = self.seed_capability.lock() {
            *slot = Some(seed);
        }
    }

    pub fn stats(&self) -> CircuitStats {
        match self.stats.lock() {
            Ok(stats) => CircuitStats {
                sent_packets: stats.sent_packets,
                recv_packets: stats.recv_packets,
                sent_bytes: stats.sent_bytes,
                recv_bytes: stats.recv_bytes,
                resent_packets: stats.resent_packets,
                received_resends: stats.received_resends,
                sent_pings: stats.sent_pings,
                received_pongs: stats.received_pongs,
                incoming_bps: stats.incoming_bps,
                outgoing_bps: stats.outgoing_bps,
                last_lag: stats.last_lag,
            },
            Err(_) => CircuitStats::default(),
        }
    }
}

impl std::fmt::Debug for Circuit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Circuit")
            .field("address", &self.options.address)
            .field("circuit_code", &self.options.circuit_code)
            .finish_non_exhaustive()
    }
}

/// Average byte rate over a history of cumulative totals
fn windowed_rate(history: &VecDeque<u64>, interval_ms: u64) -> u64 {
    if history.len() < 2 {
        return 0;
    }
    let newest = history.back().copied().unwrap_or(0);
    let oldest = history.front().copied().unwrap_or(0);
    let span_ms = interval_ms * (history.len() as u64 - 1);
    (newest.saturating_sub(oldest)) * 1000 / span_ms
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_rejects_duplicates() {
        let mut archive = PacketArchive::new(10);
        assert!(archive.try_enqueue(5));
        assert!(!archive.try_enqueue(5));
        assert!(archive.try_enqueue(6));
    }

    #[test]
    fn archive_evicts_oldest_batch_when_full() {
        let mut archive = PacketArchive::new(8);
        for sequence in 0..9 {
            assert!(archive.try_enqueue(sequence));
        }
        // Crossing capacity dropped the four oldest entries
        assert_eq!(archive.len(), 9 - ARCHIVE_EVICT_BATCH);
        assert!(archive.try_enqueue(0));
        assert!(archive.try_enqueue(3));
        assert!(!archive.try_enqueue(8));
    }

    #[test]
    fn ping_tracker_matches_ids() {
        let mut tracker = PingTracker::new();
        let first = tracker.begin_ping();
        assert_eq!(first, 0);
        assert!(tracker.complete(99).is_none());
        assert!(tracker.complete(first).is_some());
        // A completed probe cannot be completed twice
        assert!(tracker.complete(first).is_none());
    }

    #[test]
    fn ping_ids_wrap() {
        let mut tracker = PingTracker::new();
        tracker.next_ping_id = u8::MAX;
        assert_eq!(tracker.begin_ping(), u8::MAX);
        assert_eq!(tracker.begin_ping(), 0);
    }

    #[test]
    fn windowed_rate_uses_span() {
        let history: VecDeque<u64> = vec![0, 500, 1000].into();
        assert_eq!(windowed_rate(&history, 1000), 500);
        let short: VecDeque<u64> = vec![100].into();
        assert_eq!(windowed_rate(&short, 1000), 0);
    }

    #[tokio::test]
    async fn sequence_numbers_wrap_to_one() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let (inbox_tx, _inbox_rx) = mpsc::channel(8);
        let circuit = Circuit::new(
            CircuitOptions {
                address: peer.local_addr().unwrap(),
                circuit_code: 1,
                agent_id: Uuid::new_v4(),
                session_id: Uuid::new_v4(),
            },
            Arc::new(NetworkSettings::default()),
            inbox_tx,
        )
        .await
        .unwrap();

        *circuit.sequence.lock().unwrap() = MAX_SEQUENCE;
        assert_eq!(circuit.next_sequence(), MAX_SEQUENCE);
        assert_eq!(circuit.next_sequence(), 1);
        assert_eq!(circuit.next_sequence(), 2);
    }
}
