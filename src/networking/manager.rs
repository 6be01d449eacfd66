//! Connection manager: circuits, the dispatch pump, and session lifecycle
//!
//! All circuits feed one bounded inbound queue. A single pump task drains
//! it, applies ACK bookkeeping and duplicate suppression, services the
//! transport control messages, and invokes registered callbacks either
//! inline or on spawned tasks depending on `sync_packet_callbacks`.

use crate::config::NetworkSettings;
use crate::networking::circuit::{Circuit, CircuitOptions, CircuitState, IncomingPacket};
use crate::networking::dispatch::PacketEventRegistry;
use crate::networking::messages::{
    CompletePingCheck, DisableSimulator, KickUser, LogoutReply, LogoutRequest, Message, PacketAck,
    ReceivedPacket, StartPingCheck,
};
use crate::networking::{ConnectOutcome, NetworkError, NetworkResult};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::time::{interval, timeout};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Identity handed out by the login server, required to open circuits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCredentials {
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub secure_session_id: Uuid,
    pub circuit_code: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientInitiated,
    ServerInitiated,
    NetworkTimeout,
    SimShutdown,
}

#[derive(Debug, Clone)]
pub enum NetworkEvent {
    LoggedIn { credentials: SessionCredentials },
    CircuitConnected { address: SocketAddr, outcome: ConnectOutcome },
    CircuitDisconnected { address: SocketAddr },
    CurrentCircuitChanged { previous: Option<SocketAddr>, current: SocketAddr },
    Disconnected { reason: DisconnectReason, message: String },
}

/// How long the pump blocks on the queue before re-checking the running flag
const PUMP_DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Clone)]
pub struct NetworkManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    settings: Arc<NetworkSettings>,
    credentials: RwLock<Option<SessionCredentials>>,
    circuits: RwLock<HashMap<SocketAddr, Arc<Circuit>>>,
    current: RwLock<Option<Arc<Circuit>>>,
    registry: PacketEventRegistry,
    inbox_tx: mpsc::Sender<IncomingPacket>,
    /// Parked here between sessions, taken by the pump while it runs
    inbox_rx: Mutex<Option<mpsc::Receiver<IncomingPacket>>>,
    connected: AtomicBool,
    pump_running: AtomicBool,
    event_tx: broadcast::Sender<NetworkEvent>,
}

impl NetworkManager {
    pub fn new(settings: Arc<NetworkSettings>) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::channel(settings.packet_inbox_size);
        let (event_tx, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(ManagerInner {
                settings,
                credentials: RwLock::new(None),
                circuits: RwLock::new(HashMap::new()),
                current: RwLock::new(None),
                registry: PacketEventRegistry::new(),
                inbox_tx,
                inbox_rx: Mutex::new(Some(inbox_rx)),
                connected: AtomicBool::new(false),
                pump_running: AtomicBool::new(false),
                event_tx,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetworkEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn registry(&self) -> &PacketEventRegistry {
        &self.inner.registry
    }

    pub fn settings(&self) -> &NetworkSettings {
        &self.inner.settings
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub async fn set_credentials(&self, credentials: SessionCredentials) {
        *self.inner.credentials.write().await = Some(credentials);
    }

    pub async fn credentials(&self) -> Option<SessionCredentials> {
        *self.inner.credentials.read().await
    }

    pub async fn current_circuit(&self) -> Option<Arc<Circuit>> {
        self.inner.current.read().await.clone()
    }

    pub async fn circuit(&self, address: SocketAddr) -> Option<Arc<Circuit>> {
        self.inner.circuits.read().await.get(&address).cloned()
    }

    pub async fn circuit_count(&self) -> usize {
        self.inner.circuits.read().await.len()
    }

    /// Open (or look up) a circuit to a simulator.
    ///
    /// Lazily starts the pump and the staleness scan, runs the
    /// UseCircuitCode handshake, and optionally promotes the circuit to
    /// current. A circuit whose handshake transport fails is removed again.
    pub async fn connect(
        &self,
        address: SocketAddr,
        set_current: bool,
        seed_capability: Option<String>,
    ) -> NetworkResult<Arc<Circuit>> {
        let credentials = self
            .credentials()
            .await
            .ok_or(NetworkError::MissingCredentials)?;

        if let Some(existing) = self.circuit(address).await {
            if existing.state().await != CircuitState::Disconnected {
                debug!(%address, "reusing existing circuit");
                if set_current {
                    self.inner.promote(existing.clone(), seed_capability).await;
                }
                return Ok(existing);
            }
        }

        self.inner.connected.store(true, Ordering::SeqCst);
        self.inner.start_pump_tasks();

        let options = CircuitOptions {
            address,
            circuit_code: credentials.circuit_code,
            agent_id: credentials.agent_id,
            session_id: credentials.session_id,
        };
        let circuit = Circuit::new(
            options,
            self.inner.settings.clone(),
            self.inner.inbox_tx.clone(),
        )
        .await?;
        self.inner
            .circuits
            .write()
            .await
            .insert(address, circuit.clone());

        match circuit.connect().await {
            Ok(outcome) => {
                info!(%address, ?outcome, "circuit connected");
                if set_current {
                    self.inner.promote(circuit.clone(), seed_capability).await;
                }
                self.inner
                    .emit(NetworkEvent::CircuitConnected { address, outcome });
                Ok(circuit)
            }
            Err(e) => {
                warn!(%address, error = %e, "circuit handshake failed");
                self.inner.circuits.write().await.remove(&address);
                circuit.disconnect(false).await;
                Err(e)
            }
        }
    }

    /// Tear down one circuit; clears current if it was the one removed
    pub async fn disconnect_circuit(&self, address: SocketAddr) -> NetworkResult<()> {
        if self.circuit(address).await.is_none() {
            return Err(NetworkError::CircuitNotFound { address });
        }
        self.inner.drop_circuit(address, true).await;
        Ok(())
    }

    /// Best-effort send on the current circuit; silently drops when there
    /// is none
    pub async fn send<M: Message>(&self, message: &M) -> NetworkResult<()> {
        match self.current_circuit().await {
            Some(circuit) => {
                circuit.send(message).await?;
                Ok(())
            }
            None => {
                debug!(message = M::name(), "no current circuit, dropping packet");
                Ok(())
            }
        }
    }

    pub async fn send_to<M: Message>(&self, address: SocketAddr, message: &M) -> NetworkResult<()> {
        let circuit = self
            .circuit(address)
            .await
            .ok_or(NetworkError::CircuitNotFound { address })?;
        circuit.send(message).await?;
        Ok(())
    }

    /// Orderly logout: request, wait bounded for the simulator's reply,
    /// force shutdown if it never comes
    pub async fn logout(&self) -> NetworkResult<()> {
        let credentials = self
            .credentials()
            .await
            .ok_or(NetworkError::MissingCredentials)?;
        let current = self
            .current_circuit()
            .await
            .ok_or(NetworkError::NotConnected)?;

        let mut events = self.subscribe();
        current
            .send(&LogoutRequest {
                agent_id: credentials.agent_id,
                session_id: credentials.session_id,
            })
            .await?;

        let confirmed = timeout(self.inner.settings.logout_timeout(), async {
            loop {
                match events.recv().await {
                    Ok(NetworkEvent::Disconnected { .. }) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        })
        .await;

        if confirmed.is_err() {
            warn!("no LogoutReply before the deadline, forcing shutdown");
            self.inner
                .shutdown(DisconnectReason::NetworkTimeout, "logout timed out")
                .await;
        }
        Ok(())
    }

    /// Tear down every circuit and end the session. Idempotent.
    pub async fn shutdown(&self, reason: DisconnectReason, message: &str) {
        self.inner.shutdown(reason, message).await;
    }

    pub(crate) fn emit(&self, event: NetworkEvent) {
        self.inner.emit(event);
    }
}

impl ManagerInner {
    fn emit(&self, event: NetworkEvent) {
        // nobody listening is fine
        let _ = self.event_tx.send(event);
    }

    fn start_pump_tasks(self: &Arc<Self>) {
        if self.pump_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let inner = self.clone();
        tokio::spawn(async move {
            let receiver = inner.inbox_rx.lock().await.take();
            match receiver {
                Some(rx) => inner.pump(rx).await,
                None => {
                    // unreachable unless a previous pump failed to park it
                    warn!("inbound queue receiver missing, pump not started");
                    inner.pump_running.store(false, Ordering::SeqCst);
                }
            }
        });

        let inner = self.clone();
        tokio::spawn(async move { inner.staleness_scan().await });
    }

    /// Drain the shared inbound queue until the session ends
    async fn pump(self: Arc<Self>, mut rx: mpsc::Receiver<IncomingPacket>) {
        debug!("packet pump started");
        while self.connected.load(Ordering::SeqCst) {
            match timeout(PUMP_DEQUEUE_TIMEOUT, rx.recv()).await {
                Ok(Some(incoming)) => self.process_incoming(incoming).await,
                Ok(None) => break,
                Err(_) => continue, // re-check the running flag
            }
        }
        while rx.try_recv().is_ok() {}
        *self.inbox_rx.lock().await = Some(rx);
        self.pump_running.store(false, Ordering::SeqCst);
        debug!("packet pump stopped");
    }

    async fn process_incoming(self: &Arc<Self>, incoming: IncomingPacket) {
        let IncomingPacket { circuit, packet } = incoming;

        // ACK bookkeeping first so resolved packets stop retransmitting
        for &sequence in &packet.acks {
            circuit.acknowledge(sequence).await;
        }
        if packet.is::<PacketAck>() {
            match packet.decode::<PacketAck>() {
                Ok(acks) => {
                    for block in acks.packets {
                        circuit.acknowledge(block.id).await;
                    }
                }
                Err(e) => warn!(error = %e, "malformed PacketAck"),
            }
        }

        if packet.reliable && !circuit.archive_sequence(packet.sequence) {
            if packet.resent {
                debug!(sequence = packet.sequence, "suppressing duplicate resend");
            } else {
                warn!(
                    sequence = packet.sequence,
                    "duplicate packet without resent flag"
                );
            }
            return;
        }

        self.handle_control(&circuit, &packet).await;

        let callbacks = self.registry.callbacks_for(packet.lookup_key()).await;
        if callbacks.is_empty() {
            trace!(
                message = packet.message_name(),
                sequence = packet.sequence,
                "no callbacks registered"
            );
            return;
        }

        if self.settings.sync_packet_callbacks {
            for callback in callbacks {
                if let Err(e) = callback.handle(&packet, &circuit).await {
                    warn!(callback = callback.name(), error = %e, "packet callback failed");
                }
            }
        } else {
            for callback in callbacks {
                let packet = packet.clone();
                let circuit = circuit.clone();
                tokio::spawn(async move {
                    if let Err(e) = callback.handle(&packet, &circuit).await {
                        warn!(callback = callback.name(), error = %e, "packet callback failed");
                    }
                });
            }
        }
    }

    /// Transport control messages serviced ahead of user callbacks
    async fn handle_control(self: &Arc<Self>, circuit: &Arc<Circuit>, packet: &ReceivedPacket) {
        if packet.is::<StartPingCheck>() {
            match packet.decode::<StartPingCheck>() {
                Ok(probe) => {
                    let reply = CompletePingCheck { ping_id: probe.ping_id };
                    if let Err(e) = circuit.send(&reply).await {
                        debug!(error = %e, "ping reply not sent");
                    }
                }
                Err(e) => warn!(error = %e, "malformed StartPingCheck"),
            }
        } else if packet.is::<CompletePingCheck>() {
            match packet.decode::<CompletePingCheck>() {
                Ok(pong) => circuit.complete_ping(pong.ping_id),
                Err(e) => warn!(error = %e, "malformed CompletePingCheck"),
            }
        } else if packet.is::<LogoutReply>() {
            match packet.decode::<LogoutReply>() {
                Ok(reply) => {
                    let credentials = *self.credentials.read().await;
                    let valid = credentials
                        .map(|c| c.agent_id == reply.agent_id && c.session_id == reply.session_id)
                        .unwrap_or(false);
                    if valid {
                        info!("logout confirmed by simulator");
                        self.shutdown(DisconnectReason::ClientInitiated, "logout confirmed")
                            .await;
                    } else {
                        warn!("LogoutReply with mismatched session, ignoring");
                    }
                }
                Err(e) => warn!(error = %e, "malformed LogoutReply"),
            }
        } else if packet.is::<KickUser>() {
            let message = packet
                .decode::<KickUser>()
                .map(|kick| kick.reason)
                .unwrap_or_default();
            warn!(message, "kicked from the grid");
            self.shutdown(DisconnectReason::ServerInitiated, &message)
                .await;
        } else if packet.is::<DisableSimulator>() {
            let is_current = self
                .current
                .read()
                .await
                .as_ref()
                .map(|c| c.address() == circuit.address())
                .unwrap_or(false);
            if is_current {
                self.shutdown(DisconnectReason::SimShutdown, "current simulator shut down")
                    .await;
            } else {
                info!(address = %circuit.address(), "simulator disabled its circuit");
                self.drop_circuit(circuit.address(), false).await;
            }
        }
    }

    /// Tear down circuits that stayed silent for two full scan intervals
    async fn staleness_scan(self: Arc<Self>) {
        let mut ticker = interval(self.settings.simulator_timeout());
        ticker.tick().await; // the first tick fires immediately
        loop {
            ticker.tick().await;
            if !self.connected.load(Ordering::SeqCst) {
                break;
            }

            let circuits: Vec<Arc<Circuit>> =
                self.circuits.read().await.values().cloned().collect();
            let current = self.current.read().await.clone();
            for circuit in circuits {
                if circuit.state().await == CircuitState::Disconnected {
                    continue;
                }
                if !circuit.is_disconnect_candidate() {
                    circuit.set_disconnect_candidate(true);
                    continue;
                }
                let is_current = current
                    .as_ref()
                    .map(|c| c.address() == circuit.address())
                    .unwrap_or(false);
                if is_current {
                    warn!(address = %circuit.address(), "current circuit unresponsive");
                    self.shutdown(
                        DisconnectReason::NetworkTimeout,
                        "simulator stopped responding",
                    )
                    .await;
                    return;
                }
                warn!(address = %circuit.address(), "dropping unresponsive circuit");
                self.drop_circuit(circuit.address(), true).await;
            }
        }
        debug!("staleness scan stopped");
    }

    async fn promote(&self, circuit: Arc<Circuit>, seed_capability: Option<String>) {
        if let Some(seed) = seed_capability {
            circuit.set_seed_capability(seed);
        }
        let previous = {
            let mut current = self.current.write().await;
            let previous = current.as_ref().map(|c| c.address());
            if previous == Some(circuit.address()) {
                return;
            }
            *current = Some(circuit.clone());
            previous
        };
        info!(current = %circuit.address(), ?previous, "current circuit changed");
        self.emit(NetworkEvent::CurrentCircuitChanged {
            previous,
            current: circuit.address(),
        });
    }

    async fn drop_circuit(&self, address: SocketAddr, send_close: bool) {
        let removed = self.circuits.write().await.remove(&address);
        if let Some(circuit) = removed {
            circuit.disconnect(send_close).await;
            let mut current = self.current.write().await;
            if current.as_ref().map(|c| c.address()) == Some(address) {
                *current = None;
            }
            drop(current);
            self.emit(NetworkEvent::CircuitDisconnected { address });
        }
    }

    async fn shutdown(&self, reason: DisconnectReason, message: &str) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        info!(?reason, message, "shutting down network session");

        let send_close = reason == DisconnectReason::ClientInitiated;
        let current_address = self.current.read().await.as_ref().map(|c| c.address());
        let mut circuits: Vec<Arc<Circuit>> = self
            .circuits
            .write()
            .await
            .drain()
            .map(|(_, circuit)| circuit)
            .collect();
        // non-current circuits go first, the current one last
        circuits.sort_by_key(|circuit| Some(circuit.address()) == current_address);
        for circuit in circuits {
            circuit.disconnect(send_close).await;
            self.emit(NetworkEvent::CircuitDisconnected {
                address: circuit.address(),
            });
        }
        *self.current.write().await = None;

        self.emit(NetworkEvent::Disconnected {
            reason,
            message: message.to_string(),
        });
    }
}
