//! Packet callback registration and lookup
//!
//! Callbacks are kept in ordered lists per message lookup key, plus a
//! wildcard list invoked for every packet. Registration hands back a
//! `CallbackId` token; unregistering a token that is no longer present
//! logs and succeeds.

use crate::networking::circuit::Circuit;
use crate::networking::messages::ReceivedPacket;
use crate::networking::NetworkResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

pub type CallbackId = u64;

#[async_trait]
pub trait PacketCallback: Send + Sync {
    async fn handle(&self, packet: &ReceivedPacket, circuit: &Arc<Circuit>) -> NetworkResult<()>;

    fn name(&self) -> &'static str {
        "packet-callback"
    }
}

/// Adapter turning an async closure into a [`PacketCallback`]
pub struct FnCallback<F> {
    name: &'static str,
    callback: F,
}

impl<F> FnCallback<F> {
    pub fn new(name: &'static str, callback: F) -> Self {
        Self { name, callback }
    }
}

#[async_trait]
impl<F, Fut> PacketCallback for FnCallback<F>
where
    F: Fn(ReceivedPacket, Arc<Circuit>) -> Fut + Send + Sync,
    Fut: Future<Output = NetworkResult<()>> + Send + 'static,
{
    async fn handle(&self, packet: &ReceivedPacket, circuit: &Arc<Circuit>) -> NetworkResult<()> {
        (self.callback)(packet.clone(), circuit.clone()).await
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

type CallbackList = Vec<(CallbackId, Arc<dyn PacketCallback>)>;

#[derive(Default)]
pub struct PacketEventRegistry {
    next_id: AtomicU64,
    typed: RwLock<HashMap<u32, CallbackList>>,
    wildcard: RwLock<CallbackList>,
}

impl PacketEventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for one message lookup key
    pub async fn register(&self, key: u32, callback: Arc<dyn PacketCallback>) -> CallbackId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.typed
            .write()
            .await
            .entry(key)
            .or_default()
            .push((id, callback));
        id
    }

    /// Register a callback invoked for every packet
    pub async fn register_wildcard(&self, callback: Arc<dyn PacketCallback>) -> CallbackId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.wildcard.write().await.push((id, callback));
        id
    }

    pub async fn unregister(&self, key: u32, id: CallbackId) {
        let mut typed = self.typed.write().await;
        let found = match typed.get_mut(&key) {
            Some(list) => {
                let before = list.len();
                list.retain(|(entry_id, _)| *entry_id != id);
                if list.is_empty() {
                    typed.remove(&key);
                    before > 0
                } else {
                    before != list.len()
                }
            }
            None => false,
        };
        if !found {
            warn!(key, id, "unregister for a callback that was not registered");
        }
    }

    pub async fn unregister_wildcard(&self, id: CallbackId) {
        let mut wildcard = self.wildcard.write().await;
        let before = wildcard.len();
        wildcard.retain(|(entry_id, _)| *entry_id != id);
        if wildcard.len() == before {
            warn!(id, "unregister for a wildcard callback that was not registered");
        }
    }

    /// Snapshot of the callbacks for a packet, typed first then wildcard,
    /// each group in registration order
    pub async fn callbacks_for(&self, key: u32) -> Vec<Arc<dyn PacketCallback>> {
        let mut callbacks: Vec<Arc<dyn PacketCallback>> = Vec::new();
        if let Some(list) = self.typed.read().await.get(&key) {
            callbacks.extend(list.iter().map(|(_, callback)| callback.clone()));
        }
        callbacks.extend(
            self.wildcard
                .read()
                .await
                .iter()
                .map(|(_, callback)| callback.clone()),
        );
        callbacks
    }

    pub async fn registered_count(&self, key: u32) -> usize {
        self.typed
            .read()
            .await
            .get(&key)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}
