//! Network tuning knobs with grid-protocol defaults.
//!
//! Values load from an optional `gridlink.toml` next to the binary and can be
//! overridden with `GRIDLINK_`-prefixed environment variables
//! (e.g. `GRIDLINK_RESEND_TIMEOUT_MS=2000`).

use anyhow::Context;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    /// XML-RPC login endpoint
    pub login_uri: String,
    /// Upper bound on the whole login flow, including the first circuit
    pub login_timeout_ms: u64,
    /// How long to wait for a LogoutReply before forcing shutdown
    pub logout_timeout_ms: u64,
    /// Age at which an unacknowledged reliable packet is retransmitted
    pub resend_timeout_ms: u64,
    /// A circuit silent for two of these intervals is torn down
    pub simulator_timeout_ms: u64,
    /// Period of the ACK-flush/resend maintenance tick
    pub network_tick_ms: u64,
    /// Period between StartPingCheck probes
    pub ping_interval_ms: u64,
    /// Period of the throughput stats rollup
    pub stats_interval_ms: u64,
    /// Samples kept in the throughput averaging window
    pub stats_window: usize,
    /// Capacity of the shared inbound packet queue
    pub packet_inbox_size: usize,
    /// Capacity of the per-circuit duplicate-detection archive
    pub packet_archive_size: usize,
    /// Queued outbound ACKs that force an immediate PacketAck flush
    pub max_pending_acks: usize,
    /// Most ACKs ever piggybacked onto one outgoing packet
    pub max_appended_acks: usize,
    /// Retransmissions before a reliable packet is dropped
    pub max_resend_count: u32,
    /// Login redirects followed before giving up
    pub max_redirects: u32,
    /// Largest datagram we will assemble, including appended ACKs
    pub max_packet_size: usize,
    /// Run packet callbacks inline on the pump instead of spawning tasks
    pub sync_packet_callbacks: bool,
    /// Send periodic StartPingCheck probes on connected circuits
    pub send_pings: bool,
    /// Outgoing byte-rate cap per circuit, 0 disables throttling
    pub outgoing_bytes_per_second: u64,
    /// Skip TLS certificate verification on the login endpoint
    pub insecure_tls: bool,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            login_uri: "https://login.agni.lindenlab.com/cgi-bin/login.cgi".to_string(),
            login_timeout_ms: 60_000,
            logout_timeout_ms: 5_000,
            resend_timeout_ms: 4_000,
            simulator_timeout_ms: 30_000,
            network_tick_ms: 500,
            ping_interval_ms: 2_200,
            stats_interval_ms: 1_000,
            stats_window: 5,
            packet_inbox_size: 100,
            packet_archive_size: 200,
            max_pending_acks: 10,
            max_appended_acks: 250,
            max_resend_count: 3,
            max_redirects: 5,
            max_packet_size: 1_200,
            sync_packet_callbacks: false,
            send_pings: true,
            outgoing_bytes_per_second: 0,
            insecure_tls: false,
        }
    }
}

impl NetworkSettings {
    /// Load settings from `gridlink.toml` and the environment
    pub fn load() -> anyhow::Result<Self> {
        let cfg = Config::builder()
            .add_source(File::with_name("gridlink").required(false))
            .add_source(Environment::with_prefix("GRIDLINK"))
            .build()
            .context("Failed to build settings sources")?;

        cfg.try_deserialize()
            .context("Failed to deserialize network settings")
    }

    /// Write the current settings out as TOML
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let rendered = toml::to_string_pretty(self)
            .context("Failed to serialize network settings")?;
        std::fs::write(path, rendered)
            .with_context(|| format!("Failed to write settings to {}", path.display()))?;
        Ok(())
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_millis(self.login_timeout_ms)
    }

    pub fn logout_timeout(&self) -> Duration {
        Duration::from_millis(self.logout_timeout_ms)
    }

    pub fn resend_timeout(&self) -> Duration {
        Duration::from_millis(self.resend_timeout_ms)
    }

    pub fn simulator_timeout(&self) -> Duration {
        Duration::from_millis(self.simulator_timeout_ms)
    }

    pub fn network_tick(&self) -> Duration {
        Duration::from_millis(self.network_tick_ms)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms)
    }

    pub fn stats_interval(&self) -> Duration {
        Duration::from_millis(self.stats_interval_ms)
    }
}
