use crate::networking::{NetworkError, NetworkResult};
use crate::utils::math::Vector3;
use std::net::SocketAddr;
use uuid::Uuid;

/// Progress of a login attempt, published on a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStatus {
    Idle,
    ConnectingToLogin,
    ReadingResponse,
    Redirecting,
    ConnectingToSim,
    Success,
    Failed,
}

/// Everything the client sends to the login endpoint
#[derive(Debug, Clone)]
pub struct LoginParams {
    pub first_name: String,
    pub last_name: String,
    /// Raw password, hashed at request-build time
    pub password: String,
    pub start_location: String,
    pub channel: String,
    pub version: String,
    pub platform: String,
    pub mac_address: String,
    pub machine_id: String,
    pub agree_to_tos: bool,
    pub read_critical: bool,
    pub options: Vec<String>,
}

impl LoginParams {
    pub fn new(first: &str, last: &str, password: &str) -> Self {
        Self {
            first_name: first.to_string(),
            last_name: last.to_string(),
            password: password.to_string(),
            start_location: "last".to_string(),
            channel: "gridlink".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: Self::platform(),
            mac_address: Self::generate_hardware_id(b"gridlink-mac"),
            machine_id: Self::generate_hardware_id(b"gridlink-id0"),
            agree_to_tos: true,
            read_critical: false,
            options: vec![
                "inventory-root".to_string(),
                "inventory-skeleton".to_string(),
                "buddy-list".to_string(),
                "login-flags".to_string(),
                "max-agent-groups".to_string(),
                "map-server-url".to_string(),
            ],
        }
    }

    /// Grid password hashing: `$1$` + md5 of the first 16 characters.
    /// Input already carrying the `$1$` prefix passes through unchanged.
    pub fn hash_password(password: &str) -> String {
        if password.starts_with("$1$") {
            return password.to_string();
        }
        let truncated = password.chars().take(16).collect::<String>();
        let digest = md5::compute(truncated.as_bytes());
        format!("$1${:x}", digest)
    }

    fn platform() -> String {
        #[cfg(target_os = "windows")]
        return "win".to_string();
        #[cfg(target_os = "macos")]
        return "mac".to_string();
        #[cfg(target_os = "linux")]
        return "lnx".to_string();
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        return "unk".to_string();
    }

    /// Plain-hex identifier in the shape the login server expects, salted
    /// per process so parallel test runs do not collide
    fn generate_hardware_id(label: &[u8]) -> String {
        let salt: u64 = rand::random();
        let mut seed = label.to_vec();
        seed.extend_from_slice(&salt.to_le_bytes());
        format!("{:x}", md5::compute(&seed))
    }
}

/// Parsed fields of a login_to_simulator response
#[derive(Debug, Clone, Default)]
pub struct LoginResponse {
    pub success: bool,
    /// The server wants the client to retry against `next_url`
    pub indeterminate: bool,
    pub agent_id: Uuid,
    pub session_id: Uuid,
    pub secure_session_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub circuit_code: u32,
    pub sim_ip: String,
    pub sim_port: u16,
    pub look_at: Vector3,
    pub seed_capability: Option<String>,
    pub message: Option<String>,
    pub reason: Option<String>,
    pub next_url: Option<String>,
    pub next_method: Option<String>,
    pub udp_blacklist: Option<Vec<String>>,
    pub home: Option<String>,
    pub inventory_root: Option<String>,
    pub map_server_url: Option<String>,
    pub seconds_since_epoch: Option<u64>,
}

impl LoginResponse {
    pub fn simulator_address(&self) -> NetworkResult<SocketAddr> {
        format!("{}:{}", self.sim_ip, self.sim_port)
            .parse()
            .map_err(|_| NetworkError::AuthenticationFailed {
                reason: format!(
                    "login response carries an invalid simulator address {}:{}",
                    self.sim_ip, self.sim_port
                ),
            })
    }
}
