use std::env;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_M_BITS: u32 = 10;

// Stabilize and fix-fingers share one background tick
pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(2);

// Outbound RPC timeouts by context. Stabilize probes fail fast and retry on
// the next tick; join-time routing tolerates cold starts.
pub const STABILIZE_TIMEOUT: Duration = Duration::from_secs(5);
pub const ROUTING_TIMEOUT: Duration = Duration::from_secs(30);
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(300);
pub const DIAGNOSTIC_TIMEOUT: Duration = Duration::from_secs(2);

// Termination backstop for the iterative predecessor walk
pub const MAX_WALK_HOPS: u32 = 64;

// Cap on the network_state ring walk
pub const NETWORK_STATE_LIMIT: usize = 100;

// Node identity and ring parameters, read from the environment once at
// startup. NODE_IP is the advertised hostname: it is hashed into the node id
// and used in peer URLs, while the listener always binds 0.0.0.0.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub ip: String,
    pub port: u16,
    pub m: u32,
    pub debug: bool,
}

impl NodeConfig {
    pub fn from_env() -> Self {
        let ip = env::var("NODE_IP").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("NODE_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let m = env::var("M_BITS")
            .ok()
            .and_then(|m| m.parse().ok())
            .map(clamp_m_bits)
            .unwrap_or(DEFAULT_M_BITS);
        let debug = env::var("DEBUG_MODE")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(false);

        NodeConfig { ip, port, m, debug }
    }
}

// Identifiers are u64, so the ring width is capped at 64 bits
fn clamp_m_bits(raw: u32) -> u32 {
    if raw == 0 {
        log::warn!("M_BITS must be at least 1, using 1");
        1
    } else if raw > 64 {
        log::warn!("M_BITS {} exceeds the 64-bit identifier space, using 64", raw);
        64
    } else {
        raw
    }
}
