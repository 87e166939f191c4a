use std::sync::Arc;

use quickshare_peer::{IceConfig, ReconnectPolicy};
use quickshare_transfer::{NoopWakeLock, StoragePolicy, TransferTuning, WakeLock};

/// Signaling server used when none is configured.
pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:3001";

/// Fresh room codes a sender tries before giving up on collisions.
pub const ROOM_CODE_ATTEMPTS: u32 = 5;

/// Everything a sender or receiver session needs to run.
#[derive(Clone)]
pub struct SessionConfig {
    pub server_url: String,
    pub ice: IceConfig,
    pub reconnect: ReconnectPolicy,
    pub tuning: TransferTuning,
    /// Receiver only.
    pub storage: StoragePolicy,
    pub room_code_attempts: u32,
    pub wake_lock: Arc<dyn WakeLock>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SIGNALING_URL.to_string(),
            ice: IceConfig::default(),
            reconnect: ReconnectPolicy::default(),
            tuning: TransferTuning::default(),
            storage: StoragePolicy::default(),
            room_code_attempts: ROOM_CODE_ATTEMPTS,
            wake_lock: Arc::new(NoopWakeLock),
        }
    }
}

impl SessionConfig {
    pub fn with_server(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Default::default()
        }
    }
}
