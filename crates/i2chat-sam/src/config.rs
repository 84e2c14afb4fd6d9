//! SAM client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::commands::{SignatureType, VersionRange};

/// Default SAM bridge address of a local i2pd or Java I2P router
pub const DEFAULT_BRIDGE_ADDR: &str = "127.0.0.1:7656";

/// Settings shared by every control connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamConfig {
    /// SAM bridge address (default: 127.0.0.1:7656)
    pub bridge_addr: String,

    /// Dial timeout in seconds
    pub dial_timeout_secs: u64,

    /// Version range offered in HELLO
    pub versions: VersionRange,

    /// Signature algorithm for DEST GENERATE and SESSION CREATE
    pub signature_type: SignatureType,
}

impl Default for SamConfig {
    fn default() -> Self {
        SamConfig {
            bridge_addr: DEFAULT_BRIDGE_ADDR.to_string(),
            dial_timeout_secs: 3,
            versions: VersionRange::default(),
            signature_type: SignatureType::default(),
        }
    }
}

impl SamConfig {
    /// Default settings pointed at another bridge
    pub fn with_bridge(bridge_addr: impl Into<String>) -> Self {
        SamConfig {
            bridge_addr: bridge_addr.into(),
            ..Default::default()
        }
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }
}
