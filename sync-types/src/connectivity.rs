//! Connectivity state shared between the monitor and its consumers.

use serde::{Deserialize, Serialize};

/// Connection quality classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// No reachability.
    Offline,
    /// Reachable but slow, or the probe failed.
    Poor,
    /// Usable.
    Fair,
    /// Good.
    Good,
    /// Low latency.
    Excellent,
}

/// Kind of network reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    /// No network interface up.
    #[default]
    None,
    /// Wi-Fi.
    Wifi,
    /// Mobile data.
    Cellular,
    /// Wired.
    Ethernet,
    /// Anything else (VPN, bluetooth, unknown).
    Other,
}

/// A raw reachability event from the platform connectivity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkEvent {
    /// Whether the platform considers the network reachable.
    pub reachable: bool,
    /// Active network type.
    pub network: NetworkType,
}

/// Snapshot of the device's connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectivityState {
    /// Whether the remote store is believed reachable.
    pub reachable: bool,
    /// Latest quality classification.
    pub quality: QualityTier,
    /// Active network type.
    #[serde(default)]
    pub network: NetworkType,
    /// Milliseconds since the Unix epoch of the last change.
    pub last_transition_at: u64,
}

impl ConnectivityState {
    /// Offline state stamped at `now`.
    pub fn offline(now: u64) -> Self {
        Self {
            reachable: false,
            quality: QualityTier::Offline,
            network: NetworkType::None,
            last_transition_at: now,
        }
    }

    /// Milliseconds since the last transition.
    ///
    /// While offline this is the time since the device was last online.
    pub fn time_since_transition(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_transition_at)
    }
}
