//! Connectivity tracking and quality classification.
//!
//! [`ConnectivityTracker`] is the pure half of the connectivity monitor: it
//! folds raw reachability events and probe results into a
//! [`ConnectivityState`] and decides when a probe is due. The client runs
//! the probes and the timers.

use std::time::Duration;
use sync_types::{ConnectivityState, NetworkEvent, NetworkType, QualityTier};

/// Latency boundaries between quality tiers (exclusive upper bounds).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityThresholds {
    /// Below this: excellent.
    pub excellent: Duration,
    /// Below this: good.
    pub good: Duration,
    /// Below this: fair. Anything slower is poor.
    pub fair: Duration,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            excellent: Duration::from_millis(150),
            good: Duration::from_millis(300),
            fair: Duration::from_millis(600),
        }
    }
}

impl QualityThresholds {
    /// Map a probe outcome to a tier.
    ///
    /// `latency == None` means the probe failed or timed out, which is
    /// classified as poor rather than offline.
    pub fn classify(&self, reachable: bool, latency: Option<Duration>) -> QualityTier {
        if !reachable {
            return QualityTier::Offline;
        }
        match latency {
            Some(l) if l < self.excellent => QualityTier::Excellent,
            Some(l) if l < self.good => QualityTier::Good,
            Some(l) if l < self.fair => QualityTier::Fair,
            _ => QualityTier::Poor,
        }
    }
}

/// Result of feeding a reachability event to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReachabilityUpdate {
    /// The published state changed.
    pub changed: bool,
    /// Reachability flipped false → true; a probe should run now.
    pub probe_now: bool,
    /// Reachability flipped true → false.
    pub went_offline: bool,
}

/// Pure connectivity state holder.
#[derive(Debug, Clone)]
pub struct ConnectivityTracker {
    state: ConnectivityState,
    thresholds: QualityThresholds,
    probe_interval_ms: u64,
    last_probe_at: Option<u64>,
}

impl ConnectivityTracker {
    /// Tracker starting from a known state (e.g. the last persisted one).
    pub fn new(
        initial: ConnectivityState,
        thresholds: QualityThresholds,
        probe_interval: Duration,
    ) -> Self {
        Self {
            state: initial,
            thresholds,
            probe_interval_ms: u64::try_from(probe_interval.as_millis()).unwrap_or(u64::MAX),
            last_probe_at: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectivityState {
        self.state
    }

    /// Apply a raw reachability event.
    ///
    /// Reachability is updated immediately. Coming online sets a
    /// provisional `Good` tier until the probe reports.
    pub fn on_network_event(&mut self, event: NetworkEvent, now: u64) -> ReachabilityUpdate {
        let was_reachable = self.state.reachable;
        let network = if event.reachable {
            event.network
        } else {
            NetworkType::None
        };

        match (was_reachable, event.reachable) {
            (false, true) => {
                self.state = ConnectivityState {
                    reachable: true,
                    quality: QualityTier::Good,
                    network,
                    last_transition_at: now,
                };
                ReachabilityUpdate {
                    changed: true,
                    probe_now: true,
                    went_offline: false,
                }
            }
            (true, false) => {
                self.state = ConnectivityState::offline(now);
                ReachabilityUpdate {
                    changed: true,
                    probe_now: false,
                    went_offline: true,
                }
            }
            _ => {
                let changed = self.state.network != network;
                self.state.network = network;
                ReachabilityUpdate {
                    changed,
                    probe_now: false,
                    went_offline: false,
                }
            }
        }
    }

    /// Whether the periodic probe should run at `now`.
    pub fn probe_due(&self, now: u64) -> bool {
        if !self.state.reachable {
            return false;
        }
        match self.last_probe_at {
            None => true,
            Some(last) => now.saturating_sub(last) >= self.probe_interval_ms,
        }
    }

    /// Record a probe outcome. Returns true if the tier changed.
    ///
    /// A probe that completes after the device went offline is ignored.
    pub fn on_probe_result(&mut self, latency: Option<Duration>, now: u64) -> bool {
        self.last_probe_at = Some(now);
        if !self.state.reachable {
            return false;
        }
        let tier = self.thresholds.classify(true, latency);
        if tier == self.state.quality {
            return false;
        }
        self.state.quality = tier;
        self.state.last_transition_at = now;
        true
    }
}
