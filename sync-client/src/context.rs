//! Collaborators shared by every per-actor component.

use crate::clock::Clock;
use crate::connectivity::ConnectivityMonitor;
use crate::remote::RemoteStore;
use crate::storage::KeyValueStore;
use std::sync::Arc;

/// Handles to the injected services a session runs against.
#[derive(Clone)]
pub struct SyncContext {
    /// Durable local key-value store.
    pub store: Arc<dyn KeyValueStore>,
    /// Remote document store.
    pub remote: Arc<dyn RemoteStore>,
    /// Connectivity monitor.
    pub connectivity: ConnectivityMonitor,
    /// Wall clock.
    pub clock: Arc<dyn Clock>,
}

impl SyncContext {
    /// Current time in milliseconds since the Unix epoch.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("connectivity", &self.connectivity)
            .finish_non_exhaustive()
    }
}
