//! Connectivity monitor.
//!
//! Folds platform reachability events and latency probes into a published
//! [`ConnectivityState`]. Consumers read it with [`ConnectivityMonitor::current`],
//! register synchronous listeners with [`ConnectivityMonitor::subscribe`], or
//! await changes on [`ConnectivityMonitor::watch`].
//!
//! ```text
//! NetworkEvent stream ──► attach() ──► ConnectivityTracker ──► watch / listeners
//!                                          ▲
//! interval ──► spawn_probe_loop() ── LatencyProbe (bounded by timeout)
//! ```

use crate::clock::Clock;
use crate::config::ConnectivityConfig;
use crate::observe::{lock, Listeners, Subscription};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use sync_core::{ConnectivityTracker, QualityThresholds};
use sync_types::{ConnectivityState, NetworkEvent, SyncError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};

/// Measures one round trip to the remote store.
#[async_trait]
pub trait LatencyProbe: Send + Sync {
    /// Run one probe and return the measured latency.
    async fn probe(&self) -> Result<Duration, SyncError>;
}

/// One scripted probe outcome.
#[derive(Debug, Clone)]
pub enum ProbeStep {
    /// Report this latency.
    Latency(Duration),
    /// Fail with an error.
    Fail,
    /// Never complete (exercises the probe timeout).
    Hang,
}

/// Probe that replays scripted outcomes, for tests and demos.
///
/// Once the script is exhausted every probe reports the default latency.
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    inner: Arc<Mutex<ScriptedInner>>,
    calls: Arc<AtomicUsize>,
}

#[derive(Debug)]
struct ScriptedInner {
    steps: VecDeque<ProbeStep>,
    default: Duration,
}

impl ScriptedProbe {
    /// Probe that always reports `default`.
    pub fn new(default: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ScriptedInner {
                steps: VecDeque::new(),
                default,
            })),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queue the next outcome.
    pub fn push(&self, step: ProbeStep) {
        lock(&self.inner).steps.push_back(step);
    }

    /// Change the latency reported once the script is exhausted.
    pub fn set_default(&self, latency: Duration) {
        lock(&self.inner).default = latency;
    }

    /// Number of probes run so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LatencyProbe for ScriptedProbe {
    async fn probe(&self) -> Result<Duration, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut inner = lock(&self.inner);
            let default = inner.default;
            inner.steps.pop_front().unwrap_or(ProbeStep::Latency(default))
        };
        match step {
            ProbeStep::Latency(latency) => Ok(latency),
            ProbeStep::Fail => Err(SyncError::NetworkUnavailable("probe failed".into())),
            ProbeStep::Hang => {
                std::future::pending::<()>().await;
                Err(SyncError::NetworkUnavailable("probe hung".into()))
            }
        }
    }
}

/// Observes reachability and connection quality.
///
/// Clones share the same state.
#[derive(Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    tracker: Mutex<ConnectivityTracker>,
    state_tx: watch::Sender<ConnectivityState>,
    listeners: Listeners<ConnectivityState>,
    probe: Arc<dyn LatencyProbe>,
    clock: Arc<dyn Clock>,
    thresholds: QualityThresholds,
    probe_interval: Duration,
    probe_timeout: Duration,
    gate: Mutex<ProbeGate>,
    observed: AtomicBool,
}

/// One probe runs at a time; a request made meanwhile runs right after it.
#[derive(Debug, Default)]
struct ProbeGate {
    running: bool,
    again: bool,
}

impl std::fmt::Debug for ConnectivityMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityMonitor")
            .field("state", &self.current())
            .finish_non_exhaustive()
    }
}

impl ConnectivityMonitor {
    /// Create a monitor that starts offline.
    pub fn new(
        config: &ConnectivityConfig,
        probe: Arc<dyn LatencyProbe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let initial = ConnectivityState::offline(clock.now_ms());
        let thresholds = config.thresholds();
        let probe_interval = config.probe_interval();
        let (state_tx, _) = watch::channel(initial);

        Self {
            inner: Arc::new(MonitorInner {
                tracker: Mutex::new(ConnectivityTracker::new(initial, thresholds, probe_interval)),
                state_tx,
                listeners: Listeners::new(),
                probe,
                clock,
                thresholds,
                probe_interval,
                probe_timeout: config.probe_timeout(),
                gate: Mutex::new(ProbeGate::default()),
                observed: AtomicBool::new(false),
            }),
        }
    }

    /// Adopt the last-known state persisted by a previous run.
    ///
    /// Ignored once a live network event has been observed.
    pub fn seed(&self, last_known: ConnectivityState) {
        if self.inner.observed.load(Ordering::SeqCst) {
            return;
        }
        *lock(&self.inner.tracker) =
            ConnectivityTracker::new(last_known, self.inner.thresholds, self.inner.probe_interval);
        tracing::debug!("Connectivity seeded from last known state: {:?}", last_known.quality);
        self.inner.publish(last_known);
    }

    /// Current state.
    pub fn current(&self) -> ConnectivityState {
        lock(&self.inner.tracker).state()
    }

    /// Check whether the remote store is believed reachable.
    pub fn is_reachable(&self) -> bool {
        self.current().reachable
    }

    /// Register a listener for every state change.
    pub fn subscribe(
        &self,
        listener: impl Fn(&ConnectivityState) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.listeners.subscribe(listener)
    }

    /// Receiver that observes every state change.
    pub fn watch(&self) -> watch::Receiver<ConnectivityState> {
        self.inner.state_tx.subscribe()
    }

    /// Apply a raw reachability event.
    ///
    /// Reachability is published immediately; a false → true flip also
    /// starts a quality probe in the background.
    pub fn handle_event(&self, event: NetworkEvent) {
        self.inner.observed.store(true, Ordering::SeqCst);
        let now = self.inner.clock.now_ms();
        let (update, state) = {
            let mut tracker = lock(&self.inner.tracker);
            let update = tracker.on_network_event(event, now);
            (update, tracker.state())
        };

        if update.changed {
            if update.went_offline {
                tracing::info!("Connectivity lost");
            } else if update.probe_now {
                tracing::info!("Connectivity restored ({:?})", state.network);
            }
            self.inner.publish(state);
        }

        if update.probe_now {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.run_probe().await;
            });
        }
    }

    /// Run one quality probe now and return the resulting state.
    ///
    /// If a probe is already in flight this returns the current state and
    /// the running probe is repeated once it completes.
    pub async fn probe_now(&self) -> ConnectivityState {
        self.inner.run_probe().await
    }

    /// Consume a stream of platform reachability events.
    ///
    /// The task ends when the sender side closes.
    pub fn attach(&self, mut events: mpsc::Receiver<NetworkEvent>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                monitor.handle_event(event);
            }
            tracing::debug!("Network event stream closed");
        })
    }

    /// Spawn the periodic quality probe.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn spawn_probe_loop(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tracing::info!(
                "Probe loop started (interval: {}s)",
                inner.probe_interval.as_secs()
            );

            let mut timer = interval(inner.probe_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                timer.tick().await;
                let due = lock(&inner.tracker).probe_due(inner.clock.now_ms());
                if due {
                    inner.run_probe().await;
                }
            }
        })
    }
}

impl MonitorInner {
    fn publish(&self, state: ConnectivityState) {
        self.state_tx.send_replace(state);
        self.listeners.emit(&state);
    }

    async fn run_probe(&self) -> ConnectivityState {
        {
            let mut gate = lock(&self.gate);
            if gate.running {
                gate.again = true;
                drop(gate);
                return lock(&self.tracker).state();
            }
            gate.running = true;
        }

        loop {
            let state = self.measure().await;
            let mut gate = lock(&self.gate);
            if !std::mem::take(&mut gate.again) {
                gate.running = false;
                return state;
            }
            tracing::debug!("Repeating probe requested while one was in flight");
        }
    }

    async fn measure(&self) -> ConnectivityState {
        let latency = match timeout(self.probe_timeout, self.probe.probe()).await {
            Ok(Ok(latency)) => Some(latency),
            Ok(Err(e)) => {
                tracing::debug!("Probe failed: {}", e);
                None
            }
            Err(_) => {
                tracing::debug!("Probe timed out after {}ms", self.probe_timeout.as_millis());
                None
            }
        };

        let now = self.clock.now_ms();
        let (changed, state) = {
            let mut tracker = lock(&self.tracker);
            let changed = tracker.on_probe_result(latency, now);
            (changed, tracker.state())
        };
        if changed {
            tracing::info!("Connection quality: {:?}", state.quality);
            self.publish(state);
        }
        state
    }
}
