//! # sync-core
//!
//! Pure logic for social-sync (no I/O, instant tests).
//!
//! This crate implements the state machines and algorithms of the sync
//! layer without any network or disk I/O, enabling fast unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. This enables:
//! - Instant unit tests (no mocks, no async)
//! - Deterministic behavior (same input → same output, jitter aside)
//! - Easy reasoning about state transitions
//!
//! The actual I/O (remote store, persistence, timers) is performed by
//! `sync-client`, which interprets the actions produced here.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backoff;
pub mod chain;
pub mod quality;
pub mod queue;
pub mod relations;
pub mod state;

pub use backoff::RetryPolicy;
pub use chain::{CachedPage, ChainError, LiveOutcome, PageChain};
pub use quality::{ConnectivityTracker, QualityThresholds, ReachabilityUpdate};
pub use queue::{Disposition, OperationQueue};
pub use relations::{Lifecycle, PendingOp, PendingTarget, RelationSet, Resolution};
pub use state::{FlushAction, FlushEvent, QueueState};
