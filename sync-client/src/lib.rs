//! # sync-client
//!
//! Offline-first data-synchronization layer for social feeds.
//!
//! This is the library applications embed to read feeds and mutate block
//! relationships while connectivity comes and goes.
//!
//! ## Features
//!
//! - **Connectivity Monitor**: reachability events plus periodic latency
//!   probes classified into quality tiers
//! - **Offline Queue**: durable FIFO of mutations, flushed with exponential
//!   backoff and idempotency keys
//! - **Relationship Store**: optimistic block/unblock with rollback, live
//!   reconciliation of both directions
//! - **Paginated Feed Cache**: cursor pagination merged with live inserts,
//!   TTL cache for cold starts, mandatory relationship filtering
//! - **Pure State Machines**: decisions live in sync-core; this crate does
//!   the I/O
//!
//! ## Example
//!
//! ```ignore
//! use sync_client::{EngineDeps, SyncConfig, SyncEngine};
//! use sync_types::Query;
//!
//! let config = SyncConfig::from_file("sync.toml".as_ref())?;
//! let deps = EngineDeps::from_config(&config, remote, identity, probe).await?;
//! let engine = SyncEngine::new(config, deps);
//! engine.init().await?;
//!
//! let feed = engine.feed()?;
//! let page = feed.load(&Query::collection("posts"), 20).await;
//! engine.relationships()?.block(&"spammer".into(), None).await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod engine;
pub mod error;
pub mod feed;
pub mod identity;
pub mod logging;
pub mod observe;
pub mod queue;
pub mod relationships;
pub mod remote;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use connectivity::{ConnectivityMonitor, LatencyProbe, ProbeStep, ScriptedProbe};
pub use context::SyncContext;
pub use engine::{EngineDeps, SyncEngine};
pub use error::{ClientError, Result, StorageError};
pub use feed::{FeedEvent, FeedOptions, FeedPage, LiveSubscription, PaginatedFeedCache};
pub use identity::{IdentityProvider, StaticIdentity};
pub use observe::{Listeners, Subscription};
pub use queue::{AbandonedOperation, OfflineOperationQueue, OperationHandler, QueueEvent};
pub use relationships::{ContentFilter, RelationshipEvent, RelationshipOptions, RelationshipStore};
pub use remote::{LiveFeed, MockRemoteStore, RemoteHold, RemoteStore, WriteAck};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
