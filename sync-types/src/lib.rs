//! # sync-types
//!
//! Data model shared by every social-sync crate.
//!
//! - [`UserId`], [`ItemId`], [`OperationId`], [`PageCursor`] - identity and ordering
//! - [`Document`], [`Item`], [`RemotePage`], [`LiveChange`] - remote content
//! - [`Query`] - query shapes against the remote document store
//! - [`BlockRelation`] - user blocking records
//! - [`QueuedOperation`], [`Mutation`] - offline write queue entries
//! - [`ConnectivityState`] - reachability and quality
//! - [`SyncError`] - error taxonomy

#![warn(missing_docs)]
#![warn(clippy::all)]

mod connectivity;
mod error;
mod ids;
mod item;
mod operation;
mod query;
mod relation;

pub use connectivity::{ConnectivityState, NetworkEvent, NetworkType, QualityTier};
pub use error::SyncError;
pub use ids::{ItemId, OperationId, PageCursor, UserId};
pub use item::{Document, Item, LiveChange, RemotePage};
pub use operation::{Mutation, OperationKind, QueuedOperation};
pub use query::{compare_values, Direction, FieldFilter, FilterOp, OrderBy, Query};
pub use relation::BlockRelation;
