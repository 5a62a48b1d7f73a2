//! Who the current actor is.

use crate::observe::lock;
use std::sync::Mutex;
use sync_types::UserId;

/// Source of the signed-in actor id.
pub trait IdentityProvider: Send + Sync {
    /// The current actor, or `None` when nobody is signed in.
    fn current_actor_id(&self) -> Option<UserId>;
}

/// Identity held in memory and replaced by the host application.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    actor: Mutex<Option<UserId>>,
}

impl StaticIdentity {
    /// Identity signed in as `actor`.
    pub fn new(actor: impl Into<UserId>) -> Self {
        Self {
            actor: Mutex::new(Some(actor.into())),
        }
    }

    /// Identity with nobody signed in.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Replace the current actor.
    pub fn set(&self, actor: Option<UserId>) {
        *lock(&self.actor) = actor;
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_actor_id(&self) -> Option<UserId> {
        lock(&self.actor).clone()
    }
}
