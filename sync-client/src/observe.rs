//! Listener registry with unsubscribe handles.
//!
//! Components publish synchronous events through [`Listeners`]. Every
//! `subscribe` returns a [`Subscription`]; dropping it or calling
//! [`Subscription::unsubscribe`] ends delivery. A listener removed while an
//! emit is in progress is skipped for the rest of that emit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Entry<T> {
    id: u64,
    active: Arc<AtomicBool>,
    callback: Callback<T>,
}

struct Table<T> {
    next_id: u64,
    entries: Vec<Entry<T>>,
}

/// A set of listeners for events of type `T`.
pub struct Listeners<T> {
    table: Arc<Mutex<Table<T>>>,
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(Table {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }
}

impl<T> Clone for Listeners<T> {
    fn clone(&self) -> Self {
        Self {
            table: Arc::clone(&self.table),
        }
    }
}

impl<T: 'static> std::fmt::Debug for Listeners<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners").field("len", &self.len()).finish()
    }
}

impl<T: 'static> Listeners<T> {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let active = Arc::new(AtomicBool::new(true));
        let id = {
            let mut table = lock(&self.table);
            let id = table.next_id;
            table.next_id += 1;
            table.entries.push(Entry {
                id,
                active: Arc::clone(&active),
                callback: Arc::new(callback),
            });
            id
        };

        let weak: Weak<Mutex<Table<T>>> = Arc::downgrade(&self.table);
        Subscription {
            active,
            remove: Some(Box::new(move || {
                if let Some(table) = weak.upgrade() {
                    lock(&table).entries.retain(|e| e.id != id);
                }
            })),
        }
    }

    /// Deliver `event` to every active listener.
    ///
    /// Listeners run outside the registry lock, so a listener may subscribe
    /// or unsubscribe without deadlocking.
    pub fn emit(&self, event: &T) {
        let snapshot: Vec<(Arc<AtomicBool>, Callback<T>)> = lock(&self.table)
            .entries
            .iter()
            .map(|e| (Arc::clone(&e.active), Arc::clone(&e.callback)))
            .collect();
        for (active, callback) in snapshot {
            if active.load(Ordering::SeqCst) {
                callback(event);
            }
        }
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    /// Check whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener.
    pub fn clear(&self) {
        let mut table = lock(&self.table);
        for entry in &table.entries {
            entry.active.store(false, Ordering::SeqCst);
        }
        table.entries.clear();
    }
}

/// Handle returned by `subscribe`. Delivery stops when it is dropped.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    active: Arc<AtomicBool>,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Stop delivery now.
    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    /// Whether the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn cancel(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
