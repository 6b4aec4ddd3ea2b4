//! Subscription registry keyed by (type, symbol)
//!
//! One stream per key, any number of listeners behind it. Registering the
//! same callback twice is a no-op; removing a key drops all of its listeners.
//! The reader loop dispatches through `dispatch`, which clones the listeners
//! out of the lock before invoking them.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::adapters::types::{StreamCallback, StreamMessage, SubscriptionKey};

type Listeners = HashMap<SubscriptionKey, Vec<StreamCallback>>;

/// Outcome of `SubscriptionRegistry::insert`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// First listener for the key; the stream must be opened
    NewStream,
    /// Attached to a stream that is already open
    Attached,
    /// This exact callback was already registered
    Duplicate,
}

#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RwLock<Listeners>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Listeners> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Listeners> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a listener for `key`
    pub fn insert(&self, key: SubscriptionKey, callback: StreamCallback) -> Registration {
        let mut map = self.write();
        match map.get_mut(&key) {
            Some(listeners) if listeners.iter().any(|cb| Arc::ptr_eq(cb, &callback)) => {
                Registration::Duplicate
            }
            Some(listeners) => {
                listeners.push(callback);
                Registration::Attached
            }
            None => {
                map.insert(key, vec![callback]);
                Registration::NewStream
            }
        }
    }

    /// Remove every listener for `key`. Returns `false` if it was not registered.
    pub fn remove(&self, key: &SubscriptionKey) -> bool {
        self.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.read().contains_key(key)
    }

    /// Number of keys (streams), not listeners
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn listener_count(&self, key: &SubscriptionKey) -> usize {
        self.read().get(key).map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub fn keys(&self) -> Vec<SubscriptionKey> {
        self.read().keys().cloned().collect()
    }

    pub fn clear(&self) {
        self.write().clear();
    }

    /// Deliver `message` to every listener of `key`. Returns `false` when
    /// nobody is subscribed (late frames after an unsubscribe are dropped).
    pub fn dispatch(&self, key: &SubscriptionKey, message: StreamMessage) -> bool {
        let listeners = self.read().get(key).cloned().unwrap_or_default();
        let Some((last, rest)) = listeners.split_last() else {
            return false;
        };
        for cb in rest {
            cb(message.clone());
        }
        last(message);
        true
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("keys", &self.keys())
            .finish()
    }
}
