//! Per-topic subscriber callbacks

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct RegistryInner<T> {
    next_id: u64,
    callbacks: HashMap<u64, Callback<T>>,
}

/// Set of callbacks interested in one topic.
///
/// Every registration is distinct, even for the same closure. Invocation
/// order across subscribers is unspecified.
pub struct Subscribers<T> {
    inner: Arc<RwLock<RegistryInner<T>>>,
}

impl<T: 'static> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(RegistryInner {
                next_id: 0,
                callbacks: HashMap::new(),
            })),
        }
    }

    /// Register a callback. It stays registered until the returned
    /// [`Subscription`] is dropped or explicitly unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let id = inner.next_id;
        inner.next_id += 1;
        inner.callbacks.insert(id, Arc::new(callback));

        let registry: Weak<RwLock<RegistryInner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            unsubscribe: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .callbacks
                        .remove(&id);
                }
            })),
        }
    }

    /// Invoke every registered callback with `item`, returning how many ran.
    ///
    /// Callbacks run on a snapshot of the registry taken before the first call,
    /// so a callback may subscribe or unsubscribe without deadlocking.
    pub fn emit(&self, item: &T) -> usize {
        let callbacks: Vec<Callback<T>> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .values()
            .cloned()
            .collect();

        for callback in &callbacks {
            callback(item);
        }
        callbacks.len()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Registration handle returned by [`Subscribers::subscribe`]
#[must_use = "dropping a Subscription unregisters its callback"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Stop future invocations of the callback
    pub fn unsubscribe(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Keep the callback registered for the lifetime of the registry
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}
