use parking_lot::Mutex;
use std::sync::{Arc, Weak};

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

/// Synchronous observer list shared by the stores.
///
/// Every state mutation notifies the current subscribers in registration
/// order. Callbacks run under the registry lock and must not subscribe or
/// unsubscribe reentrantly.
pub struct Subscribers<T> {
    inner: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Subscribers<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for Subscribers<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Registry::default())),
        }
    }

    /// Register a callback. The returned handle detaches it when dropped or
    /// when `unsubscribe` is called explicitly.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> Subscription
    where
        T: Send + 'static,
    {
        let id = {
            let mut registry = self.inner.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            registry.entries.push((id, Box::new(callback)));
            id
        };
        let weak: Weak<Mutex<Registry<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.lock().entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    pub fn notify(&self, value: &T) {
        let registry = self.inner.lock();
        for (_, callback) in &registry.entries {
            callback(value);
        }
    }

    pub fn count(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Unsubscribe handle returned by [`Subscribers::subscribe`].
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}
