//! Callback lists with unsubscribe handles.

use std::sync::{Arc, Mutex, PoisonError, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered list of observers for events of type `T`.
pub struct ObserverList<T> {
    inner: Arc<Mutex<Slots<T>>>,
}

struct Slots<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

impl<T: 'static> ObserverList<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Slots {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a callback. It stays registered until the returned
    /// [`Subscription`] is dropped or unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut slots = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            let id = slots.next_id;
            slots.next_id += 1;
            slots.entries.push((id, Arc::new(callback)));
            id
        };

        let weak: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                let mut slots = inner.lock().unwrap_or_else(PoisonError::into_inner);
                slots.entries.retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    /// Invoke every callback. The list lock is released before any callback
    /// runs, so callbacks may subscribe or unsubscribe.
    pub fn notify(&self, event: &T) {
        let callbacks: Vec<Callback<T>> = {
            let slots = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entries.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in callbacks {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: 'static> Default for ObserverList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by every `on_*` registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Remove the observer now.
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

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}
