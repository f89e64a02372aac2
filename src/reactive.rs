//! Observable value holder
//!
//! Every store in the crate is built on [`ReactiveCell`]: a value plus a list of
//! listeners that are called synchronously after each `set`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Inner<T> {
    value: Mutex<T>,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    next_listener: AtomicU64,
    /// Values written but not yet delivered, in write order
    pending: Mutex<VecDeque<T>>,
    delivering: AtomicBool,
}

/// Clears the delivering flag even if a listener panics
struct DeliveryGuard<'a>(&'a AtomicBool);

impl Drop for DeliveryGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Shared, observable value. Clones refer to the same cell.
pub struct ReactiveCell<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for ReactiveCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("value", &*lock(&self.inner.value))
            .field("listeners", &lock(&self.inner.listeners).len())
            .finish()
    }
}

impl<T> ReactiveCell<T>
where
    T: Clone + Send + 'static,
{
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Inner {
                value: Mutex::new(value),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
                pending: Mutex::new(VecDeque::new()),
                delivering: AtomicBool::new(false),
            }),
        }
    }

    /// Snapshot of the current value
    pub fn get(&self) -> T {
        lock(&self.inner.value).clone()
    }

    /// Replace the value with `updater(previous)` and notify every listener.
    ///
    /// Listeners see values in the order they were written, one at a time.
    /// A `set` made while another is delivering (from a listener, or from
    /// another thread) is queued and delivered by that caller once the
    /// current round of listeners returns, so re-entrant writes do not
    /// recurse.
    pub fn set(&self, updater: impl FnOnce(&T) -> T) {
        {
            let mut value = lock(&self.inner.value);
            let next = updater(&value);
            *value = next.clone();
            lock(&self.inner.pending).push_back(next);
        }
        self.deliver();
    }

    fn deliver(&self) {
        loop {
            if self.inner.delivering.swap(true, Ordering::AcqRel) {
                return;
            }
            {
                let _guard = DeliveryGuard(&self.inner.delivering);
                loop {
                    let Some(next) = lock(&self.inner.pending).pop_front() else {
                        break;
                    };
                    let listeners: Vec<Listener<T>> = lock(&self.inner.listeners)
                        .iter()
                        .map(|(_, listener)| Arc::clone(listener))
                        .collect();
                    for listener in listeners {
                        listener(&next);
                    }
                }
            }
            // A value queued after the last pop but before the flag cleared
            if lock(&self.inner.pending).is_empty() {
                return;
            }
        }
    }

    /// Register a listener called with the new value after every `set`.
    ///
    /// The listener stays registered until [`Subscription::unsubscribe`] is
    /// called; dropping the returned handle does not remove it.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_listener.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.listeners).push((id, Arc::new(listener)));

        let weak: Weak<Inner<T>> = Arc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(inner) = weak.upgrade() {
                lock(&inner.listeners).retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.listeners).len()
    }
}

impl<T: Clone + Send + Default + 'static> Default for ReactiveCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Capability to remove a listener registered with `subscribe`.
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.detach.is_some())
            .finish()
    }
}
