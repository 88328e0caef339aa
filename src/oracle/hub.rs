//! Broadcast hub - fans values out to subscribers without blocking
//!
//! Each subscriber owns a small bounded buffer. Publishing never waits:
//! when a subscriber's buffer is full the value is dropped for that
//! subscriber only, so one slow consumer cannot stall the publisher.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

struct HubInner<T> {
    subscribers: Mutex<HashMap<u64, mpsc::Sender<T>>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl<T> HubInner<T> {
    fn remove(&self, id: u64) -> bool {
        self.subscribers.lock().remove(&id).is_some()
    }
}

/// In-memory pub/sub with drop-on-full delivery
pub struct BroadcastHub<T> {
    inner: Arc<HubInner<T>>,
}

impl<T: Clone + Send + 'static> BroadcastHub<T> {
    /// Create a hub whose subscribers buffer up to `capacity` values
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Register a new subscriber
    pub fn subscribe(&self) -> Subscription<T> {
        self.subscribe_with(|| None)
    }

    /// Register a new subscriber and hand it `initial()` best-effort.
    ///
    /// `initial` runs while the subscriber set is locked, so no publish can
    /// interleave between reading the initial value and registering.
    pub fn subscribe_with<F>(&self, initial: F) -> Subscription<T>
    where
        F: FnOnce() -> Option<T>,
    {
        let (tx, rx) = mpsc::channel(self.inner.capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut subscribers = self.inner.subscribers.lock();
        if let Some(value) = initial() {
            let _ = tx.try_send(value);
        }
        subscribers.insert(id, tx);
        drop(subscribers);

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `value` to every subscriber with room in its buffer.
    ///
    /// Returns how many subscribers received it.
    pub fn publish(&self, value: &T) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, tx) in subscribers.iter() {
            match tx.try_send(value.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::trace!(subscriber = id, "Subscriber buffer full, dropping value");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            subscribers.remove(&id);
        }

        delivered
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.lock().len()
    }
}

impl<T: Clone + Send + 'static> Default for BroadcastHub<T> {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Receiving end of a hub registration.
///
/// Released by [`Subscription::unsubscribe`] or on drop; the hub stops
/// writing to it as soon as it is released.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<T>,
    hub: Weak<HubInner<T>>,
}

impl<T> Subscription<T> {
    /// Wait for the next value. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Take a buffered value without waiting
    pub fn try_recv(&mut self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(value) => Some(value),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Release the registration
    pub fn unsubscribe(self) {}

    fn release(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
        self.rx.close();
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.release();
    }
}
