//! Minimal subscriber list used by the transform store and the renderer.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct Subscribers<E> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Listener<E>)>>,
}

impl<E> Default for Subscribers<E> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl<E> Subscribers<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// Returns false if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut guard = self.listeners.lock();
        let before = guard.len();
        guard.retain(|(existing, _)| *existing != id);
        guard.len() != before
    }

    /// Calls every listener with `event`. Listeners run outside the lock so
    /// they may subscribe or unsubscribe without deadlocking.
    pub fn notify(&self, event: &E) {
        let listeners: Vec<Listener<E>> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_all_listeners_in_order() {
        let subs: Subscribers<u32> = Subscribers::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let a = Arc::clone(&seen);
        subs.subscribe(move |v| a.lock().push(("a", *v)));
        let b = Arc::clone(&seen);
        subs.subscribe(move |v| b.lock().push(("b", *v)));

        subs.notify(&3);
        assert_eq!(*seen.lock(), vec![("a", 3), ("b", 3)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let subs: Subscribers<u32> = Subscribers::new();
        let count = Arc::new(AtomicU64::new(0));
        let c = Arc::clone(&count);
        let id = subs.subscribe(move |_| {
            c.fetch_add(1, Ordering::Relaxed);
        });
        subs.notify(&1);
        assert!(subs.unsubscribe(id));
        assert!(!subs.unsubscribe(id));
        subs.notify(&2);
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert!(subs.is_empty());
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let subs: Arc<Subscribers<u32>> = Arc::new(Subscribers::new());
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let subs_inner = Arc::clone(&subs);
        let slot_inner = Arc::clone(&slot);
        let id = subs.subscribe(move |_| {
            if let Some(id) = *slot_inner.lock() {
                subs_inner.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);
        subs.notify(&1);
        assert!(subs.is_empty());
    }
}
