//! Tag-keyed subscriber registry.
//!
//! Producers call [`SubscriberRegistry::notify`] with a tag and a payload;
//! every callback registered under that tag runs, in registration order.
//! Producers never learn who is listening.
//!
//! # Guarantees
//!
//! - A panicking callback is caught and logged.  The remaining callbacks for
//!   the same tag still receive the payload.
//! - Callbacks run with the registry lock released, so a callback may
//!   subscribe or unsubscribe (itself or others) without deadlocking.
//! - A callback unsubscribed during a notify pass, before its turn, is not
//!   invoked by that pass.
//!
//! Notify calls are not serialized by the registry.  Callers that need causal
//! order per tag publish from a single task (the hub's pump, the client's
//! dispatcher).

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tracing::{debug, warn};

type Callback<P> = Arc<dyn Fn(&P) + Send + Sync>;

struct Inner<K, P> {
    next_id: u64,
    // BTreeMap keyed by a monotonically increasing id keeps registration order.
    entries: HashMap<K, BTreeMap<u64, Callback<P>>>,
}

/// Shared tag → callbacks map.  Cloning yields another handle to the same map.
pub struct SubscriberRegistry<K, P> {
    inner: Arc<Mutex<Inner<K, P>>>,
}

impl<K, P> Clone for SubscriberRegistry<K, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, P> Default for SubscriberRegistry<K, P>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    P: 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> SubscriberRegistry<K, P>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    P: 'static,
{
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }

    /// Registers `callback` under `tag`.
    ///
    /// The returned [`Subscription`] removes the callback when dropped or
    /// when [`Subscription::unsubscribe`] is called.  Use
    /// [`Subscription::detach`] to keep it for the registry's lifetime.
    pub fn subscribe<F>(&self, tag: K, callback: F) -> Subscription
    where
        F: Fn(&P) + Send + Sync + 'static,
    {
        let id = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .entries
                .entry(tag.clone())
                .or_default()
                .insert(id, Arc::new(callback));
            id
        };
        debug!("subscriber {id} registered for {tag:?}");

        let weak: Weak<Mutex<Inner<K, P>>> = Arc::downgrade(&self.inner);
        Subscription {
            id,
            remove: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    remove_entry(&inner, &tag, id);
                }
            })),
        }
    }

    /// Removes the subscriber `id` from `tag`.  Returns `false` if it was not
    /// registered there.
    pub fn unsubscribe(&self, tag: &K, id: u64) -> bool {
        remove_entry(&self.inner, tag, id)
    }

    /// Delivers `payload` to every callback registered under `tag`.
    ///
    /// Returns how many callbacks completed without panicking.
    pub fn notify(&self, tag: &K, payload: &P) -> usize {
        let snapshot: Vec<(u64, Callback<P>)> = match self.lock().entries.get(tag) {
            Some(set) => set.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for (id, callback) in snapshot {
            if !self.contains(tag, id) {
                continue;
            }
            match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("subscriber {id} for {tag:?} panicked; continuing with the rest"),
            }
        }
        delivered
    }

    /// Number of callbacks currently registered under `tag`.
    pub fn len(&self, tag: &K) -> usize {
        self.lock().entries.get(tag).map_or(0, BTreeMap::len)
    }

    /// `true` when no tag has any callback.
    pub fn is_empty(&self) -> bool {
        self.lock().entries.values().all(BTreeMap::is_empty)
    }

    fn contains(&self, tag: &K, id: u64) -> bool {
        self.lock()
            .entries
            .get(tag)
            .is_some_and(|set| set.contains_key(&id))
    }

    fn lock(&self) -> MutexGuard<'_, Inner<K, P>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K, P> SubscriberRegistry<K, P>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    P: Clone + Send + 'static,
{
    /// Subscribes a bounded channel instead of a callback.
    ///
    /// The notify pass only does a `try_send`, so a slow reader never holds
    /// up the other subscribers.  When the channel is full the payload is
    /// dropped for this subscriber and a warning is logged.
    pub fn subscribe_channel(&self, tag: K, capacity: usize) -> (Subscription, mpsc::Receiver<P>) {
        let (tx, rx) = mpsc::channel(capacity);
        let label = tag.clone();
        let sub = self.subscribe(tag, move |payload: &P| match tx.try_send(payload.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("channel subscriber for {label:?} is full; event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        });
        (sub, rx)
    }
}

fn remove_entry<K, P>(inner: &Mutex<Inner<K, P>>, tag: &K, id: u64) -> bool
where
    K: Eq + Hash,
{
    let mut inner = inner.lock().unwrap_or_else(PoisonError::into_inner);
    let Some(set) = inner.entries.get_mut(tag) else {
        return false;
    };
    let removed = set.remove(&id).is_some();
    if set.is_empty() {
        inner.entries.remove(tag);
    }
    removed
}

/// Handle returned by [`SubscriberRegistry::subscribe`].
#[must_use = "dropping a Subscription unsubscribes it immediately; call detach() to keep it"]
pub struct Subscription {
    id: u64,
    remove: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// The subscriber id, usable with [`SubscriberRegistry::unsubscribe`].
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Removes the callback now.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }

    /// Keeps the callback registered until the registry itself is dropped.
    pub fn detach(mut self) {
        self.remove = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&u32) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &u32| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_notify_reaches_every_subscriber_of_the_tag() {
        // Arrange
        let registry: SubscriberRegistry<&'static str, u32> = SubscriberRegistry::new();
        let (a, cb_a) = counter();
        let (b, cb_b) = counter();
        let _sa = registry.subscribe("push", cb_a);
        let _sb = registry.subscribe("push", cb_b);

        // Act
        let delivered = registry.notify(&"push", &1);

        // Assert
        assert_eq!(delivered, 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notify_other_tag_is_not_delivered() {
        let registry: SubscriberRegistry<&'static str, u32> = SubscriberRegistry::new();
        let (a, cb) = counter();
        let _s = registry.subscribe("broker", cb);
        assert_eq!(registry.notify(&"push", &1), 0);
        assert_eq!(a.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_delivery_follows_registration_order() {
        let registry: SubscriberRegistry<u8, u32> = SubscriberRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut subs = Vec::new();
        for n in 0..5 {
            let order = Arc::clone(&order);
            subs.push(registry.subscribe(0, move |_| order.lock().unwrap().push(n)));
        }

        registry.notify(&0, &0);

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_panicking_callback_does_not_block_the_rest() {
        // Arrange: the middle subscriber panics
        let registry: SubscriberRegistry<u8, u32> = SubscriberRegistry::new();
        let (a, cb_a) = counter();
        let (c, cb_c) = counter();
        let _sa = registry.subscribe(0, cb_a);
        let _sb = registry.subscribe(0, |_| panic!("subscriber bug"));
        let _sc = registry.subscribe(0, cb_c);

        // Act
        let delivered = registry.notify(&0, &9);

        // Assert
        assert_eq!(delivered, 2);
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(c.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(&0), 3, "a panicking subscriber stays registered");
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let registry: SubscriberRegistry<u8, u32> = SubscriberRegistry::new();
        let (a, cb) = counter();
        let sub = registry.subscribe(0, cb);
        drop(sub);
        registry.notify(&0, &1);
        assert_eq!(a.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_detached_subscription_keeps_receiving() {
        let registry: SubscriberRegistry<u8, u32> = SubscriberRegistry::new();
        let (a, cb) = counter();
        let sub = registry.subscribe(0, cb);
        let id = sub.id();
        sub.detach();

        registry.notify(&0, &1);
        assert_eq!(a.load(Ordering::SeqCst), 1);

        assert!(registry.unsubscribe(&0, id));
        assert!(!registry.unsubscribe(&0, id));
    }

    #[test]
    fn test_unsubscribe_during_notify_skips_removed_callback() {
        // Arrange: the first callback removes the second before its turn.
        let registry: SubscriberRegistry<u8, u32> = SubscriberRegistry::new();
        let (b, cb_b) = counter();
        let victim = Arc::new(Mutex::new(None::<u64>));

        let reg = registry.clone();
        let victim_for_first = Arc::clone(&victim);
        let first = registry.subscribe(0, move |_| {
            if let Some(id) = *victim_for_first.lock().unwrap() {
                reg.unsubscribe(&0, id);
            }
        });
        let second = registry.subscribe(0, cb_b);
        *victim.lock().unwrap() = Some(second.id());
        second.detach();

        // Act
        let delivered = registry.notify(&0, &1);

        // Assert
        assert_eq!(delivered, 1);
        assert_eq!(b.load(Ordering::SeqCst), 0);
        drop(first);
    }

    #[test]
    fn test_callback_may_subscribe_during_notify_without_deadlock() {
        let registry: SubscriberRegistry<u8, u32> = SubscriberRegistry::new();
        let reg = registry.clone();
        let _s = registry.subscribe(0, move |_| reg.subscribe(1, |_| {}).detach());

        registry.notify(&0, &1);

        assert_eq!(registry.len(&1), 1);
    }

    #[tokio::test]
    async fn test_channel_subscriber_receives_payloads_in_order() {
        let registry: SubscriberRegistry<u8, u32> = SubscriberRegistry::new();
        let (_sub, mut rx) = registry.subscribe_channel(0, 8);

        registry.notify(&0, &1);
        registry.notify(&0, &2);

        assert_eq!(rx.recv().await, Some(1));
        assert_eq!(rx.recv().await, Some(2));
    }

    #[test]
    fn test_full_channel_drops_without_blocking_others() {
        // Arrange: capacity 1 channel that nobody reads, plus a callback
        let registry: SubscriberRegistry<u8, u32> = SubscriberRegistry::new();
        let (_slow, _rx) = registry.subscribe_channel(0, 1);
        let (a, cb) = counter();
        let _fast = registry.subscribe(0, cb);

        // Act
        for n in 0..10 {
            registry.notify(&0, &n);
        }

        // Assert
        assert_eq!(a.load(Ordering::SeqCst), 10);
    }
}
