//! Session lifecycle notifications and their subscribers.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
};

use crate::{sync::lock, Error};

#[cfg(doc)]
use crate::Session;

/// A lifecycle event raised by the [`Session`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event {
    /// A channel has been opened, either locally or by the peer.
    ChannelOpened {
        /// Local number of the channel.
        id: u32,

        /// Type of the channel.
        channel_type: String,
    },

    /// A channel has been closed and removed from the session.
    ChannelClosed {
        /// Local number of the channel.
        id: u32,
    },

    /// The session failed with the provided error.
    Error(Arc<Error>),

    /// The session is now disconnected, this is always the last event.
    Disconnected,
}

/// An ordered set of registered entries, each removable through its [`Subscription`].
pub(crate) struct Registry<T> {
    next: AtomicU64,
    entries: Mutex<Vec<(u64, T)>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            next: Default::default(),
            entries: Default::default(),
        }
    }
}

impl<T: Send + 'static> Registry<T> {
    pub fn register(self: &Arc<Self>, entry: T) -> Subscription {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, entry));

        let registry: Weak<dyn Unregister> = Arc::downgrade(self) as _;

        Subscription { registry, id }
    }
}

impl<T: Clone> Registry<T> {
    pub fn snapshot(&self) -> Vec<T> {
        lock(&self.entries)
            .iter()
            .map(|(_, entry)| entry.clone())
            .collect()
    }
}

trait Unregister: Send + Sync {
    fn unregister(&self, id: u64);
}

impl<T: Send> Unregister for Registry<T> {
    fn unregister(&self, id: u64) {
        lock(&self.entries).retain(|(entry, _)| *entry != id);
    }
}

/// A registration to the session, revoked when dropped.
#[must_use = "Dropping the subscription unregisters it immediately"]
pub struct Subscription {
    registry: Weak<dyn Unregister>,
    id: u64,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(self.id);
        }
    }
}

/// A listener invoked on the session thread, it must return quickly.
pub(crate) type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

impl Registry<Listener> {
    pub fn emit(&self, event: &Event) {
        tracing::debug!("Raising session event {event:?}");

        for listener in self.snapshot() {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn dropped_subscriptions_stop_receiving() {
        let registry = Arc::new(Registry::<Listener>::default());
        let count = Arc::new(AtomicUsize::new(0));

        let subscription = registry.register({
            let count = count.clone();
            Arc::new(move |_: &Event| {
                count.fetch_add(1, Ordering::SeqCst);
            })
        });

        registry.emit(&Event::Disconnected);
        drop(subscription);
        registry.emit(&Event::Disconnected);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_are_called_in_order() {
        let registry = Arc::new(Registry::<Listener>::default());
        let order = Arc::new(Mutex::new(Vec::new()));

        let _subscriptions = (0..3)
            .map(|index| {
                let order = order.clone();
                registry.register(Arc::new(move |_: &Event| lock(&order).push(index)) as Listener)
            })
            .collect::<Vec<_>>();

        registry.emit(&Event::ChannelClosed { id: 0 });

        assert_eq!(*lock(&order), [0, 1, 2]);
    }
}
