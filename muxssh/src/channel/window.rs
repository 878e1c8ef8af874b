use std::{
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Mutex,
    },
    task,
};

use futures::future::poll_fn;

use crate::sync::lock;

/// The window the peer sends into, replenished as the consumer drains received data.
pub(crate) struct LocalWindow {
    initial: u32,
    threshold: u32,
    inner: Mutex<Credit>,
}

#[derive(Default)]
struct Credit {
    /// Bytes the peer may still send.
    available: u32,

    /// Bytes drained by the consumer, not yet granted back to the peer.
    drained: u32,
}

impl LocalWindow {
    pub fn new(initial: u32, packet_size: u32) -> Self {
        Self {
            initial,
            threshold: initial
                .saturating_sub(packet_size.saturating_mul(5))
                .max(initial / 2),
            inner: Mutex::new(Credit {
                available: initial,
                drained: 0,
            }),
        }
    }

    pub fn initial(&self) -> u32 {
        self.initial
    }

    pub fn size(&self) -> u32 {
        lock(&self.inner).available
    }

    /// Account for `size` received bytes, returns `false` if the peer overflowed the window.
    pub fn receive(&self, size: u32) -> bool {
        let mut credit = lock(&self.inner);
        let fits = size <= credit.available;

        credit.available = credit.available.saturating_sub(size);

        fits
    }

    /// Account for `size` bytes drained by the consumer.
    pub fn consume(&self, size: u32) {
        let mut credit = lock(&self.inner);

        credit.drained = credit.drained.saturating_add(size);
    }

    /// Compute the amount of bytes to grant back to the peer, if the threshold has been reached.
    pub fn adjust(&self) -> Option<u32> {
        let mut credit = lock(&self.inner);

        if credit.available > self.threshold {
            return None;
        }

        let grant = credit
            .drained
            .min(self.initial.saturating_sub(credit.available));
        if grant == 0 {
            return None;
        }

        credit.available += grant;
        credit.drained -= grant;

        Some(grant)
    }
}

/// The window this side sends into, shared by every writer of the channel.
pub(crate) struct RemoteWindow {
    inner: AtomicU32,
    closed: AtomicBool,
    wakers: Mutex<Vec<task::Waker>>,
}

impl RemoteWindow {
    pub fn new(size: u32) -> Self {
        Self {
            inner: size.into(),
            closed: Default::default(),
            wakers: Default::default(),
        }
    }

    pub fn size(&self) -> u32 {
        self.inner.load(Ordering::Acquire)
    }

    pub fn adjust(&self, size: u32) {
        // Never fails, the closure always returns `Some`.
        let _ = self
            .inner
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |window| {
                Some(window.saturating_add(size))
            });

        self.wake();
    }

    /// Stop every pending and future reservation.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake();
    }

    fn wake(&self) {
        for waker in lock(&self.wakers).drain(..) {
            waker.wake();
        }
    }

    fn try_reserve(&self, mut amount: u32) -> Option<u32> {
        let updated = self
            .inner
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |window| {
                if amount <= window {
                    Some(window - amount)
                } else {
                    amount = window;

                    if amount > 0 {
                        Some(0)
                    } else {
                        None
                    }
                }
            })
            .is_ok();

        if updated {
            Some(amount)
        } else {
            None
        }
    }

    /// Reserve up to `amount` bytes, `None` if the window has been closed.
    pub fn poll_reserve(&self, cx: &mut task::Context, amount: u32) -> task::Poll<Option<u32>> {
        if self.closed.load(Ordering::Acquire) {
            return task::Poll::Ready(None);
        }

        if let Some(size) = self.try_reserve(amount) {
            return task::Poll::Ready(Some(size));
        }

        {
            let mut wakers = lock(&self.wakers);
            if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                wakers.push(cx.waker().clone());
            }
        }

        // The window may have been adjusted between the attempt and the registration.
        if self.closed.load(Ordering::Acquire) {
            task::Poll::Ready(None)
        } else if let Some(size) = self.try_reserve(amount) {
            task::Poll::Ready(Some(size))
        } else {
            task::Poll::Pending
        }
    }

    pub async fn reserve(&self, amount: u32) -> Option<u32> {
        poll_fn(|cx| self.poll_reserve(cx, amount)).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn local_window_waits_for_the_consumer() {
        let window = LocalWindow::new(1000, 100);

        assert!(window.receive(600));
        assert_eq!(window.adjust(), None);

        window.consume(200);
        assert_eq!(window.adjust(), Some(200));
        assert_eq!(window.size(), 600);

        window.consume(400);
        assert_eq!(window.adjust(), None);

        assert!(window.receive(200));
        assert_eq!(window.adjust(), Some(400));
        assert_eq!(window.size(), 800);
    }

    #[test]
    fn local_window_clamps_on_overflow() {
        let window = LocalWindow::new(100, 10);

        assert!(!window.receive(150));
        assert_eq!(window.size(), 0);

        window.consume(150);
        assert_eq!(window.adjust(), Some(100));
    }

    #[test]
    fn remote_window_grants_partially() {
        let window = RemoteWindow::new(10);

        assert_eq!(window.try_reserve(4), Some(4));
        assert_eq!(window.try_reserve(16), Some(6));
        assert_eq!(window.try_reserve(1), None);

        window.adjust(3);
        assert_eq!(window.size(), 3);
    }

    #[async_std::test]
    async fn pending_reservations_wake_on_adjust_and_close() {
        let window = Arc::new(RemoteWindow::new(0));

        let waiter = async_std::task::spawn({
            let window = window.clone();
            async move { window.reserve(8).await }
        });
        async_std::task::sleep(std::time::Duration::from_millis(20)).await;
        window.adjust(5);
        assert_eq!(waiter.await, Some(5));

        let waiter = async_std::task::spawn({
            let window = window.clone();
            async move { window.reserve(8).await }
        });
        async_std::task::sleep(std::time::Duration::from_millis(20)).await;
        window.close();
        assert_eq!(waiter.await, None);
    }
}
