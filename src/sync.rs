//! The logical Lock/Event/Semaphore primitives of §5, realized over
//! `tokio::sync`.
//!
//! Two different "Lock" needs show up in the design, and they get two
//! different types on purpose:
//!
//! - Pool and HTTP/1.1 connection state is only ever touched for a quick,
//!   non-suspending check-and-set (§5: "`is_available`, `has_expired`,
//!   `get_origin`, and `info` must be non-suspending and safe to call under
//!   the pool lock"). That's [`std::sync::Mutex`] — never held across
//!   `.await`.
//! - HTTP/2's one-time handshake and the tunnel proxy's CONNECT both hold
//!   their lock across a suspension point by design. Those use
//!   [`tokio::sync::Mutex`] directly; there's no value in wrapping it.
//!
//! [`Event`] is the one primitive worth a wrapper: a `Notify` alone can lose
//! a `notify()` that happens before the first `notified()` call, so it's
//! paired with a ready flag.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A one-shot event: set once by a producer, observed by any number of
/// consumers, no missed wakeups regardless of call order.
#[derive(Debug, Default)]
pub(crate) struct Event {
    ready: AtomicBool,
    notify: Notify,
}

impl Event {
    pub(crate) fn new() -> Event {
        Event {
            ready: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Marks the event as set and wakes every current waiter.
    pub(crate) fn set(&self) {
        self.ready.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub(crate) fn is_set(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Waits for the event, returning immediately if it was already set.
    pub(crate) async fn wait(&self) {
        if self.is_set() {
            return;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn set_before_wait_is_not_lost() {
        let event = Arc::new(Event::new());
        event.set();
        event.wait().await;
    }

    #[tokio::test]
    async fn wait_blocks_until_set() {
        let event = Arc::new(Event::new());
        let waiter = {
            let event = event.clone();
            tokio::spawn(async move {
                event.wait().await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());
        event.set();
        waiter.await.unwrap();
    }
}
