//! Response Waiter — single-shot rendezvous used by tools that hand off to a
//! remote device (e.g. a push-notification approval flow) and need to block
//! the calling task until a reply arrives out-of-band.

use std::collections::HashMap;

use tokio::sync::{oneshot, RwLock};

pub struct ResponseWaiter {
    pending: RwLock<HashMap<String, oneshot::Sender<String>>>,
}

impl ResponseWaiter {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
        }
    }

    /// Register `id`, returning a receiver that resolves on the matching
    /// [`Self::deliver`]. Re-registering an id drops the previous receiver's
    /// sender, which causes that earlier receiver to observe a closed
    /// channel rather than silently hang.
    pub async fn register(&self, id: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id.to_string(), tx);
        rx
    }

    /// Deliver `content` to the waiter registered under `id`, if any. A
    /// missing registration (unknown id, already delivered, or cleaned up)
    /// is dropped silently.
    pub async fn deliver(&self, id: &str, content: impl Into<String>) {
        if let Some(tx) = self.pending.write().await.remove(id) {
            let _ = tx.send(content.into());
        }
    }

    /// Remove `id`'s registration without delivering. A no-op if nothing (or
    /// an already-delivered entry) is registered under `id`.
    pub async fn cleanup(&self, id: &str) {
        self.pending.write().await.remove(id);
    }
}

impl Default for ResponseWaiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deliver_resolves_the_matching_waiter() {
        let waiter = ResponseWaiter::new();
        let rx = waiter.register("req-1").await;
        waiter.deliver("req-1", "hello").await;
        assert_eq!(rx.await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn deliver_with_no_waiter_is_dropped_silently() {
        let waiter = ResponseWaiter::new();
        waiter.deliver("missing", "hello").await; // must not panic
    }

    #[tokio::test]
    async fn at_most_one_deliver_succeeds_per_register() {
        let waiter = ResponseWaiter::new();
        let rx = waiter.register("req-1").await;
        waiter.deliver("req-1", "first").await;
        // Second deliver finds nothing registered (already removed).
        waiter.deliver("req-1", "second").await;
        assert_eq!(rx.await.unwrap(), "first");
    }

    #[tokio::test]
    async fn cleanup_on_delivered_id_is_a_no_op() {
        let waiter = ResponseWaiter::new();
        let rx = waiter.register("req-1").await;
        waiter.deliver("req-1", "value").await;
        waiter.cleanup("req-1").await; // no-op, already removed
        assert_eq!(rx.await.unwrap(), "value");
    }

    #[tokio::test]
    async fn cleanup_without_delivery_drops_the_receiver() {
        let waiter = ResponseWaiter::new();
        let rx = waiter.register("req-1").await;
        waiter.cleanup("req-1").await;
        assert!(rx.await.is_err());
    }
}
