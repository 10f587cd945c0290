// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Fan-out of state changes and device events to streaming subscribers.
//!
//! A [`Registry`] is a concurrent map from subscription id to a bounded
//! mailbox. Broadcasting never blocks: when a subscriber's mailbox is full
//! the oldest notification is dropped in favor of the newest, so a slow
//! stream always converges on fresh state. Subscriptions are RAII guards;
//! dropping one removes it from the registry, which makes removal on
//! handler exit unconditional.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use occ_protocol::control_proto::DeviceEventType;
use tokio::sync::Notify;
use uuid::Uuid;

/// Mailbox capacity per subscriber.
const MAILBOX_CAPACITY: usize = 64;

/// A state change observed on the machine, as published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateNotice {
    /// Uppercase state name.
    pub state: String,
    /// Whether the state is an auto-traversed intermediate one.
    pub intermediate: bool,
}

impl StateNotice {
    /// A stable (non-intermediate) state notice.
    pub fn stable(state: impl Into<String>) -> Self {
        Self {
            state: state.into(),
            intermediate: false,
        }
    }
}

/// Asynchronous notification published on the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Final reply closing an event stream.
    Null,
    /// The running task reported end of data.
    EndOfStream,
    /// The task terminated on its own terms.
    BasicTaskTerminated,
    /// A health check failed.
    TaskInternalError,
}

impl DeviceEvent {
    /// Wire representation of this event.
    pub fn proto(self) -> DeviceEventType {
        match self {
            DeviceEvent::Null => DeviceEventType::NullDeviceEvent,
            DeviceEvent::EndOfStream => DeviceEventType::EndOfStream,
            DeviceEvent::BasicTaskTerminated => DeviceEventType::BasicTaskTerminated,
            DeviceEvent::TaskInternalError => DeviceEventType::TaskInternalError,
        }
    }
}

/// Generate a subscription id with the deterministic `OCC_` prefix.
pub fn subscription_id(purpose: &str) -> String {
    let id = Uuid::new_v4();
    if purpose.is_empty() {
        format!("OCC_{id}")
    } else {
        format!("OCC_{purpose}_{id}")
    }
}

struct Mailbox<T> {
    queue: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Mailbox<T> {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    fn push(&self, item: T) {
        {
            let mut queue = self.queue.lock().unwrap();
            if queue.len() == MAILBOX_CAPACITY {
                queue.pop_front();
            }
            queue.push_back(item);
        }
        self.notify.notify_one();
    }

    async fn recv(&self) -> T {
        loop {
            // Arm the notification before checking the queue so a push
            // between the check and the await cannot be lost.
            let notified = self.notify.notified();
            if let Some(item) = self.queue.lock().unwrap().pop_front() {
                return item;
            }
            notified.await;
        }
    }
}

/// Concurrent registry of streaming subscribers.
#[derive(Clone)]
pub struct Registry<T> {
    subscribers: Arc<DashMap<String, Arc<Mailbox<T>>>>,
}

impl<T: Clone> Registry<T> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
        }
    }

    /// Register a new subscriber; the returned guard unregisters on drop.
    pub fn register(&self, purpose: &str) -> Subscription<T> {
        let id = subscription_id(purpose);
        let mailbox = Arc::new(Mailbox::new());
        self.subscribers.insert(id.clone(), mailbox.clone());
        Subscription {
            id,
            mailbox,
            subscribers: self.subscribers.clone(),
        }
    }

    /// Deliver a notification to every currently-registered subscriber.
    pub fn broadcast(&self, item: T) {
        for entry in self.subscribers.iter() {
            entry.value().push(item.clone());
        }
    }

    /// Number of registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    /// Whether the registry has no subscribers.
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

impl<T: Clone> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A live subscription. Buffered notifications are discarded on drop.
pub struct Subscription<T> {
    id: String,
    mailbox: Arc<Mailbox<T>>,
    subscribers: Arc<DashMap<String, Arc<Mailbox<T>>>>,
}

impl<T> Subscription<T> {
    /// The subscription id (`OCC_<purpose>_<uuid>`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Receive the next notification, waiting as long as necessary.
    pub async fn recv(&self) -> T {
        self.mailbox.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.subscribers.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_id_format() {
        let id = subscription_id("StateStream");
        assert!(id.starts_with("OCC_StateStream_"));
        let bare = subscription_id("");
        assert!(bare.starts_with("OCC_"));
        assert!(!bare.starts_with("OCC__"));
        // Ids are unique
        assert_ne!(subscription_id("x"), subscription_id("x"));
    }

    #[tokio::test]
    async fn test_broadcast_reaches_all_subscribers() {
        let registry: Registry<u32> = Registry::new();
        let a = registry.register("a");
        let b = registry.register("b");
        assert_eq!(registry.len(), 2);

        registry.broadcast(7);
        assert_eq!(a.recv().await, 7);
        assert_eq!(b.recv().await, 7);
    }

    #[tokio::test]
    async fn test_unregister_on_drop() {
        let registry: Registry<u32> = Registry::new();
        let sub = registry.register("scoped");
        assert_eq!(registry.len(), 1);
        drop(sub);
        assert!(registry.is_empty());

        // Broadcasting to an empty registry is a no-op.
        registry.broadcast(1);
    }

    #[tokio::test]
    async fn test_mailbox_drops_oldest_when_full() {
        let registry: Registry<usize> = Registry::new();
        let sub = registry.register("slow");

        for i in 0..MAILBOX_CAPACITY + 10 {
            registry.broadcast(i);
        }

        // The first 10 notifications were displaced by the newest ones.
        assert_eq!(sub.recv().await, 10);
    }

    #[tokio::test]
    async fn test_recv_wakes_on_push() {
        let registry: Registry<&'static str> = Registry::new();
        let sub = registry.register("waiter");

        let registry2 = registry.clone();
        let sender = tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            registry2.broadcast("ping");
        });

        assert_eq!(sub.recv().await, "ping");
        sender.await.unwrap();
    }

    #[tokio::test]
    async fn test_notifications_preserve_order() {
        let registry: Registry<u32> = Registry::new();
        let sub = registry.register("ordered");
        for i in 0..5 {
            registry.broadcast(i);
        }
        for i in 0..5 {
            assert_eq!(sub.recv().await, i);
        }
    }
}
