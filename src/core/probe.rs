use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::VolumeState;

/// A single state transition of a tracked volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeStateChange {
    pub path: String,
    pub old_state: VolumeState,
    pub new_state: VolumeState,
}

/// Read side of the storage subsystem: snapshots plus change notifications
#[async_trait]
pub trait VolumeStateProbe: Send + Sync {
    /// Current state of `path`, `Unknown` when it cannot be determined
    async fn state(&self, path: &str) -> VolumeState;

    /// Starts receiving change notifications. Dropping the returned
    /// subscription unsubscribes.
    fn subscribe(&self) -> Subscription;
}

/// Ordered stream of state changes for one subscriber
pub struct Subscription {
    rx: UnboundedReceiver<VolumeStateChange>,
}

impl Subscription {
    /// Next change, or `None` once the probe has shut down
    pub async fn recv(&mut self) -> Option<VolumeStateChange> {
        self.rx.recv().await
    }
}

/// Fan-out list of live subscribers, shared by probe implementations
#[derive(Clone, Default)]
pub struct Subscribers {
    senders: Arc<Mutex<Vec<UnboundedSender<VolumeStateChange>>>>,
}

impl Subscribers {
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        Subscription { rx }
    }

    /// Delivers `change` to every subscriber, dropping those that went away
    pub fn publish(&self, change: VolumeStateChange) {
        self.lock().retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn is_empty(&self) -> bool {
        let mut senders = self.lock();
        senders.retain(|tx| !tx.is_closed());
        senders.is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<UnboundedSender<VolumeStateChange>>> {
        self.senders.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn change(path: &str, new_state: VolumeState) -> VolumeStateChange {
        VolumeStateChange {
            path: path.to_string(),
            old_state: VolumeState::Mounted,
            new_state,
        }
    }

    #[tokio::test]
    async fn changes_arrive_in_publish_order() {
        let subscribers = Subscribers::default();
        let mut sub = subscribers.subscribe();

        subscribers.publish(change("/mnt/sd", VolumeState::Unmounted));
        subscribers.publish(change("/mnt/sd", VolumeState::Checking));

        assert_eq!(sub.recv().await.unwrap().new_state, VolumeState::Unmounted);
        assert_eq!(sub.recv().await.unwrap().new_state, VolumeState::Checking);
    }

    #[test]
    fn dropped_subscription_unsubscribes() {
        let subscribers = Subscribers::default();
        let sub = subscribers.subscribe();
        assert!(!subscribers.is_empty());

        drop(sub);
        assert!(subscribers.is_empty());

        // Publishing to nobody is fine
        subscribers.publish(change("/mnt/sd", VolumeState::Removed));
    }
}
