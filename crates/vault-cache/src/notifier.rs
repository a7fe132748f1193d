//! Change delta fan-out.
//!
//! Synchronous listeners registered with [`ChangeNotifier::on_content_change`]
//! run on the emitting task; async consumers use [`ChangeNotifier::subscribe`]
//! and receive the same batches through a broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use fnv::FnvHashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::types::ContentChange;

pub type ChangeBatch = Arc<Vec<ContentChange>>;

type Listener = Arc<dyn Fn(&[ContentChange]) + Send + Sync>;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct ChangeNotifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    listeners: Mutex<FnvHashMap<u64, Listener>>,
    next_id: AtomicU64,
    sender: broadcast::Sender<ChangeBatch>,
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(NotifierInner {
                listeners: Mutex::new(FnvHashMap::default()),
                next_id: AtomicU64::new(1),
                sender,
            }),
        }
    }

    /// Registers `listener` for every emitted batch until the returned
    /// subscription is dropped or unsubscribed.
    pub fn on_content_change<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&[ContentChange]) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.lock().insert(id, Arc::new(listener));
        Subscription {
            id,
            notifier: Arc::downgrade(&self.inner),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeBatch> {
        self.inner.sender.subscribe()
    }

    /// Delivers `changes` as one batch. Empty batches are not delivered.
    pub fn emit(&self, changes: Vec<ContentChange>) {
        if changes.is_empty() {
            return;
        }
        let batch: ChangeBatch = Arc::new(changes);

        // Listeners may unsubscribe while being called, so run them outside
        // the lock.
        let listeners: Vec<Listener> = self.inner.listeners.lock().values().cloned().collect();
        for listener in listeners {
            listener(&batch);
        }

        // No receivers is fine.
        let _ = self.inner.sender.send(batch);
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.lock().len()
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

/// Handle returned by [`ChangeNotifier::on_content_change`].
#[must_use = "dropping a subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    notifier: Weak<NotifierInner>,
}

impl Subscription {
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.notifier.upgrade() {
            inner.listeners.lock().remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChangedFields;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{timeout, Duration};

    fn batch() -> Vec<ContentChange> {
        vec![ContentChange::new("a.md", ChangedFields::TAGS)]
    }

    #[test]
    fn listener_receives_batches_until_unsubscribed() {
        let notifier = ChangeNotifier::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let subscription = notifier.on_content_change(move |changes| {
            counter.fetch_add(changes.len(), Ordering::SeqCst);
        });

        notifier.emit(batch());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        assert_eq!(notifier.listener_count(), 0);
        notifier.emit(batch());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_batches_are_skipped() {
        let notifier = ChangeNotifier::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let _subscription = notifier.on_content_change(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        notifier.emit(Vec::new());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn broadcast_subscribers_receive_batch() {
        let notifier = ChangeNotifier::new(8);
        let mut rx1 = notifier.subscribe();
        let mut rx2 = notifier.subscribe();

        notifier.emit(batch());

        let received = timeout(Duration::from_millis(100), rx1.recv())
            .await
            .expect("timeout")
            .expect("recv");
        assert_eq!(received.as_slice(), batch().as_slice());
        let received = rx2.recv().await.expect("recv2");
        assert_eq!(received[0].changed_fields, ChangedFields::TAGS);
    }

    #[test]
    fn subscription_outliving_notifier_is_harmless() {
        let notifier = ChangeNotifier::default();
        let subscription = notifier.on_content_change(|_| {});
        drop(notifier);
        drop(subscription);
    }
}
