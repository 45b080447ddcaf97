//! Registry of in-flight fetches, used to coalesce identical requests.
//!
//! The first caller to miss the cache for a key becomes the leader and
//! receives a [`LeaderGuard`]; later callers receive a [`Waiter`] attached to
//! the leader's outcome. The registry entry lives exactly as long as the guard:
//! completing publishes the outcome, dropping without completing (cancellation
//! or panic) closes the channel so waiters can restart.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use log::{debug, warn};
use tokio::sync::watch;

use crate::errors::GovernorError;
use crate::key::RequestKey;

type Outcome<V> = Option<Result<V, GovernorError>>;

/// Role assigned to a caller for one key.
pub(crate) enum Flight<'a, V: Clone> {
    Leader(LeaderGuard<'a, V>),
    Follower(Waiter<V>),
}

/// Shared pending-result handles keyed by request.
pub(crate) struct InFlightRegistry<V> {
    pending: Mutex<HashMap<RequestKey, watch::Receiver<Outcome<V>>>>,
}

impl<V: Clone> InFlightRegistry<V> {
    pub(crate) fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<RequestKey, watch::Receiver<Outcome<V>>>> {
        self.pending.lock().unwrap_or_else(|poisoned| {
            warn!("In-flight registry mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Attach to the pending fetch for `key`, or register as its leader.
    pub(crate) fn join_or_lead(&self, key: &RequestKey) -> Flight<'_, V> {
        let mut pending = self.lock_pending();

        if let Some(receiver) = pending.get(key) {
            debug!("Coalescing request {} onto in-flight fetch", key);
            return Flight::Follower(Waiter {
                receiver: receiver.clone(),
            });
        }

        let (sender, receiver) = watch::channel(None);
        pending.insert(key.clone(), receiver);
        Flight::Leader(LeaderGuard {
            registry: self,
            key: key.clone(),
            sender: Some(sender),
        })
    }

    /// Number of keys currently being fetched.
    pub(crate) fn len(&self) -> usize {
        self.lock_pending().len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, key: &RequestKey) {
        self.lock_pending().remove(key);
    }
}

impl<V: Clone> Default for InFlightRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Ownership of one in-flight fetch.
pub(crate) struct LeaderGuard<'a, V: Clone> {
    registry: &'a InFlightRegistry<V>,
    key: RequestKey,
    sender: Option<watch::Sender<Outcome<V>>>,
}

impl<V: Clone> LeaderGuard<'_, V> {
    /// Remove the registry entry and broadcast `outcome` to every waiter.
    pub(crate) fn complete(mut self, outcome: Result<V, GovernorError>) {
        self.registry.release(&self.key);
        if let Some(sender) = self.sender.take() {
            // No receivers left is fine: every waiter may have been cancelled.
            let _ = sender.send(Some(outcome));
        }
    }
}

impl<V: Clone> Drop for LeaderGuard<'_, V> {
    fn drop(&mut self) {
        if self.sender.is_some() {
            debug!("Leader for {} dropped before completing, releasing", self.key);
            self.registry.release(&self.key);
            // Dropping the sender wakes waiters with a closed channel.
            self.sender.take();
        }
    }
}

/// Handle on another caller's in-flight fetch.
pub(crate) struct Waiter<V> {
    receiver: watch::Receiver<Outcome<V>>,
}

impl<V: Clone> Waiter<V> {
    /// Wait for the leader's outcome. `None` means the leader went away
    /// without publishing one and the caller should start over.
    pub(crate) async fn wait(mut self) -> Option<Result<V, GovernorError>> {
        match self.receiver.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        }
    }
}
