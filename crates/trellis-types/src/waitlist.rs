use std::collections::HashMap;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Order in which deferred waiters are replayed once the resource they
/// wait for becomes available.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplayOrder {
    /// Most recently queued waiter first.
    #[default]
    Lifo,
    /// Earliest queued waiter first.
    Fifo,
}

/// Per-resource queues of deferred continuations.
///
/// A resource is "in flight" for as long as it has an entry here, even an
/// empty one: [`Waitlist::begin`] opens the entry, [`Waitlist::defer`]
/// queues behind it, and [`Waitlist::finish`] closes it and hands back the
/// queued waiters in replay order.
#[derive(Debug)]
pub struct Waitlist<K, T> {
    order: ReplayOrder,
    queues: HashMap<K, Vec<T>>,
}

impl<K: Eq + Hash, T> Waitlist<K, T> {
    pub fn new(order: ReplayOrder) -> Self {
        Self {
            order,
            queues: HashMap::new(),
        }
    }

    pub fn order(&self) -> ReplayOrder {
        self.order
    }

    /// Mark `key` as in flight. Returns `false` if it already was.
    pub fn begin(&mut self, key: K) -> bool {
        if self.queues.contains_key(&key) {
            return false;
        }
        self.queues.insert(key, Vec::new());
        true
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.queues.contains_key(key)
    }

    /// Queue a waiter behind an in-flight `key`.
    ///
    /// Hands the waiter back if nothing is in flight for `key`.
    pub fn defer(&mut self, key: &K, waiter: T) -> Result<(), T> {
        match self.queues.get_mut(key) {
            Some(queue) => {
                queue.push(waiter);
                Ok(())
            }
            None => Err(waiter),
        }
    }

    /// Close `key` and drain its waiters in replay order.
    pub fn finish(&mut self, key: &K) -> Vec<T> {
        let mut waiters = self.queues.remove(key).unwrap_or_default();
        if self.order == ReplayOrder::Lifo {
            waiters.reverse();
        }
        waiters
    }

    /// Number of waiters queued behind `key`.
    pub fn waiting(&self, key: &K) -> usize {
        self.queues.get(key).map_or(0, Vec::len)
    }

    /// Drop every entry, abandoning queued waiters.
    pub fn clear(&mut self) {
        self.queues.clear();
    }
}
