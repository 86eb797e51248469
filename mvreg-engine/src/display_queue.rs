//! Bounded working set of clouds shown while a batch runs

use crate::store::CloudStore;
use log::debug;
use mvreg_core::CloudKey;
use std::collections::VecDeque;

/// FIFO of shown keys. Once full, each new key replaces the oldest one.
#[derive(Debug, Clone)]
pub struct DisplayQueue {
    capacity: usize,
    keys: VecDeque<CloudKey>,
}

impl DisplayQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            keys: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Keys from oldest to newest
    pub fn keys(&self) -> impl Iterator<Item = &CloudKey> {
        self.keys.iter()
    }

    /// Show `key`, hiding the oldest key when the queue is full. A key that
    /// is already queued is left where it is.
    pub fn push(&mut self, key: CloudKey, store: &CloudStore) {
        if self.keys.contains(&key) {
            return;
        }

        if self.keys.len() < self.capacity {
            store.show(key);
        } else if let Some(oldest) = self.keys.pop_front() {
            debug!("display queue full, replacing {} with {}", oldest, key);
            store.hide_and_show(oldest, key);
        }
        self.keys.push_back(key);
    }

    /// Hide every queued key
    pub fn clear(&mut self, store: &CloudStore) {
        for key in self.keys.drain(..) {
            store.hide(key);
        }
    }
}
