use std::{
    collections::{HashMap, VecDeque},
    hash::Hash,
};

/// Remembers the last `capacity` message keys together with whatever was
/// sent in reply, so duplicates can be answered without being processed
/// again.
#[derive(Debug)]
pub struct RecentMessages<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    entries: HashMap<K, V>,
}

impl<K: Hash + Eq + Clone, V> RecentMessages<K, V> {
    pub fn new(capacity: usize) -> RecentMessages<K, V> {
        RecentMessages {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: K, value: V) {
        if self.entries.insert(key.clone(), value).is_some() {
            return;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
