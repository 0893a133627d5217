//! SIEVE endpoint store (spec §4.4): each entry carries a `visited` bit; a
//! rotating "hand" walks from newest to oldest on eviction, clearing
//! visited bits until it finds an unvisited entry to evict. Algorithm
//! mirrors the original implementation's `endpoint_map_` + `hand_` pair.

use super::EndpointStore;
use crate::endpoint::Endpoint;
use mooncake_common::NicPath;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

struct Entry {
    endpoint: Arc<Endpoint>,
    visited: AtomicBool,
}

struct Inner {
    /// Insertion order, oldest first, newest last — matches the "newest to
    /// oldest" eviction walk direction starting from the back.
    order: Vec<NicPath>,
    map: HashMap<NicPath, Entry>,
    hand: Option<NicPath>,
}

pub struct SieveEndpointStore {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl SieveEndpointStore {
    pub fn new(capacity: usize) -> Self {
        SieveEndpointStore {
            capacity,
            inner: RwLock::new(Inner { order: Vec::new(), map: HashMap::new(), hand: None }),
        }
    }

    /// Evicts exactly one entry, mutating `hand` to its predecessor (or
    /// unsetting it if the evicted entry was the head). Returns the evicted
    /// endpoint so the caller can tear down its queue pairs.
    fn evict_one(inner: &mut Inner) -> Option<Arc<Endpoint>> {
        if inner.order.is_empty() {
            return None;
        }
        let mut idx = match &inner.hand {
            Some(key) => inner.order.iter().position(|k| k == key).unwrap_or(inner.order.len() - 1),
            None => inner.order.len() - 1,
        };
        loop {
            let key = inner.order[idx].clone();
            let entry = inner.map.get(&key).expect("order/map consistency");
            if entry.visited.swap(false, Ordering::AcqRel) {
                idx = if idx == 0 { inner.order.len() - 1 } else { idx - 1 };
                continue;
            }
            inner.hand = if idx == 0 { None } else { Some(inner.order[idx - 1].clone()) };
            inner.order.remove(idx);
            let entry = inner.map.remove(&key).expect("order/map consistency");
            return Some(entry.endpoint);
        }
    }

    fn remove_key(inner: &mut Inner, path: &NicPath) -> Option<Arc<Endpoint>> {
        let idx = inner.order.iter().position(|k| k == path)?;
        if inner.hand.as_ref() == Some(path) {
            inner.hand = if idx == 0 { None } else { Some(inner.order[idx - 1].clone()) };
        }
        inner.order.remove(idx);
        inner.map.remove(path).map(|e| e.endpoint)
    }
}

impl EndpointStore for SieveEndpointStore {
    fn get(&self, path: &NicPath) -> Option<Arc<Endpoint>> {
        let inner = self.inner.read();
        let entry = inner.map.get(path)?;
        entry.visited.store(true, Ordering::Release);
        Some(entry.endpoint.clone())
    }

    fn insert(&self, path: NicPath, endpoint: Arc<Endpoint>) -> Arc<Endpoint> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.map.get(&path) {
            return existing.endpoint.clone();
        }
        while inner.map.len() >= self.capacity {
            if Self::evict_one(&mut inner).is_none() {
                break;
            }
        }
        inner.order.push(path.clone());
        inner.map.insert(path, Entry { endpoint: endpoint.clone(), visited: AtomicBool::new(false) });
        endpoint
    }

    fn delete(&self, path: &NicPath) -> Option<Arc<Endpoint>> {
        Self::remove_key(&mut self.inner.write(), path)
    }

    fn len(&self) -> usize {
        self.inner.read().map.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::Endpoint;

    fn endpoint() -> Arc<Endpoint> {
        Arc::new(Endpoint::new(NicPath::new("peer", "mlx5_0"), 2, 256))
    }

    #[test]
    fn never_exceeds_capacity() {
        let store = SieveEndpointStore::new(2);
        for i in 0..5 {
            store.insert(NicPath::new(&format!("n{i}"), "nic"), endpoint());
        }
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn recently_gotten_entry_survives_eviction() {
        let store = SieveEndpointStore::new(2);
        let a = NicPath::new("a", "nic");
        let b = NicPath::new("b", "nic");
        store.insert(a.clone(), endpoint());
        store.insert(b.clone(), endpoint());
        // Touch `a` so its visited bit is set before the next insert forces
        // an eviction; `a` should survive, `b` should be evicted instead.
        store.get(&a);
        store.insert(NicPath::new("c", "nic"), endpoint());
        assert!(store.get(&a).is_some());
        assert!(store.get(&b).is_none());
    }

    #[test]
    fn delete_of_hand_moves_hand_to_predecessor() {
        let store = SieveEndpointStore::new(4);
        let a = NicPath::new("a", "nic");
        let b = NicPath::new("b", "nic");
        store.insert(a.clone(), endpoint());
        store.insert(b.clone(), endpoint());
        {
            let mut inner = store.inner.write();
            inner.hand = Some(b.clone());
        }
        store.delete(&b);
        let inner = store.inner.read();
        assert_eq!(inner.hand, Some(a));
    }
}
