//! FIFO endpoint store: insertion-ordered list plus a map, evicting the
//! oldest entry on overflow. Grounded in the original store's doubly
//! linked list + map pairing, expressed here as a `VecDeque` of keys.

use super::EndpointStore;
use crate::endpoint::Endpoint;
use mooncake_common::NicPath;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

struct Inner {
    order: VecDeque<NicPath>,
    map: HashMap<NicPath, Arc<Endpoint>>,
}

pub struct FifoEndpointStore {
    capacity: usize,
    inner: RwLock<Inner>,
}

impl FifoEndpointStore {
    pub fn new(capacity: usize) -> Self {
        FifoEndpointStore { capacity, inner: RwLock::new(Inner { order: VecDeque::new(), map: HashMap::new() }) }
    }

    fn evict_until_under_capacity(inner: &mut Inner, capacity: usize) {
        while inner.map.len() >= capacity {
            let Some(oldest) = inner.order.pop_front() else { break };
            inner.map.remove(&oldest);
        }
    }
}

impl EndpointStore for FifoEndpointStore {
    fn get(&self, path: &NicPath) -> Option<Arc<Endpoint>> {
        self.inner.read().map.get(path).cloned()
    }

    fn insert(&self, path: NicPath, endpoint: Arc<Endpoint>) -> Arc<Endpoint> {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.map.get(&path) {
            return existing.clone();
        }
        Self::evict_until_under_capacity(&mut inner, self.capacity);
        inner.order.push_back(path.clone());
        inner.map.insert(path, endpoint.clone());
        endpoint
    }

    fn delete(&self, path: &NicPath) -> Option<Arc<Endpoint>> {
        let mut inner = self.inner.write();
        let removed = inner.map.remove(path);
        if removed.is_some() {
            inner.order.retain(|p| p != path);
        }
        removed
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
    fn evicts_oldest_on_overflow() {
        let store = FifoEndpointStore::new(2);
        store.insert(NicPath::new("a", "nic"), endpoint());
        store.insert(NicPath::new("b", "nic"), endpoint());
        store.insert(NicPath::new("c", "nic"), endpoint());
        assert_eq!(store.len(), 2);
        assert!(store.get(&NicPath::new("a", "nic")).is_none());
        assert!(store.get(&NicPath::new("c", "nic")).is_some());
    }

    #[test]
    fn insert_of_existing_key_is_idempotent() {
        let store = FifoEndpointStore::new(4);
        let path = NicPath::new("a", "nic");
        let first = store.insert(path.clone(), endpoint());
        let second = store.insert(path.clone(), endpoint());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.len(), 1);
    }
}
