//! Per-Context cache of connections keyed by NIC path (spec §4.4). Two
//! eviction policies share one trait surface so the engine picks between
//! them as configuration, not a compile-time switch (spec §9, open
//! question c).

mod fifo;
mod sieve;

pub use fifo::FifoEndpointStore;
pub use sieve::SieveEndpointStore;

use crate::endpoint::Endpoint;
use mooncake_common::NicPath;
use std::sync::Arc;

/// Shared surface both eviction policies implement. All methods take
/// `&self`; internal mutability is the reader-writer lock described in
/// spec §5 ("Endpoint Store: reader-writer lock; get takes read, insert/
/// delete take write").
pub trait EndpointStore: Send + Sync {
    /// Returns the cached Endpoint for `path`, if present, marking it
    /// recently-used as the policy defines.
    fn get(&self, path: &NicPath) -> Option<Arc<Endpoint>>;

    /// Inserts `endpoint` under `path`, evicting under capacity pressure
    /// first. Returns the endpoint that ends up cached under `path` — the
    /// existing one if already present, otherwise the one just inserted.
    fn insert(&self, path: NicPath, endpoint: Arc<Endpoint>) -> Arc<Endpoint>;

    fn delete(&self, path: &NicPath) -> Option<Arc<Endpoint>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> usize;
}

pub fn build(policy: mooncake_common::EndpointPolicy, capacity: usize) -> Box<dyn EndpointStore> {
    match policy {
        mooncake_common::EndpointPolicy::Fifo => Box::new(FifoEndpointStore::new(capacity)),
        mooncake_common::EndpointPolicy::Sieve => Box::new(SieveEndpointStore::new(capacity)),
    }
}
