//! RDMA Context (spec §3): one per local NIC. Owns the verbs device, the
//! registered-memory table, the endpoint store and the `active` liveness
//! flag the monitor thread flips on async fabric events.

use crate::endpoint::Endpoint;
use crate::endpoint_store::EndpointStore;
use crate::verbs::VerbsDevice;
use mooncake_common::{Device, EngineError, MemoryRegion, NicPath};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct Context {
    pub device: Device,
    pub verbs: Arc<dyn VerbsDevice>,
    pub endpoint_store: Arc<dyn EndpointStore>,
    /// Registered-memory table (spec §5): reader-writer lock, registration
    /// is write, lookup is read.
    regions: RwLock<HashMap<u64, MemoryRegion>>,
    active: AtomicBool,
}

impl Context {
    pub fn new(device: Device, verbs: Arc<dyn VerbsDevice>, endpoint_store: Arc<dyn EndpointStore>) -> Self {
        Context { device, verbs, endpoint_store, regions: RwLock::new(HashMap::new()), active: AtomicBool::new(true) }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Registers `[addr, addr+length)` for this NIC, failing with
    /// `INVALID_ARG` if it overlaps an already-registered region (spec
    /// §4.1, §8 invariant 6).
    pub fn register_memory(
        &self,
        addr: u64,
        length: u64,
        location_tag: &str,
        remote_accessible: bool,
    ) -> Result<(u32, u32), EngineError> {
        let candidate = MemoryRegion { addr, length, location_tag: location_tag.to_string(), remote_accessible };
        {
            let regions = self.regions.read();
            if regions.values().any(|r| r.overlaps(&candidate)) {
                return Err(EngineError::InvalidArg(format!(
                    "region [{addr:#x}, {:#x}) overlaps an existing registration",
                    addr + length
                )));
            }
        }
        let (lkey, rkey) = self.verbs.register_memory(addr, length);
        self.regions.write().insert(addr, candidate);
        Ok((lkey, rkey))
    }

    pub fn unregister_memory(&self, addr: u64) {
        self.verbs.unregister_memory(addr);
        self.regions.write().remove(&addr);
    }

    pub fn region_for(&self, addr: u64) -> Option<MemoryRegion> {
        self.regions.read().get(&addr).cloned()
    }

    pub fn regions_snapshot(&self) -> Vec<MemoryRegion> {
        self.regions.read().values().cloned().collect()
    }

    /// Fetches a connected Endpoint for `path`, opening and handshaking a
    /// fresh one on miss. `handshake` performs the active-role RPC exchange
    /// and returns the remote qp_nums.
    pub fn get_or_connect_endpoint(
        &self,
        path: &NicPath,
        num_qp: usize,
        max_wr_depth: u32,
        handshake: impl FnOnce(&[u32]) -> Result<Vec<u32>, EngineError>,
    ) -> Result<Arc<Endpoint>, EngineError> {
        if let Some(existing) = self.endpoint_store.get(path) {
            if existing.is_connected() {
                return Ok(existing);
            }
        }
        let fresh = Arc::new(Endpoint::new(path.clone(), num_qp, max_wr_depth));
        let local_qp_nums: Vec<u32> = fresh.qps.iter().map(|qp| qp.local_qp_num).collect();
        let remote_qp_nums = handshake(&local_qp_nums)?;
        fresh.complete_handshake(&remote_qp_nums)?;
        Ok(self.endpoint_store.insert(path.clone(), fresh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint_store::FifoEndpointStore;
    use crate::verbs::SimDevice;

    fn sample_device() -> Device {
        Device { name: "mlx5_0".into(), lid: 1, gid: [0; 16] }
    }

    #[test]
    fn registering_overlapping_regions_fails() {
        let ctx = Context::new(sample_device(), Arc::new(SimDevice::new()), Arc::new(FifoEndpointStore::new(8)));
        ctx.register_memory(0x1000, 100, "cpu:0", true).unwrap();
        let err = ctx.register_memory(0x1050, 100, "cpu:0", true).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArg(_)));
    }

    #[test]
    fn unregister_then_register_restores_working_state() {
        let ctx = Context::new(sample_device(), Arc::new(SimDevice::new()), Arc::new(FifoEndpointStore::new(8)));
        ctx.register_memory(0x1000, 100, "cpu:0", true).unwrap();
        ctx.unregister_memory(0x1000);
        assert!(ctx.region_for(0x1000).is_none());
        ctx.register_memory(0x1000, 100, "cpu:0", true).unwrap();
        assert!(ctx.region_for(0x1000).is_some());
    }

    #[test]
    fn get_or_connect_endpoint_caches_after_handshake() {
        let ctx = Context::new(sample_device(), Arc::new(SimDevice::new()), Arc::new(FifoEndpointStore::new(8)));
        let path = NicPath::new("peer", "mlx5_0");
        let ep = ctx.get_or_connect_endpoint(&path, 2, 256, |local_qps| Ok(local_qps.iter().map(|n| n + 100).collect())).unwrap();
        assert!(ep.is_connected());
        let cached = ctx.get_or_connect_endpoint(&path, 2, 256, |_| panic!("should not re-handshake")).unwrap();
        assert!(Arc::ptr_eq(&ep, &cached));
    }
}
