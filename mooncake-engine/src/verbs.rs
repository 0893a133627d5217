//! The verbs-primitive seam. Real deployments plug in an `ibverbs`-backed
//! `VerbsDevice`; this workspace ships `SimDevice`, an in-process simulation
//! of one-sided RDMA READ/WRITE over a shared byte-addressed arena, used the
//! same way the wider transport layer treats NVMe-oF: a second concrete
//! implementation of one capability set, not a special case.

use mooncake_common::EngineError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// One registered memory region as the fabric sees it: a raw byte buffer
/// plus the lkey/rkey pair a `VerbsDevice` hands out on registration.
#[derive(Clone)]
pub struct RegisteredRegion {
    pub data: Arc<RwLock<Vec<u8>>>,
    pub lkey: u32,
    pub rkey: u32,
}

/// Minimal capability set a posting worker needs from a local NIC: register
/// memory, resolve a previously-registered address range, and execute a
/// one-sided READ/WRITE against a remote device's registered region.
pub trait VerbsDevice: Send + Sync {
    fn register_memory(&self, addr: u64, length: u64) -> (u32, u32);
    fn unregister_memory(&self, addr: u64);

    /// Looks up the local region backing `addr` (exact registration key).
    fn local_region(&self, addr: u64) -> Option<RegisteredRegion>;

    /// Executes a one-sided op against `remote`'s region. In real hardware
    /// this is an asynchronous `ibv_post_send` followed by a CQ completion;
    /// here it is synchronous and always resolves to a completion.
    fn rdma_op(
        &self,
        opcode: crate::slice::Opcode,
        local: &RegisteredRegion,
        local_offset: u64,
        remote: &RegisteredRegion,
        remote_offset: u64,
        length: u64,
    ) -> Result<(), EngineError>;
}

/// Process-local simulated NIC: a table of registered regions keyed by base
/// address, and a plain `memcpy` standing in for the DMA engine.
#[derive(Default)]
pub struct SimDevice {
    regions: RwLock<HashMap<u64, RegisteredRegion>>,
    next_key: RwLock<u32>,
}

impl SimDevice {
    pub fn new() -> Self {
        SimDevice { regions: RwLock::new(HashMap::new()), next_key: RwLock::new(1) }
    }

    /// Registers a region backed by caller-supplied bytes, returning the
    /// handle tests use to read back written data without going through the
    /// lkey/rkey table.
    pub fn register_with_bytes(&self, addr: u64, bytes: Vec<u8>) -> RegisteredRegion {
        let (lkey, rkey) = self.alloc_keys();
        let region = RegisteredRegion { data: Arc::new(RwLock::new(bytes)), lkey, rkey };
        self.regions.write().insert(addr, region.clone());
        region
    }

    fn alloc_keys(&self) -> (u32, u32) {
        let mut next = self.next_key.write();
        let lkey = *next;
        let rkey = *next + 1;
        *next += 2;
        (lkey, rkey)
    }
}

impl VerbsDevice for SimDevice {
    fn register_memory(&self, addr: u64, length: u64) -> (u32, u32) {
        let region = self.register_with_bytes(addr, vec![0u8; length as usize]);
        (region.lkey, region.rkey)
    }

    fn unregister_memory(&self, addr: u64) {
        self.regions.write().remove(&addr);
    }

    fn local_region(&self, addr: u64) -> Option<RegisteredRegion> {
        self.regions.read().get(&addr).cloned()
    }

    fn rdma_op(
        &self,
        opcode: crate::slice::Opcode,
        local: &RegisteredRegion,
        local_offset: u64,
        remote: &RegisteredRegion,
        remote_offset: u64,
        length: u64,
    ) -> Result<(), EngineError> {
        let lo = local_offset as usize;
        let ro = remote_offset as usize;
        let len = length as usize;
        match opcode {
            crate::slice::Opcode::Write => {
                let src = local.data.read();
                let mut dst = remote.data.write();
                if lo + len > src.len() || ro + len > dst.len() {
                    return Err(EngineError::FabricError("write out of bounds".into()));
                }
                dst[ro..ro + len].copy_from_slice(&src[lo..lo + len]);
            }
            crate::slice::Opcode::Read => {
                let src = remote.data.read();
                let mut dst = local.data.write();
                if ro + len > src.len() || lo + len > dst.len() {
                    return Err(EngineError::FabricError("read out of bounds".into()));
                }
                dst[lo..lo + len].copy_from_slice(&src[ro..ro + len]);
            }
        }
        Ok(())
    }
}
