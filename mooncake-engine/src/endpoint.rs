//! RDMA Endpoint (spec §4.5): a group of queue pairs to one remote NIC, its
//! connection state machine, and per-QP depth tracking. Real QP setup is a
//! verbs ioctl sequence; this crate's `QueuePair` tracks only the state and
//! depth counters the rest of the engine depends on.

use mooncake_common::{EngineError, NicPath};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointStatus {
    Initializing,
    Unconnected,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QpState {
    Reset,
    Init,
    Rtr,
    Rts,
}

/// One queue pair's depth counter (spec §8 invariant 2): incremented by the
/// posting thread, decremented by the polling thread.
pub struct QueuePair {
    pub state: RwLock<QpState>,
    pub wr_depth: AtomicU32,
    pub max_wr_depth: u32,
    pub local_qp_num: u32,
    pub remote_qp_num: RwLock<Option<u32>>,
}

impl QueuePair {
    fn new(local_qp_num: u32, max_wr_depth: u32) -> Self {
        QueuePair {
            state: RwLock::new(QpState::Reset),
            wr_depth: AtomicU32::new(0),
            max_wr_depth,
            local_qp_num,
            remote_qp_num: RwLock::new(None),
        }
    }

    pub fn depth(&self) -> u32 {
        self.wr_depth.load(Ordering::Acquire)
    }

    pub fn has_room(&self) -> bool {
        self.depth() < self.max_wr_depth
    }

    /// Attempts to reserve one slot, returning `false` if the QP is full.
    pub fn try_reserve(&self) -> bool {
        let mut cur = self.wr_depth.load(Ordering::Acquire);
        loop {
            if cur >= self.max_wr_depth {
                return false;
            }
            match self.wr_depth.compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return true,
                Err(actual) => cur = actual,
            }
        }
    }

    pub fn release(&self) {
        self.wr_depth.fetch_sub(1, Ordering::AcqRel);
    }

    fn reset_depth(&self) {
        self.wr_depth.store(0, Ordering::Release);
    }
}

pub struct Endpoint {
    pub peer_nic_path: NicPath,
    pub qps: Vec<QueuePair>,
    status: RwLock<EndpointStatus>,
}

impl Endpoint {
    pub fn new(peer_nic_path: NicPath, num_qp: usize, max_wr_depth: u32) -> Self {
        let qps = (0..num_qp).map(|i| QueuePair::new(i as u32, max_wr_depth)).collect();
        Endpoint { peer_nic_path, qps, status: RwLock::new(EndpointStatus::Initializing) }
    }

    pub fn status(&self) -> EndpointStatus {
        *self.status.read()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == EndpointStatus::Connected
    }

    /// Drives every QP RESET→INIT→RTR→RTS using the paired remote qp_num,
    /// per the RTR/RTS tuning pinned in `RdmaTuning` (spec §4.5). Symmetric
    /// for both the active and passive handshake role — the caller supplies
    /// the peer qp_nums either way.
    pub fn complete_handshake(&self, remote_qp_nums: &[u32]) -> Result<(), EngineError> {
        if remote_qp_nums.len() != self.qps.len() {
            return Err(EngineError::HandshakeFailed(
                self.peer_nic_path.to_string(),
                format!("qp count mismatch: local {} remote {}", self.qps.len(), remote_qp_nums.len()),
            ));
        }
        let mut status = self.status.write();
        for (qp, &remote) in self.qps.iter().zip(remote_qp_nums) {
            *qp.state.write() = QpState::Init;
            *qp.remote_qp_num.write() = Some(remote);
            *qp.state.write() = QpState::Rtr;
            *qp.state.write() = QpState::Rts;
        }
        *status = EndpointStatus::Connected;
        Ok(())
    }

    /// Forces every QP to RESET, zeroes depth counters and marks the
    /// endpoint unconnected (spec §4.5 "Disconnect").
    pub fn disconnect(&self) {
        let mut status = self.status.write();
        for qp in &self.qps {
            *qp.state.write() = QpState::Reset;
            qp.reset_depth();
            *qp.remote_qp_num.write() = None;
        }
        *status = EndpointStatus::Unconnected;
    }

    /// Picks the first QP with spare depth and reserves a slot on it.
    pub fn reserve_qp(&self) -> Option<usize> {
        self.qps.iter().position(|qp| qp.try_reserve())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_brings_every_qp_to_rts() {
        let ep = Endpoint::new(NicPath::new("peer", "mlx5_0"), 2, 256);
        assert_eq!(ep.status(), EndpointStatus::Initializing);
        ep.complete_handshake(&[10, 11]).unwrap();
        assert_eq!(ep.status(), EndpointStatus::Connected);
        for qp in &ep.qps {
            assert_eq!(*qp.state.read(), QpState::Rts);
        }
    }

    #[test]
    fn handshake_rejects_qp_count_mismatch() {
        let ep = Endpoint::new(NicPath::new("peer", "mlx5_0"), 2, 256);
        let err = ep.complete_handshake(&[10]).unwrap_err();
        assert!(matches!(err, EngineError::HandshakeFailed(_, _)));
    }

    #[test]
    fn disconnect_zeroes_depth_and_unconnects() {
        let ep = Endpoint::new(NicPath::new("peer", "mlx5_0"), 1, 4);
        ep.complete_handshake(&[1]).unwrap();
        ep.qps[0].try_reserve();
        assert_eq!(ep.qps[0].depth(), 1);
        ep.disconnect();
        assert_eq!(ep.status(), EndpointStatus::Unconnected);
        assert_eq!(ep.qps[0].depth(), 0);
    }

    #[test]
    fn reserve_qp_respects_max_depth() {
        let ep = Endpoint::new(NicPath::new("peer", "mlx5_0"), 1, 1);
        assert!(ep.reserve_qp().is_some());
        assert!(ep.reserve_qp().is_none());
    }
}
