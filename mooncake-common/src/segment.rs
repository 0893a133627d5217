//! Data model shared between the metadata client and the engine: §3 of the
//! spec this crate implements — `Segment`, `Buffer`, `Device`, the priority
//! matrix, and locally registered memory regions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const LOCAL_SEGMENT_ID: u64 = 0;

/// `{ name, lid, gid }`. The GID is kept as raw bytes and rendered as
/// colon-separated hex only at the wire boundary (`gid_hex`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub name: String,
    pub lid: u16,
    pub gid: [u8; 16],
}

impl Device {
    pub fn gid_hex(&self) -> String {
        self.gid
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":")
    }
}

/// One remotely-registered memory range, with per-device lkey/rkey tables.
///
/// Invariant: `per_device_lkey.len() == per_device_rkey.len() == devices.len()`
/// of the owning `Segment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buffer {
    pub base_addr: u64,
    pub length: u64,
    pub per_device_lkey: Vec<u32>,
    pub per_device_rkey: Vec<u32>,
}

impl Buffer {
    pub fn contains(&self, addr: u64, length: u64) -> bool {
        let Some(end) = addr.checked_add(length) else {
            return false;
        };
        addr >= self.base_addr && end <= self.base_addr + self.length
    }
}

/// Ordered (preferred, fallback) NIC index lists for one location tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicPreference {
    pub preferred: Vec<usize>,
    pub fallback: Vec<usize>,
}

/// Mapping from a memory-location tag (e.g. `"cpu:0"`) to ordered NIC lists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityMatrix(pub HashMap<String, NicPreference>);

impl PriorityMatrix {
    pub fn get(&self, location_tag: &str) -> Option<&NicPreference> {
        self.0.get(location_tag)
    }
}

/// A named remote memory domain, as published to/fetched from the metadata
/// service. `segment_id` is process-local: only stable for the lifetime of
/// the process that resolved it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub segment_id: u64,
    pub name: String,
    pub buffers: Vec<Buffer>,
    pub devices: Vec<Device>,
    pub priority_matrix: PriorityMatrix,
}

impl Segment {
    /// Locates the buffer fully containing `[addr, addr+length)`, per §4.3(b).
    pub fn find_buffer(&self, addr: u64, length: u64) -> Option<(usize, &Buffer)> {
        self.buffers
            .iter()
            .enumerate()
            .find(|(_, b)| b.contains(addr, length))
    }
}

/// A locally registered memory region. Invariant: the set of registered
/// regions for a given Context is pairwise non-overlapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub addr: u64,
    pub length: u64,
    pub location_tag: String,
    pub remote_accessible: bool,
}

impl MemoryRegion {
    pub fn overlaps(&self, other: &MemoryRegion) -> bool {
        let a_end = self.addr + self.length;
        let b_end = other.addr + other.length;
        self.addr < b_end && other.addr < a_end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_contains_checks_both_ends() {
        let buf = Buffer {
            base_addr: 1000,
            length: 100,
            per_device_lkey: vec![1],
            per_device_rkey: vec![2],
        };
        assert!(buf.contains(1000, 100));
        assert!(buf.contains(1010, 10));
        assert!(!buf.contains(999, 100));
        assert!(!buf.contains(1050, 51));
    }

    #[test]
    fn memory_regions_detect_overlap() {
        let a = MemoryRegion { addr: 0, length: 100, location_tag: "cpu:0".into(), remote_accessible: true };
        let b = MemoryRegion { addr: 50, length: 100, location_tag: "cpu:0".into(), remote_accessible: true };
        let c = MemoryRegion { addr: 100, length: 100, location_tag: "cpu:0".into(), remote_accessible: true };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
