//! Local and remote NIC selection (spec §4.3). Pure functions over the
//! priority matrix and device tables — no I/O, so trivially unit-testable.

use mooncake_common::{EngineError, PriorityMatrix, Segment};

/// A local NIC, as far as selection cares: its position in the owning
/// transport's device list and whether its Context currently reports
/// `active`.
pub struct LocalNicCandidate {
    pub index: usize,
    pub active: bool,
}

fn hash_tie_break(batch_id: u64, slice_index: usize, modulus: usize) -> usize {
    if modulus == 0 {
        return 0;
    }
    let mut h = batch_id.wrapping_mul(0x9E3779B97F4A7C15);
    h ^= slice_index as u64;
    h = h.wrapping_mul(0xBF58476D1CE4E5B9);
    (h % modulus as u64) as usize
}

/// Local NIC selection: preferred list first, fallback second, skipping any
/// NIC whose Context is inactive. Ties within a list are broken by a hash of
/// `(batch_id, slice_index)` so load spreads across equally-ranked NICs.
pub fn select_local_nic(
    matrix: &PriorityMatrix,
    location_tag: &str,
    candidates: &[LocalNicCandidate],
    batch_id: u64,
    slice_index: usize,
) -> Result<usize, EngineError> {
    let pref = matrix
        .get(location_tag)
        .ok_or_else(|| EngineError::NoLocalNic(location_tag.to_string()))?;

    for list in [&pref.preferred, &pref.fallback] {
        let active: Vec<usize> = list
            .iter()
            .copied()
            .filter(|&idx| candidates.get(idx).is_some_and(|c| c.active))
            .collect();
        if !active.is_empty() {
            let pick = hash_tie_break(batch_id, slice_index, active.len());
            return Ok(active[pick]);
        }
    }
    Err(EngineError::NoLocalNic(location_tag.to_string()))
}

/// Remote NIC selection (spec §4.3.b): locate the Buffer containing the
/// target range, look up the peer's priority-matrix entry for the buffer's
/// location tag (falling back to a flat candidate list over all its
/// devices when the peer has no matrix entry for that tag — the peer
/// segment advertises one tag per buffer at registration time), and walk
/// `retry_cnt` further into the candidate list so a retry lands on a
/// different device when one exists.
pub fn select_remote_nic(
    segment: &Segment,
    dest_addr: u64,
    length: u64,
    location_tag: &str,
    retry_cnt: u32,
) -> Result<(usize, usize), EngineError> {
    let (buffer_id, _buffer) = segment
        .find_buffer(dest_addr, length)
        .ok_or(EngineError::BadRange { addr: dest_addr, length })?;

    let candidates: Vec<usize> = match segment.priority_matrix.get(location_tag) {
        Some(pref) if !pref.preferred.is_empty() => pref.preferred.clone(),
        Some(pref) => pref.fallback.clone(),
        None => (0..segment.devices.len()).collect(),
    };
    if candidates.is_empty() {
        return Err(EngineError::NoRemoteNic(segment.segment_id));
    }
    let idx = (retry_cnt as usize) % candidates.len();
    Ok((buffer_id, candidates[idx]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mooncake_common::{Buffer, Device, NicPreference};
    use std::collections::HashMap;

    fn sample_segment() -> Segment {
        let mut matrix = HashMap::new();
        matrix.insert("cpu:0".to_string(), NicPreference { preferred: vec![0, 1], fallback: vec![] });
        Segment {
            segment_id: 42,
            name: "peer".into(),
            buffers: vec![Buffer { base_addr: 0x1000, length: 4096, per_device_lkey: vec![1, 2], per_device_rkey: vec![9, 10] }],
            devices: vec![
                Device { name: "mlx5_0".into(), lid: 1, gid: [0; 16] },
                Device { name: "mlx5_1".into(), lid: 2, gid: [0; 16] },
            ],
            priority_matrix: PriorityMatrix(matrix),
        }
    }

    #[test]
    fn local_selection_falls_back_when_preferred_inactive() {
        let mut matrix = HashMap::new();
        matrix.insert("cpu:0".to_string(), NicPreference { preferred: vec![0], fallback: vec![1] });
        let pm = PriorityMatrix(matrix);
        let candidates = vec![
            LocalNicCandidate { index: 0, active: false },
            LocalNicCandidate { index: 1, active: true },
        ];
        let picked = select_local_nic(&pm, "cpu:0", &candidates, 1, 0).unwrap();
        assert_eq!(picked, 1);
    }

    #[test]
    fn local_selection_fails_when_no_tag_entry() {
        let pm = PriorityMatrix::default();
        let candidates = vec![LocalNicCandidate { index: 0, active: true }];
        let err = select_local_nic(&pm, "cpu:9", &candidates, 0, 0).unwrap_err();
        assert!(matches!(err, EngineError::NoLocalNic(_)));
    }

    #[test]
    fn remote_selection_wraps_on_retry() {
        let segment = sample_segment();
        let (buf_a, dev_a) = select_remote_nic(&segment, 0x1000, 100, "cpu:0", 0).unwrap();
        let (buf_b, dev_b) = select_remote_nic(&segment, 0x1000, 100, "cpu:0", 1).unwrap();
        assert_eq!(buf_a, buf_b);
        assert_ne!(dev_a, dev_b);
        let (_, dev_wrapped) = select_remote_nic(&segment, 0x1000, 100, "cpu:0", 2).unwrap();
        assert_eq!(dev_wrapped, dev_a);
    }

    #[test]
    fn remote_selection_rejects_uncontained_range() {
        let segment = sample_segment();
        let err = select_remote_nic(&segment, 0x5000, 100, "cpu:0", 0).unwrap_err();
        assert!(matches!(err, EngineError::BadRange { .. }));
    }
}
