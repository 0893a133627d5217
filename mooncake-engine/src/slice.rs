//! Unit-of-work data model (spec §3): Batch owns Tasks, Task owns Slices.
//! A Slice is borrowed by the in-flight work request via its `tag`, never
//! moved out of the owning Task's storage.

use mooncake_common::NicPath;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceStatus {
    Pending,
    Posted,
    Success,
    Timeout,
    Failed,
}

/// One posted RDMA op. `tag` is the 64-bit handle the work-request carries;
/// the Slice itself always lives inside its Task's `slices` vector.
#[derive(Debug, Clone)]
pub struct Slice {
    pub tag: u64,
    pub source_addr: u64,
    pub length: u64,
    pub opcode: Opcode,
    pub target_id: u64,
    pub dest_addr: u64,
    pub source_lkey: u32,
    pub dest_rkey: u32,
    pub peer_nic_path: Option<NicPath>,
    pub retry_cnt: u32,
    pub max_retry_cnt: u32,
    pub status: SliceStatus,
}

impl Slice {
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, SliceStatus::Success | SliceStatus::Timeout | SliceStatus::Failed)
    }
}

/// One user-level transfer request after slicing.
#[derive(Debug, Clone)]
pub struct Task {
    pub slices: Vec<Slice>,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    pub success_count: usize,
    pub failed_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Completed,
    Failed,
}

impl Task {
    pub fn new(total_bytes: u64) -> Self {
        Task { slices: Vec::new(), total_bytes, transferred_bytes: 0, success_count: 0, failed_count: 0 }
    }

    /// Invariant (spec §8.1): `success_count + failed_count <= len(slices)`.
    pub fn is_complete(&self) -> bool {
        self.success_count + self.failed_count == self.slices.len() && !self.slices.is_empty()
    }

    pub fn state(&self) -> TaskState {
        if !self.is_complete() {
            return TaskState::Pending;
        }
        if self.failed_count > 0 {
            TaskState::Failed
        } else {
            TaskState::Completed
        }
    }

    /// Applies a terminal slice outcome, recomputing the monotonic byte
    /// counter from scratch so it can never regress.
    pub fn record_outcome(&mut self, slice_idx: usize, status: SliceStatus) {
        debug_assert!(matches!(status, SliceStatus::Success | SliceStatus::Timeout | SliceStatus::Failed));
        self.slices[slice_idx].status = status;
        self.success_count = self.slices.iter().filter(|s| s.status == SliceStatus::Success).count();
        self.failed_count = self
            .slices
            .iter()
            .filter(|s| matches!(s.status, SliceStatus::Timeout | SliceStatus::Failed))
            .count();
        self.transferred_bytes = self
            .slices
            .iter()
            .filter(|s| s.status == SliceStatus::Success)
            .map(|s| s.length)
            .sum();
    }
}

/// A fixed-capacity collection of tasks allocated by one `submit_transfer`
/// caller (spec §4.1, `allocateBatchID`).
pub struct Batch {
    pub id: u64,
    pub capacity: usize,
    pub tasks: Vec<Task>,
}

impl Batch {
    pub fn new(id: u64, capacity: usize) -> Self {
        Batch { id, capacity, tasks: Vec::with_capacity(capacity) }
    }

    pub fn remaining_capacity(&self) -> usize {
        self.capacity - self.tasks.len()
    }

    pub fn all_terminal(&self) -> bool {
        self.tasks.iter().all(|t| t.is_complete())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_slice(status: SliceStatus, length: u64) -> Slice {
        Slice {
            tag: 0,
            source_addr: 0,
            length,
            opcode: Opcode::Write,
            target_id: 1,
            dest_addr: 0,
            source_lkey: 0,
            dest_rkey: 0,
            peer_nic_path: None,
            retry_cnt: 0,
            max_retry_cnt: 8,
            status,
        }
    }

    #[test]
    fn task_completes_once_every_slice_is_terminal() {
        let mut task = Task::new(200);
        task.slices.push(sample_slice(SliceStatus::Pending, 100));
        task.slices.push(sample_slice(SliceStatus::Pending, 100));
        assert!(!task.is_complete());

        task.record_outcome(0, SliceStatus::Success);
        assert!(!task.is_complete());
        assert_eq!(task.transferred_bytes, 100);

        task.record_outcome(1, SliceStatus::Success);
        assert!(task.is_complete());
        assert_eq!(task.state(), TaskState::Completed);
        assert_eq!(task.transferred_bytes, 200);
    }

    #[test]
    fn any_terminal_failure_marks_task_failed() {
        let mut task = Task::new(100);
        task.slices.push(sample_slice(SliceStatus::Pending, 100));
        task.record_outcome(0, SliceStatus::Failed);
        assert_eq!(task.state(), TaskState::Failed);
        assert_eq!(task.transferred_bytes, 0);
    }

    #[test]
    fn batch_tracks_remaining_capacity() {
        let mut batch = Batch::new(1, 2);
        assert_eq!(batch.remaining_capacity(), 2);
        batch.tasks.push(Task::new(10));
        assert_eq!(batch.remaining_capacity(), 1);
        assert!(!batch.all_terminal());
    }
}
