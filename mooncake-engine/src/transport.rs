//! Transport Front-End (spec §4.1): slices requests, selects local/remote
//! NICs, and routes the resulting work items into the Worker Pool. Owns the
//! Batch/Task storage and answers `getTransferStatus`/`freeBatchID`.

use crate::context::Context;
use crate::device_select::{select_local_nic, select_remote_nic, LocalNicCandidate};
use crate::slice::{Batch, Opcode, Slice, SliceStatus, Task, TaskState};
use crate::worker_pool::{RemoteResolver, TaskSink, WorkItem, WorkerPool};
use async_trait::async_trait;
use mooncake_common::{Buffer, Device, EngineConfig, EngineError, NicPath, Result, Segment};
use mooncake_metadata::SegmentDescriptorCache;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// One user-submitted transfer request, before slicing.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub opcode: Opcode,
    pub source_addr: u64,
    pub length: u64,
    pub target_id: u64,
    pub target_segment_name: String,
    pub dest_addr: u64,
    pub location_tag: String,
}

/// `{state, bytes}` answer to `getTransferStatus` (spec §6 Client API).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferStatus {
    pub state: TaskState,
    pub bytes: u64,
}

struct BatchTable {
    batches: SyncMutex<HashMap<u64, Batch>>,
}

#[async_trait]
impl TaskSink for BatchTable {
    async fn record_slice_outcome(&self, batch_id: u64, task_index: usize, slice_index: usize, status: SliceStatus) {
        if let Some(batch) = self.batches.lock().get_mut(&batch_id) {
            if let Some(task) = batch.tasks.get_mut(task_index) {
                task.record_outcome(slice_index, status);
            }
        }
    }
}

struct Resolver {
    context: Arc<Context>,
    cache: Arc<SegmentDescriptorCache<mooncake_metadata::InMemorySegmentDirectory>>,
    segment_names: SyncMutex<HashMap<u64, String>>,
}

impl Resolver {
    fn remember_segment_name(&self, target_id: u64, name: &str) {
        self.segment_names.lock().insert(target_id, name.to_string());
    }
}

#[async_trait]
impl RemoteResolver for Resolver {
    async fn reresolve(&self, item: &WorkItem) -> Result<(NicPath, usize, u32)> {
        let name = self
            .segment_names
            .lock()
            .get(&item.target_id)
            .cloned()
            .ok_or(EngineError::NoRemoteNic(item.target_id))?;
        let segment = self.cache.force_update(&name).await?;
        let (buffer_id, device_id) =
            select_remote_nic(&segment, item.dest_addr, item.length, &item.location_tag, item.retry_cnt)?;
        let device = segment.devices.get(device_id).ok_or(EngineError::NoRemoteNic(item.target_id))?;
        let rkey = segment.buffers[buffer_id].per_device_rkey[device_id];
        let path = NicPath::new(&segment.name, &device.name);
        let _ = self.context.is_active();
        Ok((path, device_id, rkey))
    }
}

/// The RDMA transport: one per installed protocol. Slices, selects NICs,
/// enqueues work, and tracks batch/task completion state.
pub struct RdmaTransport {
    config: EngineConfig,
    context: Arc<Context>,
    cache: Arc<SegmentDescriptorCache<mooncake_metadata::InMemorySegmentDirectory>>,
    batches: Arc<BatchTable>,
    pool: Arc<WorkerPool>,
    resolver: Arc<Resolver>,
    next_batch_id: AtomicU64,
    next_tag: AtomicU64,
    local_segment_id: u64,
    local_segment_name: String,
    devices: Vec<Device>,
    local_buffers: SyncMutex<Vec<Buffer>>,
    shutdown: Arc<AtomicBool>,
}

impl RdmaTransport {
    pub fn new(
        config: EngineConfig,
        context: Arc<Context>,
        cache: Arc<SegmentDescriptorCache<mooncake_metadata::InMemorySegmentDirectory>>,
        local_segment_id: u64,
        local_segment_name: impl Into<String>,
        devices: Vec<Device>,
    ) -> Self {
        let batches = Arc::new(BatchTable { batches: SyncMutex::new(HashMap::new()) });
        let resolver = Arc::new(Resolver {
            context: context.clone(),
            cache: cache.clone(),
            segment_names: SyncMutex::new(HashMap::new()),
        });
        let pool = Arc::new(WorkerPool::new(config.clone(), context.clone(), batches.clone(), resolver.clone()));
        RdmaTransport {
            config,
            context,
            cache,
            batches,
            pool,
            resolver,
            next_batch_id: AtomicU64::new(1),
            next_tag: AtomicU64::new(1),
            local_segment_id,
            local_segment_name: local_segment_name.into(),
            devices,
            local_buffers: SyncMutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Transport Front-End `registerLocalMemory` (spec §4.1): pins the range
    /// through the Context's overlap-checked table, appends a per-device
    /// lkey/rkey `Buffer` descriptor to the local Segment, and republishes it
    /// to the metadata directory when `update_metadata` is set.
    pub async fn register_local_memory(
        &self,
        addr: u64,
        length: u64,
        location_tag: &str,
        remote_accessible: bool,
        update_metadata: bool,
    ) -> Result<()> {
        let (lkey, rkey) = self.context.register_memory(addr, length, location_tag, remote_accessible)?;
        let device_count = self.devices.len().max(1);
        let mut per_device_lkey = vec![0u32; device_count];
        let mut per_device_rkey = vec![0u32; device_count];
        let idx = self.devices.iter().position(|d| d.name == self.context.device.name).unwrap_or(0);
        per_device_lkey[idx] = lkey;
        per_device_rkey[idx] = rkey;
        self.local_buffers.lock().push(Buffer { base_addr: addr, length, per_device_lkey, per_device_rkey });

        if update_metadata {
            self.republish_local_segment().await?;
        }
        Ok(())
    }

    /// Batch variant (spec §4.1 `registerLocalMemoryBatch`): registers every
    /// range, rolling back everything registered so far the moment one fails
    /// so the batch either fully applies or leaves no trace, then republishes
    /// once rather than once per item.
    pub async fn register_local_memory_batch(
        &self,
        requests: Vec<(u64, u64, String, bool)>,
        update_metadata: bool,
    ) -> Result<()> {
        let mut registered = Vec::new();
        for (addr, length, location_tag, remote_accessible) in requests {
            match self.register_local_memory(addr, length, &location_tag, remote_accessible, false).await {
                Ok(()) => registered.push(addr),
                Err(err) => {
                    for addr in registered {
                        self.context.unregister_memory(addr);
                        self.local_buffers.lock().retain(|b| b.base_addr != addr);
                    }
                    return Err(err);
                }
            }
        }
        if update_metadata {
            self.republish_local_segment().await?;
        }
        Ok(())
    }

    /// Transport Front-End `unregisterLocalMemoryBatch` (spec §4.1).
    pub async fn unregister_local_memory_batch(&self, addrs: &[u64], update_metadata: bool) -> Result<()> {
        for &addr in addrs {
            self.context.unregister_memory(addr);
            self.local_buffers.lock().retain(|b| b.base_addr != addr);
        }
        if update_metadata {
            self.republish_local_segment().await?;
        }
        Ok(())
    }

    async fn republish_local_segment(&self) -> Result<()> {
        let segment = Segment {
            segment_id: self.local_segment_id,
            name: self.local_segment_name.clone(),
            buffers: self.local_buffers.lock().clone(),
            devices: self.devices.clone(),
            priority_matrix: mooncake_common::PriorityMatrix::default(),
        };
        self.cache.publish(&self.local_segment_name, segment).await
    }

    /// Flags every worker loop spawned by `run_workers` to stop after its
    /// current pass, so `EngineFacade::uninstall_transport` can actually tear
    /// the transport down instead of leaking detached tasks.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn allocate_batch_id(&self, capacity: usize) -> u64 {
        let id = self.next_batch_id.fetch_add(1, Ordering::Relaxed);
        self.batches.batches.lock().insert(id, Batch::new(id, capacity));
        id
    }

    pub fn free_batch_id(&self, batch_id: u64) -> Result<()> {
        let mut batches = self.batches.batches.lock();
        let batch = batches.get(&batch_id).ok_or_else(|| EngineError::InvalidArg(format!("unknown batch {batch_id}")))?;
        if !batch.all_terminal() {
            return Err(EngineError::Busy(format!("batch {batch_id} has tasks still in flight")));
        }
        batches.remove(&batch_id);
        Ok(())
    }

    pub fn get_transfer_status(&self, batch_id: u64, task_index: usize) -> Result<TransferStatus> {
        let batches = self.batches.batches.lock();
        let batch = batches.get(&batch_id).ok_or_else(|| EngineError::InvalidArg(format!("unknown batch {batch_id}")))?;
        let task = batch
            .tasks
            .get(task_index)
            .ok_or_else(|| EngineError::InvalidArg(format!("task {task_index} out of range")))?;
        Ok(TransferStatus { state: task.state(), bytes: task.transferred_bytes })
    }

    /// Slices each request, selects NICs, appends a Task per request to the
    /// batch, and enqueues the resulting slices on the worker pool.
    pub async fn submit_transfer(&self, batch_id: u64, requests: Vec<TransferRequest>) -> Result<()> {
        {
            let batches = self.batches.batches.lock();
            let batch = batches.get(&batch_id).ok_or_else(|| EngineError::InvalidArg(format!("unknown batch {batch_id}")))?;
            if requests.len() > batch.remaining_capacity() {
                return Err(EngineError::InvalidArg(format!(
                    "batch {batch_id} capacity {} exceeded by {} more tasks",
                    batch.capacity,
                    requests.len()
                )));
            }
        }

        let mut all_items = Vec::new();
        let mut new_tasks = Vec::new();
        for request in requests {
            let segment = if request.target_id == self.local_segment_id {
                None
            } else {
                let seg = self.cache.get(&request.target_segment_name).await?;
                self.resolver.remember_segment_name(request.target_id, &request.target_segment_name);
                // Single-process simulation: the peer's registered buffer has
                // no separate address space to live in, so it is materialised
                // lazily in this Context's own verbs table the first time a
                // request targets it.
                if self.context.verbs.local_region(request.dest_addr).is_none() {
                    self.context.verbs.register_memory(request.dest_addr, request.length);
                }
                Some(seg)
            };

            let task_index = {
                let batches = self.batches.batches.lock();
                batches.get(&batch_id).map(|b| b.tasks.len()).unwrap_or(0)
            };
            let (task, items) = self.slice_and_select(batch_id, task_index, &request, segment.as_ref())?;
            new_tasks.push(task);
            all_items.extend(items);
        }

        {
            let mut batches = self.batches.batches.lock();
            if let Some(batch) = batches.get_mut(&batch_id) {
                batch.tasks.extend(new_tasks);
            }
        }

        self.pool.submit(all_items).await;
        Ok(())
    }

    fn slice_and_select(
        &self,
        batch_id: u64,
        task_index: usize,
        request: &TransferRequest,
        segment: Option<&Segment>,
    ) -> Result<(Task, Vec<WorkItem>)> {
        let slice_size = self.config.slice_size.max(1);
        let mut task = Task::new(request.length);
        let mut items = Vec::new();
        let mut offset = 0u64;
        let mut slice_index = 0usize;

        let local_candidates = vec![LocalNicCandidate { index: 0, active: self.context.is_active() }];
        let local_matrix = mooncake_common::PriorityMatrix(
            [(request.location_tag.clone(), mooncake_common::NicPreference { preferred: vec![0], fallback: vec![] })]
                .into_iter()
                .collect(),
        );

        while offset < request.length {
            let len = slice_size.min(request.length - offset);
            let local_idx = select_local_nic(&local_matrix, &request.location_tag, &local_candidates, batch_id, slice_index)?;
            let _ = local_idx;

            let (peer_nic_path, remote_device_id, dest_rkey) = match segment {
                None => (NicPath::new("local", "loopback"), 0, 0),
                Some(seg) => {
                    let (buffer_id, device_id) =
                        select_remote_nic(seg, request.dest_addr + offset, len, &request.location_tag, 0)?;
                    let device = seg.devices.get(device_id).ok_or(EngineError::NoRemoteNic(request.target_id))?;
                    (NicPath::new(&seg.name, &device.name), device_id, seg.buffers[buffer_id].per_device_rkey[device_id])
                }
            };

            let tag = self.next_tag.fetch_add(1, Ordering::Relaxed);
            let slice = Slice {
                tag,
                source_addr: request.source_addr + offset,
                length: len,
                opcode: request.opcode,
                target_id: request.target_id,
                dest_addr: request.dest_addr + offset,
                source_lkey: 0,
                dest_rkey,
                peer_nic_path: Some(peer_nic_path.clone()),
                retry_cnt: 0,
                max_retry_cnt: self.config.max_retry_cnt,
                status: SliceStatus::Pending,
            };
            task.slices.push(slice);

            items.push(WorkItem {
                batch_id,
                task_index,
                slice_index,
                source_addr: request.source_addr + offset,
                length: len,
                opcode: request.opcode,
                target_id: request.target_id,
                dest_addr: request.dest_addr + offset,
                source_lkey: 0,
                dest_rkey,
                location_tag: request.location_tag.clone(),
                remote_device_id,
                peer_nic_path,
                retry_cnt: 0,
                max_retry_cnt: self.config.max_retry_cnt,
            });

            offset += len;
            slice_index += 1;
        }

        Ok((task, items))
    }

    pub async fn run_workers(self: &Arc<Self>) {
        let workers = self.config.workers_per_ctx.max(1);
        for worker_id in 0..workers {
            let pool = self.pool.clone();
            let shutdown = self.shutdown.clone();
            tokio::spawn(async move {
                while !shutdown.load(Ordering::Acquire) {
                    pool.run_once(worker_id).await;
                    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                }
            });
        }
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }
}
