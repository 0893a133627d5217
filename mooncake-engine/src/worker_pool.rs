//! Worker Pool (spec §4.6): sharded submission queues drained by
//! `workers_per_ctx` posting+polling tasks, plus failure retry. The post
//! path here is synchronous (the simulated verbs device completes a slice
//! inline rather than through an async CQ), so posting and polling collapse
//! into a single step per work item instead of two passes over the queue —
//! the sharding, ownership and retry logic are otherwise as specified.

use crate::context::Context;
use crate::endpoint_store::EndpointStore;
use crate::slice::{Opcode, SliceStatus};
use async_trait::async_trait;
use mooncake_common::{EngineError, EngineConfig, NicPath, LOCAL_SEGMENT_ID};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

pub const SHARD_COUNT: usize = 8;

pub fn shard_index(target_id: u64, remote_device_id: usize) -> usize {
    ((target_id.wrapping_mul(10007)).wrapping_add(remote_device_id as u64) % SHARD_COUNT as u64) as usize
}

/// A queued RDMA operation, already fully resolved (local/remote NIC picked,
/// keys attached) by the Transport Front-End before it ever reaches the
/// pool.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub batch_id: u64,
    pub task_index: usize,
    pub slice_index: usize,
    pub source_addr: u64,
    pub length: u64,
    pub opcode: Opcode,
    pub target_id: u64,
    pub dest_addr: u64,
    pub source_lkey: u32,
    pub dest_rkey: u32,
    pub location_tag: String,
    pub remote_device_id: usize,
    pub peer_nic_path: NicPath,
    pub retry_cnt: u32,
    pub max_retry_cnt: u32,
}

impl WorkItem {
    fn shard(&self) -> usize {
        shard_index(self.target_id, self.remote_device_id)
    }
}

/// Reports a terminal or in-progress slice outcome back into the owning
/// Task's storage. Implemented by the Transport Front-End.
#[async_trait]
pub trait TaskSink: Send + Sync {
    async fn record_slice_outcome(&self, batch_id: u64, task_index: usize, slice_index: usize, status: SliceStatus);
}

/// Re-runs remote NIC selection with an advanced retry count (spec §4.6
/// "processFailedSlice"): force-refreshes the peer Segment and returns the
/// new peer NIC path, device index and rkey to retry with.
#[async_trait]
pub trait RemoteResolver: Send + Sync {
    async fn reresolve(&self, item: &WorkItem) -> Result<(NicPath, usize, u32), EngineError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FabricEvent {
    DeviceFatal,
    PortErr,
    LidChange,
    PortActive,
}

type Shard = AsyncMutex<HashMap<NicPath, VecDeque<WorkItem>>>;

pub struct WorkerPool {
    config: EngineConfig,
    context: Arc<Context>,
    shards: Vec<Shard>,
    sink: Arc<dyn TaskSink>,
    resolver: Arc<dyn RemoteResolver>,
    active: std::sync::atomic::AtomicBool,
}

impl WorkerPool {
    pub fn new(
        config: EngineConfig,
        context: Arc<Context>,
        sink: Arc<dyn TaskSink>,
        resolver: Arc<dyn RemoteResolver>,
    ) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| AsyncMutex::new(HashMap::new())).collect();
        WorkerPool { config, context, shards, sink, resolver, active: std::sync::atomic::AtomicBool::new(true) }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Monitor-thread logic (spec §4.6): a real deployment drives this from
    /// an epoll loop over the async-event fd. Device-fatal / port-err /
    /// lid-change events take the context offline; port-active brings it
    /// back.
    pub fn handle_fabric_event(&self, event: FabricEvent) {
        match event {
            FabricEvent::DeviceFatal | FabricEvent::PortErr | FabricEvent::LidChange => {
                warn!(?event, "context going inactive on fabric event");
                self.active.store(false, std::sync::atomic::Ordering::Release);
            }
            FabricEvent::PortActive => {
                self.active.store(true, std::sync::atomic::Ordering::Release);
            }
        }
    }

    /// Groups items by shard and appends each group under its shard's lock
    /// (spec §4.6 "submitPostSend groups slices by shard, locks each shard
    /// once, appends").
    pub async fn submit(&self, items: Vec<WorkItem>) {
        metrics::counter!("mooncake_slices_submitted_total", items.len() as u64);
        let mut by_shard: HashMap<usize, Vec<WorkItem>> = HashMap::new();
        for item in items {
            by_shard.entry(item.shard()).or_default().push(item);
        }
        for (shard_id, group) in by_shard {
            let mut shard = self.shards[shard_id].lock().await;
            for item in group {
                shard.entry(item.peer_nic_path.clone()).or_default().push_back(item);
            }
        }
    }

    /// Drains every shard owned by `worker_id` (`shard_id % workers_per_ctx
    /// == worker_id`) and processes each peer group to completion.
    pub async fn run_once(&self, worker_id: usize) {
        let workers_per_ctx = self.config.workers_per_ctx.max(1);
        let mut collective: HashMap<NicPath, Vec<WorkItem>> = HashMap::new();
        for shard_id in (worker_id..SHARD_COUNT).step_by(workers_per_ctx) {
            let mut shard = self.shards[shard_id].lock().await;
            for (path, queue) in shard.iter_mut() {
                if queue.is_empty() {
                    continue;
                }
                collective.entry(path.clone()).or_default().extend(queue.drain(..));
            }
        }

        for (peer_nic_path, items) in collective {
            self.process_group(&peer_nic_path, items).await;
        }
        metrics::gauge!("mooncake_endpoint_store_size", self.context.endpoint_store.len() as f64);
    }

    async fn process_group(&self, peer_nic_path: &NicPath, items: Vec<WorkItem>) {
        let mut failed = Vec::new();
        for item in items {
            if item.target_id == LOCAL_SEGMENT_ID {
                self.complete_local_copy(&item).await;
                continue;
            }
            match self.post_and_complete(peer_nic_path, &item).await {
                Ok(()) => {
                    metrics::increment_counter!("mooncake_slices_completed_total", "status" => "success");
                    self.sink
                        .record_slice_outcome(item.batch_id, item.task_index, item.slice_index, SliceStatus::Success)
                        .await;
                }
                Err(_) => failed.push(item),
            }
        }
        for item in failed {
            self.process_failed_slice(item).await;
        }
    }

    async fn complete_local_copy(&self, item: &WorkItem) {
        let verbs = &self.context.verbs;
        let status = match (verbs.local_region(item.source_addr), verbs.local_region(item.dest_addr)) {
            (Some(src), Some(dst)) => {
                match verbs.rdma_op(item.opcode, &src, 0, &dst, 0, item.length) {
                    Ok(()) => SliceStatus::Success,
                    Err(_) => SliceStatus::Failed,
                }
            }
            _ => SliceStatus::Failed,
        };
        self.sink.record_slice_outcome(item.batch_id, item.task_index, item.slice_index, status).await;
    }

    /// Acquires the Endpoint for `peer_nic_path` via the Context's cache,
    /// opening and handshaking a fresh one on miss (spec §4.6 worker loop
    /// step 2: "acquire the Endpoint via the cache, opening if missing").
    /// There is no live peer process in this simulation to exchange real
    /// qp_nums with, so the handshake closure synthesizes a remote qp_num per
    /// local one — sufficient to drive the connection state machine to RTS.
    async fn post_and_complete(&self, peer_nic_path: &NicPath, item: &WorkItem) -> Result<(), EngineError> {
        let endpoint = self.context.get_or_connect_endpoint(
            peer_nic_path,
            self.config.num_qp_per_ep,
            self.config.max_wr_depth,
            |local_qp_nums| Ok(local_qp_nums.iter().map(|n| n.wrapping_add(1_000_000)).collect()),
        )?;
        let Some(qp_idx) = endpoint.reserve_qp() else {
            return Err(EngineError::Busy(format!("all QPs full for {peer_nic_path}")));
        };
        let verbs = &self.context.verbs;
        let local = verbs.local_region(item.source_addr).ok_or_else(|| {
            EngineError::FabricError(format!("no local region registered at {:#x}", item.source_addr))
        })?;
        let remote = verbs.local_region(item.dest_addr).ok_or_else(|| {
            EngineError::FabricError(format!("no remote-side region resolvable at {:#x}", item.dest_addr))
        })?;
        let result = verbs.rdma_op(item.opcode, &local, 0, &remote, 0, item.length);
        endpoint.qps[qp_idx].release();
        result
    }

    /// Failure retry (spec §4.6 "processFailedSlice"): terminal once
    /// `max_retry_cnt` is reached, otherwise re-resolve the remote NIC with
    /// an advanced retry count, evict the failing endpoint so the next
    /// attempt re-handshakes, and re-enqueue.
    async fn process_failed_slice(&self, mut item: WorkItem) {
        if item.retry_cnt >= item.max_retry_cnt {
            metrics::increment_counter!("mooncake_slices_completed_total", "status" => "failed");
            self.sink
                .record_slice_outcome(item.batch_id, item.task_index, item.slice_index, SliceStatus::Failed)
                .await;
            return;
        }
        self.context.endpoint_store.delete(&item.peer_nic_path);
        item.retry_cnt += 1;
        metrics::increment_counter!("mooncake_slice_retries_total");
        match self.resolver.reresolve(&item).await {
            Ok((new_path, device_id, rkey)) => {
                debug!(retry_cnt = item.retry_cnt, %new_path, "retrying slice on alternate NIC");
                item.peer_nic_path = new_path;
                item.remote_device_id = device_id;
                item.dest_rkey = rkey;
                self.submit(vec![item]).await;
            }
            Err(_) => {
                metrics::increment_counter!("mooncake_slices_completed_total", "status" => "failed");
                self.sink
                    .record_slice_outcome(item.batch_id, item.task_index, item.slice_index, SliceStatus::Failed)
                    .await;
            }
        }
    }
}
