//! Engine Facade (spec §4.7): installs/uninstalls transports by protocol
//! name, opens segments by delegating to the metadata directory, and
//! clears the segment-descriptor cache on demand.

use crate::context::Context;
use crate::endpoint_store;
use crate::transport::RdmaTransport;
use crate::verbs::VerbsDevice;
use mooncake_common::{Device, EngineConfig, EngineError, Result, Segment, LOCAL_SEGMENT_ID};
use mooncake_metadata::{InMemorySegmentDirectory, SegmentDescriptorCache, SegmentDirectory};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Installs exactly one transport per protocol name and keeps the
/// segment-descriptor cache and metadata directory it shares with every
/// installed transport.
pub struct EngineFacade {
    config: EngineConfig,
    directory: Arc<InMemorySegmentDirectory>,
    cache: Arc<SegmentDescriptorCache<InMemorySegmentDirectory>>,
    transports: RwLock<HashMap<String, Arc<RdmaTransport>>>,
    local_server_name: String,
}

impl EngineFacade {
    pub fn new(local_server_name: impl Into<String>, config: EngineConfig) -> Self {
        let directory = Arc::new(InMemorySegmentDirectory::new());
        EngineFacade {
            config,
            cache: Arc::new(SegmentDescriptorCache::new(directory.clone())),
            directory,
            transports: RwLock::new(HashMap::new()),
            local_server_name: local_server_name.into(),
        }
    }

    /// `installOrGetTransport`: dedups by protocol name, constructing and
    /// publishing a local Segment for the node only on first install.
    pub async fn install_or_get_transport(
        &self,
        proto: &str,
        devices: Vec<Device>,
        verbs: Arc<dyn VerbsDevice>,
    ) -> Result<Arc<RdmaTransport>> {
        if let Some(existing) = self.transports.read().get(proto) {
            return Ok(existing.clone());
        }
        let context = Arc::new(Context::new(
            devices.first().cloned().ok_or_else(|| EngineError::InvalidArg("install requires at least one device".into()))?,
            verbs,
            Arc::from(endpoint_store::build(self.config.endpoint_policy, self.config.endpoint_cache_capacity)),
        ));
        let transport = Arc::new(RdmaTransport::new(
            self.config.clone(),
            context,
            self.cache.clone(),
            LOCAL_SEGMENT_ID,
            self.local_server_name.clone(),
            devices.clone(),
        ));

        let local_segment = Segment {
            segment_id: LOCAL_SEGMENT_ID,
            name: self.local_server_name.clone(),
            buffers: Vec::new(),
            devices,
            priority_matrix: mooncake_common::PriorityMatrix::default(),
        };
        self.cache.publish(&self.local_server_name, local_segment).await?;

        self.transports.write().insert(proto.to_string(), transport.clone());
        Ok(transport)
    }

    /// `uninstallTransport`: signals the transport's worker loops to stop,
    /// then drops it, which drops its Context and every open endpoint.
    pub fn uninstall_transport(&self, proto: &str) -> Result<()> {
        let transport = self
            .transports
            .write()
            .remove(proto)
            .ok_or_else(|| EngineError::InvalidArg(format!("transport {proto} is not installed")))?;
        transport.shutdown();
        Ok(())
    }

    /// `openSegment(name)`: resolves and caches the named Segment, returning
    /// its process-local id.
    pub async fn open_segment(&self, name: &str) -> Result<u64> {
        let segment = self.cache.get(name).await?;
        Ok(segment.segment_id)
    }

    pub async fn publish_segment(&self, name: &str, segment: Segment) -> Result<()> {
        self.directory.put_segment_desc(name, segment).await
    }

    /// `syncSegmentCache()`: clears the cached peer Segment so the next
    /// access refetches.
    pub async fn sync_segment_cache(&self, name: &str) {
        self.cache.invalidate(name).await;
    }

    pub fn transport(&self, proto: &str) -> Option<Arc<RdmaTransport>> {
        self.transports.read().get(proto).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verbs::SimDevice;

    #[tokio::test]
    async fn installing_the_same_protocol_twice_is_idempotent() {
        let facade = EngineFacade::new("node-a", EngineConfig::default());
        let device = Device { name: "mlx5_0".into(), lid: 1, gid: [0; 16] };
        let verbs: Arc<dyn VerbsDevice> = Arc::new(SimDevice::new());
        let a = facade.install_or_get_transport("rdma", vec![device.clone()], verbs.clone()).await.unwrap();
        let b = facade.install_or_get_transport("rdma", vec![device], verbs).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn open_segment_resolves_a_published_segment() {
        let facade = EngineFacade::new("node-a", EngineConfig::default());
        facade
            .publish_segment(
                "node-b",
                Segment { segment_id: 77, name: "node-b".into(), buffers: vec![], devices: vec![], priority_matrix: mooncake_common::PriorityMatrix::default() },
            )
            .await
            .unwrap();
        let id = facade.open_segment("node-b").await.unwrap();
        assert_eq!(id, 77);
    }

    #[tokio::test]
    async fn uninstall_of_unknown_protocol_errors() {
        let facade = EngineFacade::new("node-a", EngineConfig::default());
        assert!(facade.uninstall_transport("rdma").is_err());
    }

    #[tokio::test]
    async fn uninstall_stops_the_removed_transport_s_workers() {
        let facade = EngineFacade::new("node-a", EngineConfig::default());
        let device = Device { name: "mlx5_0".into(), lid: 1, gid: [0; 16] };
        let verbs: Arc<dyn VerbsDevice> = Arc::new(SimDevice::new());
        let transport = facade.install_or_get_transport("rdma", vec![device], verbs).await.unwrap();
        assert!(!transport.is_shutdown());

        facade.uninstall_transport("rdma").unwrap();
        assert!(transport.is_shutdown());
        assert!(facade.transport("rdma").is_none());
    }
}
