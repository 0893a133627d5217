//! The consumed interface to the metadata service (spec §6): an etcd-like
//! KV directory keyed by segment name. The real service is an external
//! collaborator; this crate only specifies and exercises the client side.

use async_trait::async_trait;
use mooncake_common::{EngineError, Result, Segment};
use parking_lot::RwLock;
use std::collections::HashMap;

#[async_trait]
pub trait SegmentDirectory: Send + Sync {
    async fn get_segment_desc(&self, name: &str) -> Result<Segment>;
    async fn put_segment_desc(&self, name: &str, desc: Segment) -> Result<()>;
    async fn remove_segment_desc(&self, name: &str) -> Result<()>;
}

/// Test/demo stand-in for the metadata service: an in-process KV store.
/// Sufficient to drive every scenario in spec §8 without a running etcd
/// cluster, matching the "external collaborator" framing of spec §1.
#[derive(Default)]
pub struct InMemorySegmentDirectory {
    segments: RwLock<HashMap<String, Segment>>,
}

impl InMemorySegmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SegmentDirectory for InMemorySegmentDirectory {
    async fn get_segment_desc(&self, name: &str) -> Result<Segment> {
        self.segments
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Metadata(format!("segment {name} not found")))
    }

    async fn put_segment_desc(&self, name: &str, desc: Segment) -> Result<()> {
        self.segments.write().insert(name.to_string(), desc);
        Ok(())
    }

    async fn remove_segment_desc(&self, name: &str) -> Result<()> {
        self.segments.write().remove(name);
        Ok(())
    }
}
