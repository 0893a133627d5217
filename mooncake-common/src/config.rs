//! Configuration keys from spec §6, deserializable from the JSON `args` blob
//! the Transport Front-End's `install` receives, or loadable from environment
//! variables by `mooncake-node`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointPolicy {
    Fifo,
    Sieve,
}

impl Default for EndpointPolicy {
    fn default() -> Self {
        EndpointPolicy::Sieve
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub workers_per_ctx: usize,
    pub num_qp_per_ep: usize,
    pub max_sge_per_wr: usize,
    pub max_wr_depth: u32,
    pub max_inline: usize,
    pub slice_size: u64,
    pub endpoint_cache_capacity: usize,
    pub max_retry_cnt: u32,
    pub fragment_limit: u64,
    pub endpoint_policy: EndpointPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            workers_per_ctx: 4,
            num_qp_per_ep: 2,
            max_sge_per_wr: 4,
            max_wr_depth: 256,
            max_inline: 64,
            slice_size: 64 * 1024,
            endpoint_cache_capacity: 256,
            max_retry_cnt: 8,
            fragment_limit: u64::MAX,
            endpoint_policy: EndpointPolicy::Sieve,
        }
    }
}

/// RDMA wire parameters pinned at RTR/RTS (§4.5). Not user-configurable —
/// tuned for RoCEv2 on modern NICs.
pub struct RdmaTuning;

impl RdmaTuning {
    pub const PATH_MTU: u32 = 4096;
    pub const HOP_LIMIT: u8 = 16;
    pub const TIMEOUT: u8 = 14;
    pub const RETRY_CNT: u8 = 7;
    pub const RNR_RETRY: u8 = 7;
    pub const MAX_RD_ATOMIC: u8 = 16;
    pub const MIN_RNR_TIMER: u8 = 12;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.workers_per_ctx, 4);
        assert_eq!(cfg.num_qp_per_ep, 2);
        assert_eq!(cfg.slice_size, 64 * 1024);
        assert_eq!(cfg.endpoint_cache_capacity, 256);
        assert_eq!(cfg.max_retry_cnt, 8);
        assert_eq!(cfg.endpoint_policy, EndpointPolicy::Sieve);
    }

    #[test]
    fn deserializes_from_json_with_partial_overrides() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"workers_per_ctx": 8, "endpoint_policy": "fifo"}"#).unwrap();
        assert_eq!(cfg.workers_per_ctx, 8);
        assert_eq!(cfg.endpoint_policy, EndpointPolicy::Fifo);
        assert_eq!(cfg.slice_size, 64 * 1024);
    }
}
