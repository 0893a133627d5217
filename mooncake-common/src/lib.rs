//! Shared types for the Mooncake transfer engine workspace: wire data model
//! (`segment`), the endpoint connection key (`nic_path`), the error taxonomy
//! and configuration (`error`, `config`).

pub mod config;
pub mod error;
pub mod nic_path;
pub mod segment;

pub use config::{EndpointPolicy, EngineConfig, RdmaTuning};
pub use error::{EngineError, Result};
pub use nic_path::NicPath;
pub use segment::{Buffer, Device, MemoryRegion, NicPreference, PriorityMatrix, Segment, LOCAL_SEGMENT_ID};
