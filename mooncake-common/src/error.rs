//! Error taxonomy from spec §7. Submit-time errors surface on return;
//! worker-observed faults never propagate as exceptions — they feed the
//! retry state machine in `mooncake-engine` instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("no local NIC available for location {0}")]
    NoLocalNic(String),

    #[error("no remote NIC available for target {0}")]
    NoRemoteNic(u64),

    #[error("slice range [{addr:#x}, {addr:#x}+{length:#x}) not contained in any registered buffer")]
    BadRange { addr: u64, length: u64 },

    #[error("handshake with {0} failed: {1}")]
    HandshakeFailed(String, String),

    #[error("fabric error: {0}")]
    FabricError(String),

    #[error("context for NIC {0} is inactive")]
    ContextInactive(String),

    #[error("operation requires a terminal state that has not been reached: {0}")]
    Busy(String),

    #[error("metadata service error: {0}")]
    Metadata(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
