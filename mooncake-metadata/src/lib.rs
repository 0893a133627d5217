//! Client-side metadata plane (spec §6): the segment/NIC directory
//! consumed interface, its single-flight cache, and the connection
//! handshake wire codec.

pub mod cache;
pub mod directory;
pub mod handshake;

#[cfg(feature = "etcd")]
pub mod etcd;

pub use cache::SegmentDescriptorCache;
pub use directory::{InMemorySegmentDirectory, SegmentDirectory};
pub use handshake::{connect_and_handshake, listen_and_respond, read_frame, write_frame, HandshakeDesc, QpExchange};

#[cfg(feature = "etcd")]
pub use etcd::EtcdSegmentDirectory;
