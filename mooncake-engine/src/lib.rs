//! The RDMA transport's execution engine: per-NIC Contexts, the endpoint
//! cache, the slice/task/batch model, the sharded worker pool and the
//! transport front-end that ties them together.

pub mod context;
pub mod device_select;
pub mod endpoint;
pub mod endpoint_store;
pub mod facade;
pub mod slice;
pub mod transport;
pub mod verbs;
pub mod worker_pool;

pub use context::Context;
pub use endpoint::{Endpoint, EndpointStatus};
pub use facade::EngineFacade;
pub use slice::{Batch, Opcode, Slice, SliceStatus, Task, TaskState};
pub use transport::{RdmaTransport, TransferRequest, TransferStatus};
pub use verbs::{RegisteredRegion, SimDevice, VerbsDevice};
