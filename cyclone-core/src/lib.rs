//! Shared wire codec, queues and comm endpoints for the Cyclone task-dispatch
//! system (spec §3/§4). Used by both `cyclone-master` and
//! `cyclone-controller`; depended on by nothing outside this workspace.

pub mod comm;
pub mod error;
pub mod generator;
pub mod msg;
pub mod pidfile;
pub mod queue;
pub mod task;
pub mod worker_table;

/// Commonly needed imports, mirroring the teacher's `roboplc::prelude`.
pub mod prelude {
    pub use crate::comm::{ControllerEndpoint, MasterEndpoint};
    pub use crate::error::{Error, Result};
    pub use crate::generator::{GeneratorContext, Registry, ShutdownSignal, TaskGenerator};
    pub use crate::msg::Message;
    pub use crate::queue::Queue;
    pub use crate::task::{
        EncodedTask, Task, TaskDecoder, TaskDecoderTable, TaskId, TaskState, TaskStatusItem,
        TaskStatusTable,
    };
    pub use crate::worker_table::{WorkerSlot, WorkerState, WorkerTable};
}
