//! 任务执行引擎
//!
//! 任务/步骤模型、写穿持久化的任务存储与串行步骤执行器。

mod executor;
mod store;
mod task;

pub use executor::{EngineConfig, TaskEngine};
pub use store::TaskStore;
pub use task::{Step, StepAction, StepSpec, Task, TaskStatus};
