//! 直接工具
//!
//! 任务步骤中不走服务连接器的部分由工具执行：Tool trait 按名注册到 ToolRegistry，
//! ToolExecutor 加超时并统一转 ElchError。

mod echo;
mod executor;
mod registry;

pub use echo::EchoTool;
pub use executor::ToolExecutor;
pub use registry::{Tool, ToolRegistry};
