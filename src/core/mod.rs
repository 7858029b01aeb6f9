//! 核心编排层：错误、状态、共享上下文、控制器状态机、巡逻循环、任务管理、优雅关闭

pub mod builder;
pub mod context;
pub mod controller;
pub mod error;
pub mod events;
pub mod patrol;
pub mod shutdown;
pub mod state;
pub mod task_manager;

pub use builder::AgentBuilder;
pub use context::SharedContext;
pub use controller::AgentController;
pub use error::AgentError;
pub use events::AgentEvent;
pub use patrol::PatrolScheduler;
pub use shutdown::{ControllerCleanup, ShutdownCoordinator, ShutdownManager, ShutdownReason};
pub use state::AgentState;
pub use task_manager::{Task, TaskId, TaskInfo, TaskManager, TaskSnapshot, TaskStatus};
