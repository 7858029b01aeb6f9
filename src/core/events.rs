//! 代理生命周期事件：状态切换、紧急情况、任务结束
//!
//! 通过 broadcast 通道发布，供日志、UI 或测试订阅；发送失败（无订阅者）直接忽略。

use serde::Serialize;

use crate::core::state::AgentState;
use crate::core::task_manager::TaskStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// 状态切换
    StateChanged { from: AgentState, to: AgentState },
    /// 巡逻中检测到紧急情况
    EmergencyDetected { description: String },
    /// 告警期间某个 Action 执行失败（不影响状态流转）
    ActionFailed { action: String, reason: String },
    /// 任务进入终态
    TaskFinished { task_id: String, status: TaskStatus },
}
