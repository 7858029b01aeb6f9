//! 代理状态定义
//!
//! AgentState 由 AgentController 独占持有；其余组件只能通过 watch 通道读取。

use std::fmt;

use serde::Serialize;

/// 代理状态：空闲 / 巡逻 / 响应 / 告警
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Patrolling,
    Responding,
    Alert,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Patrolling => "patrolling",
            AgentState::Responding => "responding",
            AgentState::Alert => "alert",
        }
    }

    /// 该状态下后台例程（巡逻循环 + 任务管理器）是否应处于运行中
    pub fn is_active(&self) -> bool {
        !matches!(self, AgentState::Idle)
    }
}

impl Default for AgentState {
    fn default() -> Self {
        AgentState::Idle
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
