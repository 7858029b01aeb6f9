//! Agent 错误类型
//!
//! Action 层的失败不会以 panic / Err 形式穿出 `execute`，而是装进 `ActionResult.error` 作为数据返回；
//! 因此 AgentError 需要 Clone。

use thiserror::Error;

/// 编排过程中可能出现的错误（未初始化、未注册、初始化失败、执行失败、超时、取消、配置）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Action '{0}' not initialized")]
    NotInitialized(String),

    #[error("Action '{0}' not registered")]
    NotRegistered(String),

    #[error("Failed to initialize action '{name}': {reason}")]
    Initialization { name: String, reason: String },

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 错误种类的短名（写入日志 / 结果 metadata）
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::NotInitialized(_) => "not_initialized",
            AgentError::NotRegistered(_) => "not_registered",
            AgentError::Initialization { .. } => "initialization",
            AgentError::Execution(_) => "execution",
            AgentError::Timeout(_) => "timeout",
            AgentError::Cancelled(_) => "cancelled",
            AgentError::Config(_) => "config",
        }
    }

    pub fn initialization(name: impl Into<String>, reason: impl Into<String>) -> Self {
        AgentError::Initialization {
            name: name.into(),
            reason: reason.into(),
        }
    }
}
