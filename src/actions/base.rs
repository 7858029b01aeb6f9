//! Action 契约：元信息、执行上下文、执行结果与 Action trait
//!
//! 所有能力（watch / speak / alert）实现 Action，由 ActionRegistry 按名注册与查找。
//! execute 从不返回 Err：失败装进 ActionResult.error。

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::core::{AgentError, AgentState, SharedContext};

/// 配置表：选项名 → 值（注册时的 config 与单次调用的 overlay 都用它）
pub type ActionConfig = HashMap<String, Value>;

/// Action 元信息，每个 Action 类型产生一次，之后只读
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionMetadata {
    pub name: String,
    pub version: String,
    pub description: String,
    pub dependencies: Vec<String>,
    pub capabilities: Vec<String>,
    pub author: String,
}

impl ActionMetadata {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: description.to_string(),
            dependencies: Vec::new(),
            capabilities: Vec::new(),
            author: "Robot Agent Team".to_string(),
        }
    }

    pub fn with_dependencies(mut self, deps: &[&str]) -> Self {
        self.dependencies = deps.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_capabilities(mut self, caps: &[&str]) -> Self {
        self.capabilities = caps.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// 执行上下文：当前状态（只读）、输入、共享上下文、单次调用的配置 overlay
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub agent_state: AgentState,
    pub input: Option<Value>,
    pub shared: SharedContext,
    pub config: ActionConfig,
}

impl ActionContext {
    pub fn new(agent_state: AgentState, shared: SharedContext) -> Self {
        Self {
            agent_state,
            input: None,
            shared,
            config: ActionConfig::new(),
        }
    }

    pub fn with_input(mut self, input: Option<Value>) -> Self {
        self.input = input.filter(|v| !v.is_null());
        self
    }

    pub fn with_config(mut self, config: ActionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    pub fn config_f64(&self, key: &str) -> Option<f64> {
        self.config.get(key).and_then(Value::as_f64)
    }
}

/// 执行结果；success 决定 output 与 error 哪个有意义
#[derive(Debug, Clone)]
pub struct ActionResult {
    pub success: bool,
    pub output: Option<Value>,
    pub error: Option<AgentError>,
    pub metadata: HashMap<String, Value>,
    /// 建议的后续 Action
    pub next_actions: Vec<String>,
}

impl ActionResult {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            metadata: HashMap::new(),
            next_actions: Vec::new(),
        }
    }

    pub fn failure(error: AgentError) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            metadata: HashMap::new(),
            next_actions: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// 记录自 start 起的耗时（毫秒）
    pub fn with_elapsed(self, start: Instant) -> Self {
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.with_metadata("elapsed_ms", elapsed_ms)
    }

    pub fn with_next_actions(mut self, names: &[&str]) -> Self {
        self.next_actions = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// 读取 output 中的字段
    pub fn output_field(&self, key: &str) -> Option<&Value> {
        self.output.as_ref().and_then(|o| o.get(key))
    }
}

/// Action trait：生命周期（initialize / cleanup）与唯一执行入口 execute
///
/// 所有方法取 &self，内部状态自行同步；同一实例可能被并发 execute。
#[async_trait]
pub trait Action: Send + Sync {
    fn metadata(&self) -> ActionMetadata;

    /// 按配置初始化；失败时该实例不会被注册
    async fn initialize(&self, config: &ActionConfig) -> Result<(), AgentError>;

    /// 执行；未初始化时必须立即返回 NotInitialized 失败
    async fn execute(&self, ctx: ActionContext) -> ActionResult;

    /// 释放资源，之后回到未初始化状态
    async fn cleanup(&self);

    fn is_initialized(&self) -> bool;
}

/// 读取注册配置中的字符串，类型不符时报初始化错误
pub(crate) fn config_string(
    action: &str,
    config: &ActionConfig,
    key: &str,
) -> Result<Option<String>, AgentError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(AgentError::initialization(
            action,
            format!("'{key}' must be a string, got {other}"),
        )),
    }
}

/// 读取注册配置中的数字
pub(crate) fn config_number(
    action: &str,
    config: &ActionConfig,
    key: &str,
) -> Result<Option<f64>, AgentError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            AgentError::initialization(action, format!("'{key}' must be a number, got {v}"))
        }),
    }
}

/// 读取注册配置中的布尔值
pub(crate) fn config_bool(
    action: &str,
    config: &ActionConfig,
    key: &str,
) -> Result<Option<bool>, AgentError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_bool().map(Some).ok_or_else(|| {
            AgentError::initialization(action, format!("'{key}' must be a boolean, got {v}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_builders() {
        let result = ActionResult::success(json!({"emergency": true}))
            .with_metadata("model", "qwen-vl-plus")
            .with_next_actions(&["alert"]);
        assert!(result.success);
        assert_eq!(result.output_field("emergency"), Some(&json!(true)));
        assert_eq!(result.metadata["model"], json!("qwen-vl-plus"));
        assert_eq!(result.next_actions, vec!["alert".to_string()]);

        let failed = ActionResult::failure(AgentError::NotInitialized("watch".into()));
        assert!(!failed.success);
        assert!(failed.output.is_none());
    }

    #[test]
    fn test_config_readers() {
        let mut config = ActionConfig::new();
        config.insert("voice".into(), json!("cherry"));
        config.insert("speed".into(), json!(1.5));

        assert_eq!(config_string("speak", &config, "voice").unwrap(), Some("cherry".into()));
        assert_eq!(config_number("speak", &config, "speed").unwrap(), Some(1.5));
        assert_eq!(config_bool("speak", &config, "auto_play").unwrap(), None);
        assert!(config_string("speak", &config, "speed").is_err());
    }

    #[test]
    fn test_null_input_is_none() {
        let ctx = ActionContext::new(AgentState::Patrolling, SharedContext::new())
            .with_input(Some(Value::Null));
        assert!(ctx.input.is_none());
    }
}
