//! Action 间共享的上下文
//!
//! 所有 Action 在执行期间都可读写；每个字段都是「最后写入者胜出」。
//! 读写都在 RwLock 的短临界区内完成，不跨 await 持有锁。

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::services::SceneAnalysis;

#[derive(Debug, Default, Clone)]
struct SharedState {
    /// 最近一次视觉分析结果（watch 写入，alert / speak 读取）
    last_observation: Option<SceneAnalysis>,
    /// 最近一次上报的紧急事件详情
    last_alert: Option<Value>,
    /// 最近一次播报的文本
    last_utterance: Option<String>,
    /// 其它自定义键值
    values: HashMap<String, Value>,
}

/// 共享上下文句柄，Clone 后指向同一份数据
#[derive(Debug, Default, Clone)]
pub struct SharedContext {
    inner: Arc<RwLock<SharedState>>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_last_observation(&self) -> Option<SceneAnalysis> {
        self.inner.read().await.last_observation.clone()
    }

    pub async fn set_last_observation(&self, observation: SceneAnalysis) {
        self.inner.write().await.last_observation = Some(observation);
    }

    pub async fn get_last_alert(&self) -> Option<Value> {
        self.inner.read().await.last_alert.clone()
    }

    pub async fn set_last_alert(&self, details: Value) {
        self.inner.write().await.last_alert = Some(details);
    }

    pub async fn get_last_utterance(&self) -> Option<String> {
        self.inner.read().await.last_utterance.clone()
    }

    pub async fn set_last_utterance(&self, text: impl Into<String>) {
        self.inner.write().await.last_utterance = Some(text.into());
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.inner.read().await.values.get(key).cloned()
    }

    /// 写入自定义键，返回被覆盖的旧值
    pub async fn set(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.inner.write().await.values.insert(key.into(), value)
    }

    /// 清空全部内容
    pub async fn clear(&self) {
        *self.inner.write().await = SharedState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_writer_wins() {
        let ctx = SharedContext::new();
        let other = ctx.clone();

        ctx.set("zone", Value::from("lobby")).await;
        let old = other.set("zone", Value::from("garage")).await;

        assert_eq!(old, Some(Value::from("lobby")));
        assert_eq!(ctx.get("zone").await, Some(Value::from("garage")));
    }

    #[tokio::test]
    async fn test_observation_accessors() {
        let ctx = SharedContext::new();
        assert!(ctx.get_last_observation().await.is_none());

        let obs = SceneAnalysis {
            description: "smoke detected".to_string(),
            emergency: true,
            ..SceneAnalysis::default()
        };
        ctx.set_last_observation(obs.clone()).await;
        assert_eq!(ctx.get_last_observation().await, Some(obs));

        ctx.clear().await;
        assert!(ctx.get_last_observation().await.is_none());
    }
}
