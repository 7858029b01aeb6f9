//! Agent 构建器：统一的控制器初始化逻辑
//!
//! 按配置创建外部协作者（摄像头、推理、音频、应急服务），组装 AgentController
//! 并注册内置 Action（watch / speak / alert）。协作者可以逐个替换，测试时注入假实现。

use std::collections::HashMap;
use std::sync::Arc;

use crate::actions::{Action, ActionConfig, AlertAction, SpeakAction, WatchAction};
use crate::config::{AgentSettings, AppConfig};
use crate::core::{AgentController, AgentError};
use crate::devices::{create_audio_player, create_camera, AudioPlayer, Camera};
use crate::services::{create_emergency_service, create_inference_client, EmergencyService, InferenceClient};

/// Agent 构建器
pub struct AgentBuilder {
    config: AppConfig,
    camera: Option<Arc<dyn Camera>>,
    inference: Option<Arc<dyn InferenceClient>>,
    player: Option<Arc<dyn AudioPlayer>>,
    emergency: Option<Arc<dyn EmergencyService>>,
    /// 各 Action 注册时的配置（覆盖 AppConfig 中的默认值）
    action_configs: HashMap<String, ActionConfig>,
    with_builtin_actions: bool,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            camera: None,
            inference: None,
            player: None,
            emergency: None,
            action_configs: HashMap::new(),
            with_builtin_actions: true,
        }
    }

    pub fn with_camera(mut self, camera: Arc<dyn Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn with_inference(mut self, inference: Arc<dyn InferenceClient>) -> Self {
        self.inference = Some(inference);
        self
    }

    pub fn with_audio_player(mut self, player: Arc<dyn AudioPlayer>) -> Self {
        self.player = Some(player);
        self
    }

    pub fn with_emergency_service(mut self, service: Arc<dyn EmergencyService>) -> Self {
        self.emergency = Some(service);
        self
    }

    /// 为某个内置 Action 指定注册配置
    pub fn with_action_config(mut self, name: &str, config: ActionConfig) -> Self {
        self.action_configs.insert(name.to_string(), config);
        self
    }

    /// 是否注册 watch / speak / alert
    pub fn with_builtin_actions(mut self, enable: bool) -> Self {
        self.with_builtin_actions = enable;
        self
    }

    /// 构建控制器；内置 Action 注册失败时整体失败
    pub async fn build(self) -> Result<AgentController, AgentError> {
        let settings = AgentSettings::from_section(&self.config.agent)?;
        let controller = AgentController::new(settings);

        if !self.with_builtin_actions {
            return Ok(controller);
        }

        let camera = self.camera.unwrap_or_else(|| create_camera(&self.config.camera));
        let inference = self
            .inference
            .unwrap_or_else(|| create_inference_client(&self.config.inference));
        let player = self
            .player
            .unwrap_or_else(|| create_audio_player(&self.config.audio));
        let emergency = self
            .emergency
            .unwrap_or_else(|| create_emergency_service(&self.config.escalation));

        let actions: [(&str, Arc<dyn Action>); 3] = [
            (
                "watch",
                Arc::new(WatchAction::new(
                    camera,
                    Arc::clone(&inference),
                    self.config.inference.clone(),
                    self.config.watch.clone(),
                )),
            ),
            (
                "speak",
                Arc::new(SpeakAction::new(
                    inference,
                    player,
                    self.config.inference.clone(),
                    self.config.speak.clone(),
                )),
            ),
            ("alert", Arc::new(AlertAction::new(emergency))),
        ];

        let empty = ActionConfig::new();
        for (name, action) in actions {
            let config = self.action_configs.get(name).unwrap_or(&empty);
            controller.register_action(name, action, config).await?;
        }

        tracing::info!(actions = ?controller.action_names().await, "Agent built");
        Ok(controller)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{NullPlayer, StaticCamera};
    use crate::services::{MockEscalation, MockInferenceClient};
    use serde_json::json;

    fn mock_builder() -> AgentBuilder {
        AgentBuilder::new(AppConfig::default())
            .with_camera(Arc::new(StaticCamera::default()))
            .with_inference(Arc::new(MockInferenceClient))
            .with_audio_player(Arc::new(NullPlayer))
            .with_emergency_service(Arc::new(MockEscalation::new()))
    }

    #[tokio::test]
    async fn test_build_registers_builtin_actions() {
        let controller = mock_builder().build().await.unwrap();
        assert_eq!(
            controller.action_names().await,
            vec!["alert".to_string(), "speak".to_string(), "watch".to_string()]
        );
        let meta = controller.action_metadata("watch").await.unwrap();
        assert!(meta.capabilities.contains(&"vision".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_action_config_fails_build() {
        let mut bad = ActionConfig::new();
        bad.insert("temperature".into(), json!(9.0));
        let err = mock_builder()
            .with_action_config("watch", bad)
            .build()
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AgentError::Initialization { .. }));
    }

    #[tokio::test]
    async fn test_invalid_agent_section_rejected() {
        let mut config = AppConfig::default();
        config.agent.patrol_interval_secs = 0.0;
        let err = AgentBuilder::new(config).build().await.err().unwrap();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[tokio::test]
    async fn test_without_builtin_actions() {
        let controller = mock_builder().with_builtin_actions(false).build().await.unwrap();
        assert!(controller.action_names().await.is_empty());
    }
}
