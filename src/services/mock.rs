//! Mock 推理客户端 / Mock 应急服务（无凭据时使用，结果确定）

use async_trait::async_trait;
use serde_json::Value;

use crate::services::{EmergencyService, InferenceClient, SceneAnalysis, SpeechParams, VisionParams};

/// Mock 音频数据
pub const MOCK_AUDIO: &[u8] = b"mock_audio_data";

/// Mock 推理客户端：固定返回「正常办公环境」的分析结果
#[derive(Debug, Default)]
pub struct MockInferenceClient;

impl MockInferenceClient {
    pub fn scene() -> SceneAnalysis {
        SceneAnalysis {
            objects_detected: vec!["person".into(), "chair".into(), "table".into()],
            emergency: false,
            confidence: 0.95,
            description: "normal office environment, no anomaly detected".to_string(),
            raw_response: false,
        }
    }
}

#[async_trait]
impl InferenceClient for MockInferenceClient {
    async fn describe_scene(
        &self,
        _image: &[u8],
        _prompt: &str,
        _params: &VisionParams,
    ) -> Result<SceneAnalysis, String> {
        Ok(Self::scene())
    }

    async fn synthesize_speech(&self, _text: &str, _params: &SpeechParams) -> Result<Vec<u8>, String> {
        Ok(MOCK_AUDIO.to_vec())
    }

    fn is_mock(&self) -> bool {
        true
    }
}

/// Mock 应急服务：模拟 0.5 秒的调用延迟后返回成功
#[derive(Debug, Clone)]
pub struct MockEscalation {
    delay: std::time::Duration,
}

impl MockEscalation {
    pub fn new() -> Self {
        Self {
            delay: std::time::Duration::from_millis(500),
        }
    }

    pub fn with_delay(delay: std::time::Duration) -> Self {
        Self { delay }
    }
}

impl Default for MockEscalation {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmergencyService for MockEscalation {
    async fn escalate(&self, event_details: &Value) -> Result<bool, String> {
        tracing::info!(event = %event_details, "Mock emergency service called");
        tokio::time::sleep(self.delay).await;
        Ok(true)
    }

    fn is_mock(&self) -> bool {
        true
    }
}
