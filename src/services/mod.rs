//! 外部服务层：远程推理（视觉 / 语音）与应急上报
//!
//! 没有凭据或 webhook 时回退到确定性的 Mock 实现，编排核心无需真实服务即可运行与测试。

pub mod escalation;
pub mod inference;
pub mod mock;
pub mod openai;

use std::sync::Arc;

pub use escalation::{EmergencyService, WebhookEscalation};
pub use inference::{InferenceClient, SceneAnalysis, SpeechParams, VisionParams};
pub use mock::{MockEscalation, MockInferenceClient, MOCK_AUDIO};
pub use openai::OpenAiCompatClient;

use crate::config::{EscalationSection, InferenceSection};

/// 根据配置选择推理后端（OpenAI 兼容 / Mock）
pub fn create_inference_client(cfg: &InferenceSection) -> Arc<dyn InferenceClient> {
    let Some(api_key) = cfg.resolved_api_key() else {
        tracing::warn!("No API key provided, using mock inference client");
        return Arc::new(MockInferenceClient);
    };
    match OpenAiCompatClient::new(
        cfg.base_url.as_deref(),
        &api_key,
        cfg.request_timeout_secs,
        cfg.max_retries,
    ) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::warn!(error = %e, "Inference client unavailable, using mock");
            Arc::new(MockInferenceClient)
        }
    }
}

/// 根据配置选择应急服务（Webhook / Mock）
pub fn create_emergency_service(cfg: &EscalationSection) -> Arc<dyn EmergencyService> {
    let Some(url) = cfg.webhook_url.as_deref().filter(|u| !u.trim().is_empty()) else {
        tracing::warn!("No emergency webhook configured, using mock escalation");
        return Arc::new(MockEscalation::new());
    };
    match WebhookEscalation::new(url, cfg.timeout_secs) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::warn!(error = %e, "Emergency webhook unavailable, using mock");
            Arc::new(MockEscalation::new())
        }
    }
}
