//! 应急上报服务
//!
//! 检测到紧急情况时由 AlertAction 调用；配置了 webhook 时以 JSON POST 上报，否则使用 MockEscalation。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

/// 应急服务 trait：返回服务是否受理
#[async_trait]
pub trait EmergencyService: Send + Sync {
    async fn escalate(&self, event_details: &Value) -> Result<bool, String>;

    fn is_mock(&self) -> bool {
        false
    }
}

/// Webhook 上报：2xx 视为受理，其它状态码视为拒绝
pub struct WebhookEscalation {
    client: Client,
    url: String,
}

impl WebhookEscalation {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl EmergencyService for WebhookEscalation {
    async fn escalate(&self, event_details: &Value) -> Result<bool, String> {
        let resp = self
            .client
            .post(&self.url)
            .json(event_details)
            .send()
            .await
            .map_err(|e| format!("Emergency webhook request failed: {}", e))?;

        let status = resp.status();
        if !status.is_success() {
            tracing::warn!(url = %self.url, %status, "Emergency webhook rejected the event");
        }
        Ok(status.is_success())
    }
}
