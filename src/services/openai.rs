//! OpenAI 兼容推理客户端
//!
//! 通过 reqwest 直接调用 OpenAI 兼容端点（可配置 base_url，默认 DashScope 兼容模式）：
//! - 视觉理解：`/chat/completions`，图像以 base64 data URL 作为 image_url 内容片段
//! - 语音合成：`/audio/speech`，返回原始音频字节
//!
//! 单次请求失败按 max_retries 重试，两次之间线性退避。

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::services::{InferenceClient, SceneAnalysis, SpeechParams, VisionParams};

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

/// OpenAI 兼容客户端：持有 HTTP Client、base_url 与 API Key
pub struct OpenAiCompatClient {
    client: Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiCompatClient {
    pub fn new(
        base_url: Option<&str>,
        api_key: &str,
        timeout_secs: u64,
        max_retries: u32,
    ) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        let base_url = base_url
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();
        tracing::info!(%base_url, "Inference client initialized");
        Ok(Self {
            client,
            base_url,
            api_key: api_key.to_string(),
            max_retries,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// 发送 JSON 请求并返回成功响应；网络错误与非 2xx 均按 max_retries 重试
    async fn post_with_retry(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, String> {
        let url = self.url(path);
        let mut last_err = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
                tracing::debug!(%url, attempt, "Retrying inference request");
            }
            let sent = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await;
            match sent {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) => {
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    last_err = format!("HTTP {}: {}", status, truncate(&text, 200));
                }
                Err(e) => last_err = format!("Request failed: {}", e),
            }
            tracing::warn!(%url, attempt, error = %last_err, "Inference request failed");
        }
        Err(last_err)
    }
}

#[async_trait]
impl InferenceClient for OpenAiCompatClient {
    async fn describe_scene(
        &self,
        image: &[u8],
        prompt: &str,
        params: &VisionParams,
    ) -> Result<SceneAnalysis, String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(image);
        let body = json!({
            "model": params.model,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "image_url", "image_url": { "url": format!("data:image/jpeg;base64,{}", encoded) } },
                    { "type": "text", "text": prompt }
                ]
            }]
        });

        let resp = self.post_with_retry("chat/completions", &body).await?;
        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| format!("Invalid vision response: {}", e))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| "Vision response has no content".to_string())?;

        tracing::debug!(model = %params.model, reply = %truncate(&content, 100), "Vision completion");
        Ok(SceneAnalysis::from_model_reply(&content))
    }

    async fn synthesize_speech(&self, text: &str, params: &SpeechParams) -> Result<Vec<u8>, String> {
        let body = json!({
            "model": params.model,
            "input": text,
            "voice": params.voice,
            "speed": params.speed,
        });
        let resp = self.post_with_retry("audio/speech", &body).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| format!("Failed to read audio: {}", e))?;
        tracing::debug!(model = %params.model, size = bytes.len(), "Speech synthesized");
        Ok(bytes.to_vec())
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        format!("{}...", s.chars().take(max_chars).collect::<String>())
    } else {
        s.to_string()
    }
}
