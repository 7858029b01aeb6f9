//! 远程推理服务抽象
//!
//! 视觉理解（describe_scene）与语音合成（synthesize_speech）两类调用；后端（OpenAI 兼容 / Mock）实现 InferenceClient。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 视觉分析结果；缺失字段在反序列化时补默认值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneAnalysis {
    #[serde(default)]
    pub objects_detected: Vec<String>,
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default = "default_description")]
    pub description: String,
    /// 模型没有返回 JSON，description 为原始文本
    #[serde(default)]
    pub raw_response: bool,
}

fn default_description() -> String {
    "no description".to_string()
}

impl Default for SceneAnalysis {
    fn default() -> Self {
        Self {
            objects_detected: Vec::new(),
            emergency: false,
            confidence: 0.0,
            description: default_description(),
            raw_response: false,
        }
    }
}

impl SceneAnalysis {
    /// 解析模型回复：优先按 JSON（允许 ```json 代码块包裹），否则整段作为描述
    pub fn from_model_reply(reply: &str) -> Self {
        let body = strip_code_fence(reply);
        match serde_json::from_str::<SceneAnalysis>(body) {
            Ok(analysis) => analysis.normalized(),
            Err(_) => SceneAnalysis {
                description: reply.trim().to_string(),
                raw_response: true,
                ..SceneAnalysis::default()
            },
        }
    }

    /// 置信度截断到 [0, 1]，NaN 视为 0
    pub fn normalized(mut self) -> Self {
        self.confidence = if self.confidence.is_nan() {
            0.0
        } else {
            self.confidence.clamp(0.0, 1.0)
        };
        self
    }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 视觉调用参数
#[derive(Debug, Clone, PartialEq)]
pub struct VisionParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// 语音合成参数
#[derive(Debug, Clone, PartialEq)]
pub struct SpeechParams {
    pub model: String,
    pub voice: String,
    pub speed: f32,
}

/// 推理客户端 trait
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// 理解图像内容，返回结构化分析
    async fn describe_scene(
        &self,
        image: &[u8],
        prompt: &str,
        params: &VisionParams,
    ) -> Result<SceneAnalysis, String>;

    /// 文本转语音，返回音频字节
    async fn synthesize_speech(&self, text: &str, params: &SpeechParams) -> Result<Vec<u8>, String>;

    /// 是否为 Mock（无凭据时的确定性回退）
    fn is_mock(&self) -> bool {
        false
    }
}
