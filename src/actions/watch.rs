//! WatchAction：巡检期间的环境理解
//!
//! 从摄像头抓一帧，调用视觉模型分析，把结果写入共享上下文的 last_observation 并作为输出返回。

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;

use crate::actions::base::{config_number, config_string};
use crate::actions::{
    resolve_inference_client, Action, ActionConfig, ActionContext, ActionMetadata, ActionResult,
};
use crate::config::{InferenceSection, WatchSection};
use crate::core::AgentError;
use crate::devices::Camera;
use crate::services::{InferenceClient, VisionParams};

pub const DEFAULT_PROMPT: &str = "\
Analyze this patrol image and identify:
1. Objects and people in the scene
2. Whether any abnormal situation exists (fire, smoke, unauthorized persons, etc.)
3. An overall assessment of the environment

Reply with JSON only, containing the fields:
- objects_detected: list of detected objects (array of strings)
- emergency: whether an emergency exists (boolean)
- confidence: confidence of the analysis (float between 0 and 1)
- description: description of the scene (string)
";

/// initialize 之后固定下来的运行参数
struct WatchRuntime {
    inference: Arc<dyn InferenceClient>,
    model: String,
    prompt: String,
    max_tokens: u32,
    temperature: f32,
}

pub struct WatchAction {
    camera: Arc<dyn Camera>,
    inference: Arc<dyn InferenceClient>,
    remote: InferenceSection,
    defaults: WatchSection,
    runtime: RwLock<Option<Arc<WatchRuntime>>>,
}

impl WatchAction {
    pub fn new(
        camera: Arc<dyn Camera>,
        inference: Arc<dyn InferenceClient>,
        remote: InferenceSection,
        defaults: WatchSection,
    ) -> Self {
        Self {
            camera,
            inference,
            remote,
            defaults,
            runtime: RwLock::new(None),
        }
    }

    fn runtime(&self) -> Option<Arc<WatchRuntime>> {
        self.runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Action for WatchAction {
    fn metadata(&self) -> ActionMetadata {
        ActionMetadata::new("watch", "Image understanding for environment analysis during patrol")
            .with_dependencies(&["camera", "inference_api"])
            .with_capabilities(&["vision", "object_detection", "emergency_detection"])
    }

    async fn initialize(&self, config: &ActionConfig) -> Result<(), AgentError> {
        tracing::info!("Initializing watch action");
        let inference = resolve_inference_client("watch", &self.inference, &self.remote, config)?;

        let temperature = config_number("watch", config, "temperature")?
            .map(|t| t as f32)
            .unwrap_or(self.defaults.temperature);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(AgentError::initialization(
                "watch",
                format!("temperature must be within [0, 2], got {temperature}"),
            ));
        }
        let max_tokens = config_number("watch", config, "max_tokens")?
            .map(|n| n as u32)
            .unwrap_or(self.defaults.max_tokens);

        let runtime = WatchRuntime {
            model: config_string("watch", config, "model_name")?
                .unwrap_or_else(|| self.remote.vision_model.clone()),
            prompt: config_string("watch", config, "prompt_template")?
                .or_else(|| self.defaults.prompt.clone())
                .unwrap_or_else(|| DEFAULT_PROMPT.to_string()),
            inference,
            max_tokens,
            temperature,
        };
        if runtime.inference.is_mock() {
            tracing::warn!("Watch action running in mock mode");
        }

        *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(runtime));
        tracing::info!("Watch action initialized");
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext) -> ActionResult {
        let start = Instant::now();
        let Some(rt) = self.runtime() else {
            return ActionResult::failure(AgentError::NotInitialized("watch".into())).with_elapsed(start);
        };

        let Some(image) = self.camera.capture_image().await else {
            return ActionResult::failure(AgentError::Execution("failed to capture image".into()))
                .with_elapsed(start);
        };

        let prompt = ctx.config_str("prompt").unwrap_or(&rt.prompt);
        let params = VisionParams {
            model: rt.model.clone(),
            temperature: rt.temperature,
            max_tokens: rt.max_tokens,
        };
        let analysis = match rt.inference.describe_scene(&image, prompt, &params).await {
            Ok(analysis) => analysis.normalized(),
            Err(e) => {
                tracing::warn!(error = %e, "Vision analysis failed");
                return ActionResult::failure(AgentError::Execution(e)).with_elapsed(start);
            }
        };

        ctx.shared.set_last_observation(analysis.clone()).await;

        let output = match serde_json::to_value(&analysis) {
            Ok(v) => v,
            Err(e) => {
                return ActionResult::failure(AgentError::Execution(e.to_string())).with_elapsed(start)
            }
        };
        tracing::info!(
            emergency = analysis.emergency,
            objects = analysis.objects_detected.len(),
            confidence = analysis.confidence,
            "Watch action complete"
        );

        let mut result = ActionResult::success(output)
            .with_metadata("image_size", image.len())
            .with_metadata("model", rt.model.clone())
            .with_metadata("mock", rt.inference.is_mock());
        if analysis.emergency {
            result = result.with_next_actions(&["alert", "speak"]);
        }
        result.with_elapsed(start)
    }

    async fn cleanup(&self) {
        *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!("Watch action cleaned up");
    }

    fn is_initialized(&self) -> bool {
        self.runtime().is_some()
    }
}
