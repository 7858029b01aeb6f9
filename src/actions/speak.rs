//! SpeakAction：语音合成并播放

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;

use crate::actions::base::{config_bool, config_number, config_string};
use crate::actions::{
    resolve_inference_client, Action, ActionConfig, ActionContext, ActionMetadata, ActionResult,
};
use crate::config::{InferenceSection, SpeakSection};
use crate::core::AgentError;
use crate::devices::AudioPlayer;
use crate::services::{InferenceClient, SpeechParams};

const NOTHING_TO_SAY: &str = "nothing to report";

/// 真实音频按 16 kHz 估算时长；Mock 按每字符 0.1 秒
const SAMPLE_RATE: f64 = 16000.0;
const MOCK_SECS_PER_CHAR: f64 = 0.1;

struct SpeakRuntime {
    inference: Arc<dyn InferenceClient>,
    model: String,
    voice: String,
    speed: f32,
    auto_play: bool,
}

pub struct SpeakAction {
    inference: Arc<dyn InferenceClient>,
    player: Arc<dyn AudioPlayer>,
    remote: InferenceSection,
    defaults: SpeakSection,
    runtime: RwLock<Option<Arc<SpeakRuntime>>>,
}

impl SpeakAction {
    pub fn new(
        inference: Arc<dyn InferenceClient>,
        player: Arc<dyn AudioPlayer>,
        remote: InferenceSection,
        defaults: SpeakSection,
    ) -> Self {
        Self {
            inference,
            player,
            remote,
            defaults,
            runtime: RwLock::new(None),
        }
    }

    fn runtime(&self) -> Option<Arc<SpeakRuntime>> {
        self.runtime
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 输入文本优先；否则播报最近一次观察的描述
    async fn text_to_speak(ctx: &ActionContext) -> String {
        if let Some(text) = ctx.input.as_ref().and_then(|v| v.as_str()) {
            if !text.trim().is_empty() {
                return text.to_string();
            }
        }
        ctx.shared
            .get_last_observation()
            .await
            .map(|obs| obs.description)
            .unwrap_or_else(|| NOTHING_TO_SAY.to_string())
    }
}

#[async_trait]
impl Action for SpeakAction {
    fn metadata(&self) -> ActionMetadata {
        ActionMetadata::new("speak", "Speech synthesis, converts text to audio and plays it")
            .with_dependencies(&["inference_api", "audio_device"])
            .with_capabilities(&["tts", "audio_playback"])
    }

    async fn initialize(&self, config: &ActionConfig) -> Result<(), AgentError> {
        tracing::info!("Initializing speak action");
        let inference = resolve_inference_client("speak", &self.inference, &self.remote, config)?;

        let speed = config_number("speak", config, "speed")?
            .map(|s| s as f32)
            .unwrap_or(self.defaults.speed);
        if !(speed > 0.0 && speed <= 4.0) {
            return Err(AgentError::initialization(
                "speak",
                format!("speed must be within (0, 4], got {speed}"),
            ));
        }

        let runtime = SpeakRuntime {
            model: config_string("speak", config, "model_name")?
                .unwrap_or_else(|| self.remote.speech_model.clone()),
            voice: config_string("speak", config, "voice")?
                .unwrap_or_else(|| self.defaults.voice.clone()),
            auto_play: config_bool("speak", config, "auto_play")?.unwrap_or(self.defaults.auto_play),
            inference,
            speed,
        };
        if runtime.inference.is_mock() {
            tracing::warn!("Speak action running in mock mode");
        }

        *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(runtime));
        tracing::info!("Speak action initialized");
        Ok(())
    }

    async fn execute(&self, ctx: ActionContext) -> ActionResult {
        let start = Instant::now();
        let Some(rt) = self.runtime() else {
            return ActionResult::failure(AgentError::NotInitialized("speak".into())).with_elapsed(start);
        };

        let text = Self::text_to_speak(&ctx).await;
        let params = SpeechParams {
            model: rt.model.clone(),
            voice: ctx.config_str("voice").unwrap_or(&rt.voice).to_string(),
            speed: ctx.config_f64("speed").map(|s| s as f32).unwrap_or(rt.speed),
        };
        tracing::info!(text = %text, voice = %params.voice, "Speaking");

        let audio = match rt.inference.synthesize_speech(&text, &params).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "Speech synthesis failed");
                return ActionResult::failure(AgentError::Execution(e)).with_elapsed(start);
            }
        };
        let duration_secs = if rt.inference.is_mock() {
            text.chars().count() as f64 * MOCK_SECS_PER_CHAR
        } else {
            audio.len() as f64 / SAMPLE_RATE
        };

        let mut played = false;
        if rt.auto_play && rt.inference.is_mock() {
            // Mock 音频不是可解码的真实音频
            tracing::debug!(duration_secs, "Simulated playback in mock mode");
        } else if rt.auto_play && !audio.is_empty() {
            match self.player.play(&audio).await {
                Ok(()) => played = true,
                Err(e) => tracing::warn!(error = %e, "Audio playback failed"),
            }
        }

        ctx.shared.set_last_utterance(text.clone()).await;

        ActionResult::success(json!({
            "text": text,
            "audio_size": audio.len(),
            "duration_secs": duration_secs,
        }))
        .with_metadata("model", rt.model.clone())
        .with_metadata("voice", params.voice)
        .with_metadata("played", played)
        .with_elapsed(start)
    }

    async fn cleanup(&self) {
        *self.runtime.write().unwrap_or_else(PoisonError::into_inner) = None;
        tracing::info!("Speak action cleaned up");
    }

    fn is_initialized(&self) -> bool {
        self.runtime().is_some()
    }
}
