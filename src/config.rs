//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `PATROL__*` 覆盖（双下划线表示嵌套，如 `PATROL__AGENT__PATROL_INTERVAL_SECS=10`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub agent: AgentSection,
    pub inference: InferenceSection,
    pub watch: WatchSection,
    pub speak: SpeakSection,
    pub camera: CameraSection,
    pub audio: AudioSection,
    pub escalation: EscalationSection,
}

/// [agent] 段：巡逻间隔、冷却时间、任务管理器节拍、任务默认超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub patrol_interval_secs: f64,
    /// RESPONDING → PATROLLING 之前的冷却时间
    pub cooldown_secs: f64,
    pub task_tick_secs: f64,
    pub default_task_timeout_secs: f64,
    /// 终态任务记录的保留时间
    pub task_retention_secs: f64,
    /// 紧急播报模板，`{description}` 会被替换为视觉分析描述
    pub alert_speech_template: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            patrol_interval_secs: 30.0,
            cooldown_secs: 5.0,
            task_tick_secs: 1.0,
            default_task_timeout_secs: 60.0,
            task_retention_secs: 300.0,
            alert_speech_template: "Emergency detected: {description}".to_string(),
        }
    }
}

/// [inference] 段：远程推理服务（OpenAI 兼容）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceSection {
    /// 未设置时读取 OPENAI_API_KEY；两者都没有则使用 Mock
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub vision_model: String,
    pub speech_model: String,
    pub request_timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for InferenceSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            vision_model: "qwen-vl-plus".to_string(),
            speech_model: "qwen-omni-flash".to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl InferenceSection {
    /// 配置优先，其次环境变量 OPENAI_API_KEY；空字符串视为未设置
    pub fn resolved_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|k| !k.trim().is_empty())
    }
}

/// [watch] 段：视觉提示词与采样参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    /// 未设置时使用内置巡检提示词
    pub prompt: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            prompt: None,
            max_tokens: 500,
            temperature: 0.7,
        }
    }
}

/// [speak] 段：音色、语速、是否自动播放
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpeakSection {
    pub voice: String,
    pub speed: f32,
    pub auto_play: bool,
}

impl Default for SpeakSection {
    fn default() -> Self {
        Self {
            voice: "default".to_string(),
            speed: 1.0,
            auto_play: true,
        }
    }
}

/// 摄像头来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraSource {
    /// 调用 ffmpeg 从 V4L2 设备抓一帧
    Ffmpeg,
    /// 读取静态图片文件
    File,
    /// 固定字节（测试用）
    Mock,
}

/// [camera] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSection {
    pub source: CameraSource,
    pub device: String,
    pub image_path: Option<PathBuf>,
    /// ffmpeg mjpeg 质量（2-31，越小越好）
    pub quality: u8,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            source: CameraSource::Ffmpeg,
            device: "/dev/video0".to_string(),
            image_path: None,
            quality: 5,
        }
    }
}

/// [audio] 段：播放器命令（音频从 stdin 写入）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSection {
    pub enabled: bool,
    pub player: String,
    pub args: Vec<String>,
}

impl Default for AudioSection {
    fn default() -> Self {
        Self {
            enabled: true,
            player: "ffplay".to_string(),
            args: vec![
                "-nodisp".into(),
                "-autoexit".into(),
                "-loglevel".into(),
                "quiet".into(),
                "-".into(),
            ],
        }
    }
}

/// [escalation] 段：应急上报 webhook，未设置时使用 Mock
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EscalationSection {
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for EscalationSection {
    fn default() -> Self {
        Self {
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

/// 校验后的控制器运行参数（秒 → Duration）
#[derive(Debug, Clone, PartialEq)]
pub struct AgentSettings {
    pub patrol_interval: Duration,
    pub cooldown: Duration,
    pub task_tick: Duration,
    pub default_task_timeout: Duration,
    pub task_retention: Duration,
    pub alert_speech_template: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            patrol_interval: Duration::from_secs(30),
            cooldown: Duration::from_secs(5),
            task_tick: Duration::from_secs(1),
            default_task_timeout: Duration::from_secs(60),
            task_retention: Duration::from_secs(300),
            alert_speech_template: AgentSection::default().alert_speech_template,
        }
    }
}

impl AgentSettings {
    pub fn from_section(section: &AgentSection) -> Result<Self, AgentError> {
        Ok(Self {
            patrol_interval: positive_secs("patrol_interval_secs", section.patrol_interval_secs)?,
            cooldown: non_negative_secs("cooldown_secs", section.cooldown_secs)?,
            task_tick: positive_secs("task_tick_secs", section.task_tick_secs)?,
            default_task_timeout: positive_secs(
                "default_task_timeout_secs",
                section.default_task_timeout_secs,
            )?,
            task_retention: non_negative_secs("task_retention_secs", section.task_retention_secs)?,
            alert_speech_template: section.alert_speech_template.clone(),
        })
    }

    /// 用模板生成紧急播报文本
    pub fn alert_speech(&self, description: &str) -> String {
        self.alert_speech_template.replace("{description}", description)
    }
}

fn positive_secs(key: &str, secs: f64) -> Result<Duration, AgentError> {
    if secs.is_finite() && secs > 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(AgentError::Config(format!("{key} must be > 0, got {secs}")))
    }
}

fn non_negative_secs(key: &str, secs: f64) -> Result<Duration, AgentError> {
    if secs.is_finite() && secs >= 0.0 {
        Ok(Duration::from_secs_f64(secs))
    } else {
        Err(AgentError::Config(format!("{key} must be >= 0, got {secs}")))
    }
}

/// 从 config 目录加载配置，环境变量 PATROL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 PATROL__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, ignored");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("PATROL")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
