//! 本地设备：摄像头采集与音频播放

pub mod audio;
pub mod camera;

use std::sync::Arc;

pub use audio::{AudioPlayer, CommandPlayer, NullPlayer};
pub use camera::{Camera, FfmpegCamera, StaticCamera, StillImageCamera};

use crate::config::{AudioSection, CameraSection, CameraSource};

/// 根据 [camera] 配置创建摄像头；file 模式缺少 image_path 时回退为 Mock
pub fn create_camera(cfg: &CameraSection) -> Arc<dyn Camera> {
    match (cfg.source, cfg.image_path.as_ref()) {
        (CameraSource::Ffmpeg, _) => Arc::new(FfmpegCamera::new(cfg.device.clone(), cfg.quality)),
        (CameraSource::File, Some(path)) => Arc::new(StillImageCamera::new(path.clone())),
        (CameraSource::File, None) => {
            tracing::warn!("camera.source = file but no image_path set, using mock camera");
            Arc::new(StaticCamera::default())
        }
        (CameraSource::Mock, _) => Arc::new(StaticCamera::default()),
    }
}

/// 根据 [audio] 配置创建播放器
pub fn create_audio_player(cfg: &AudioSection) -> Arc<dyn AudioPlayer> {
    if cfg.enabled && !cfg.player.trim().is_empty() {
        Arc::new(CommandPlayer::new(cfg.player.clone(), cfg.args.clone()))
    } else {
        Arc::new(NullPlayer)
    }
}
