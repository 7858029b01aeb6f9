//! 摄像头传感器
//!
//! capture_image 失败时返回 None（记录日志），不向 Action 抛错；
//! 采集通过 tokio::process / tokio::fs 完成，不阻塞调度器。

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

/// 摄像头 trait：抓取一帧 JPEG
#[async_trait]
pub trait Camera: Send + Sync {
    async fn capture_image(&self) -> Option<Vec<u8>>;
}

/// 通过 ffmpeg 从 V4L2 设备抓一帧（mjpeg 编码输出到 stdout）
pub struct FfmpegCamera {
    device: String,
    quality: u8,
    timeout: Duration,
}

impl FfmpegCamera {
    pub fn new(device: impl Into<String>, quality: u8) -> Self {
        Self {
            device: device.into(),
            quality: quality.clamp(2, 31),
            timeout: Duration::from_secs(10),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-loglevel", "error", "-f", "v4l2", "-i"])
            .arg(&self.device)
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "mjpeg", "-q:v"])
            .arg(self.quality.to_string())
            .arg("-")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Camera for FfmpegCamera {
    async fn capture_image(&self) -> Option<Vec<u8>> {
        tracing::debug!(device = %self.device, "Capturing image");
        let output = match tokio::time::timeout(self.timeout, self.command().output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(device = %self.device, error = %e, "Cannot run ffmpeg");
                return None;
            }
            Err(_) => {
                tracing::warn!(device = %self.device, "Image capture timed out");
                return None;
            }
        };

        if !output.status.success() || output.stdout.is_empty() {
            tracing::warn!(
                device = %self.device,
                status = ?output.status,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Cannot read frame from camera"
            );
            return None;
        }
        Some(output.stdout)
    }
}

/// 读取静态图片文件（无摄像头环境下调试用）
pub struct StillImageCamera {
    path: PathBuf,
}

impl StillImageCamera {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Camera for StillImageCamera {
    async fn capture_image(&self) -> Option<Vec<u8>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if !bytes.is_empty() => Some(bytes),
            Ok(_) => {
                tracing::warn!(path = %self.path.display(), "Image file is empty");
                None
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Cannot read image file");
                None
            }
        }
    }
}

/// 固定返回同一份字节；`None` 表示模拟采集失败
#[derive(Debug, Clone)]
pub struct StaticCamera {
    frame: Option<Vec<u8>>,
}

impl StaticCamera {
    pub fn new(frame: Vec<u8>) -> Self {
        Self { frame: Some(frame) }
    }

    pub fn broken() -> Self {
        Self { frame: None }
    }
}

impl Default for StaticCamera {
    fn default() -> Self {
        Self::new(b"mock_jpeg_frame".to_vec())
    }
}

#[async_trait]
impl Camera for StaticCamera {
    async fn capture_image(&self) -> Option<Vec<u8>> {
        self.frame.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_still_image_camera() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"\xFF\xD8jpeg").unwrap();

        let camera = StillImageCamera::new(file.path());
        assert_eq!(camera.capture_image().await, Some(b"\xFF\xD8jpeg".to_vec()));

        let missing = StillImageCamera::new("/nonexistent/frame.jpg");
        assert!(missing.capture_image().await.is_none());
    }

    #[tokio::test]
    async fn test_static_camera() {
        assert!(StaticCamera::default().capture_image().await.is_some());
        assert!(StaticCamera::broken().capture_image().await.is_none());
    }
}
