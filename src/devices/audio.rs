//! 音频播放
//!
//! CommandPlayer 把音频字节写入外部播放器（默认 ffplay）的 stdin；NullPlayer 只记录日志。

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

#[async_trait]
pub trait AudioPlayer: Send + Sync {
    async fn play(&self, audio: &[u8]) -> Result<(), String>;
}

/// 外部命令播放器
pub struct CommandPlayer {
    program: String,
    args: Vec<String>,
}

impl CommandPlayer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl AudioPlayer for CommandPlayer {
    async fn play(&self, audio: &[u8]) -> Result<(), String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("Cannot start player '{}': {}", self.program, e))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(audio)
                .await
                .map_err(|e| format!("Failed to stream audio: {}", e))?;
            // 关闭 stdin，播放器读到 EOF 后退出
            drop(stdin);
        }

        let status = child
            .wait()
            .await
            .map_err(|e| format!("Player failed: {}", e))?;
        if !status.success() {
            return Err(format!("Player exited with {}", status));
        }
        Ok(())
    }
}

/// 不播放，仅记录
#[derive(Debug, Default)]
pub struct NullPlayer;

#[async_trait]
impl AudioPlayer for NullPlayer {
    async fn play(&self, audio: &[u8]) -> Result<(), String> {
        tracing::info!(bytes = audio.len(), "Audio playback skipped (no player)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_player_is_error() {
        let player = CommandPlayer::new("definitely-not-a-player-binary", vec![]);
        let err = player.play(b"abc").await.unwrap_err();
        assert!(err.contains("Cannot start player"));
    }

    #[tokio::test]
    async fn test_null_player() {
        assert!(NullPlayer.play(b"abc").await.is_ok());
    }
}
