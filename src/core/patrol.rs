//! 巡逻循环：PATROLLING 期间定期执行 watch，发现紧急情况时驱动告警流程
//!
//! 单个 watch 失败只记日志，不会终止循环；每轮之间的 sleep 与 token 取消 select，
//! 取消后不会开始新的一轮。

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentController, AgentState};
use crate::services::SceneAnalysis;

pub struct PatrolScheduler {
    controller: AgentController,
    interval: Duration,
}

impl PatrolScheduler {
    pub fn new(controller: AgentController, interval: Duration) -> Self {
        Self {
            controller,
            interval,
        }
    }

    pub async fn run(self, token: CancellationToken) {
        tracing::info!(interval_secs = self.interval.as_secs_f64(), "Patrol loop started");
        loop {
            if token.is_cancelled() {
                break;
            }
            if self.controller.state() == AgentState::Patrolling {
                self.patrol_once(&token).await;
            }
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
        tracing::info!("Patrol loop stopped");
    }

    /// 一轮巡检：watch → 检查 emergency
    async fn patrol_once(&self, token: &CancellationToken) {
        if !self.controller.has_action("watch").await {
            tracing::warn!("Watch action not registered, skipping patrol round");
            return;
        }

        let result = self.controller.execute_action("watch", None, None).await;
        if !result.success {
            let reason = result
                .error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".into());
            tracing::warn!(error = %reason, "Watch action failed, continuing patrol");
            return;
        }

        let Some(output) = result.output else {
            return;
        };
        if output.get("emergency").and_then(Value::as_bool) != Some(true) {
            tracing::debug!("No emergency detected, continuing patrol");
            return;
        }
        if token.is_cancelled() {
            return;
        }

        let description = serde_json::from_value::<SceneAnalysis>(output.clone())
            .map(|analysis| analysis.description)
            .unwrap_or_else(|_| SceneAnalysis::default().description);
        self.controller.handle_emergency(&description, output).await;
    }
}
