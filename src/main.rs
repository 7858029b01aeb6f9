//! Patrol - 巡逻机器人智能体
//!
//! 入口：初始化日志、加载配置、构建控制器并开始巡逻，收到 Ctrl+C / SIGTERM 后优雅关闭。
//! 用法：`patrol [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use patrol::core::shutdown::run_with_graceful_shutdown;
use patrol::core::{
    AgentBuilder, AgentState, ControllerCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    patrol::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = patrol::config::load_config(config_path).context("Failed to load config")?;

    let controller = AgentBuilder::new(config)
        .build()
        .await
        .context("Failed to build agent")?;

    for (name, description) in controller.action_descriptions().await {
        tracing::info!(action = %name, "{}", description);
    }

    controller.start().context("Failed to start agent")?;

    let shutdown = Arc::new(ShutdownManager::new());
    let mut coordinator = ShutdownCoordinator::new(Arc::clone(&shutdown));
    coordinator.register(ControllerCleanup::new(controller.clone()));

    // 控制器自行回到 IDLE 时同样退出
    let mut state_rx = controller.subscribe_state();
    let app_shutdown = Arc::clone(&shutdown);
    let app = async move {
        let _ = state_rx.wait_for(|s| *s == AgentState::Idle).await;
        app_shutdown.shutdown(ShutdownReason::AgentStopped);
    };

    run_with_graceful_shutdown(shutdown, app, || async move {
        coordinator.run_cleanup().await;
    })
    .await;

    tracing::info!("Bye");
    Ok(())
}
