//! Patrol - 巡逻机器人智能体编排引擎
//!
//! 模块划分：
//! - **actions**: Action 契约、注册表与内置能力（watch / speak / alert）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 控制器状态机、巡逻循环、任务管理器、共享上下文、优雅关闭
//! - **devices**: 摄像头采集与音频播放
//! - **observability**: 日志初始化
//! - **services**: 远程推理（视觉 / 语音）与应急上报

pub mod actions;
pub mod config;
pub mod core;
pub mod devices;
pub mod observability;
pub mod services;
