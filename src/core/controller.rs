//! AgentController：状态机 + 后台例程的唯一拥有者
//!
//! 状态流转：
//! - IDLE → PATROLLING（start）：拉起巡逻循环与任务管理器，重复 start 不会产生第二份例程
//! - PATROLLING → ALERT：巡逻循环发现 emergency
//! - ALERT → RESPONDING：alert / speak 尽力执行之后
//! - RESPONDING → PATROLLING：冷却结束
//! - 任意状态 → IDLE（stop）：取消例程、取消运行中的任务、注销全部 Action
//!
//! 所有状态写入都经过 routines 互斥锁，构成单一临界区；临界区内没有 await。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::actions::{Action, ActionConfig, ActionContext, ActionMetadata, ActionRegistry, ActionResult};
use crate::config::AgentSettings;
use crate::core::{AgentError, AgentEvent, AgentState, PatrolScheduler, SharedContext, Task, TaskId, TaskManager};

#[derive(Default)]
struct Routines {
    token: Option<CancellationToken>,
    patrol: Option<JoinHandle<()>>,
    task_manager: Option<JoinHandle<()>>,
    /// 已取消但可能尚未退出的旧例程，stop 时一并等待
    retired: Vec<JoinHandle<()>>,
}

impl Routines {
    fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    fn take_handles(&mut self) -> Vec<JoinHandle<()>> {
        let mut handles: Vec<JoinHandle<()>> = self.retired.drain(..).collect();
        handles.extend(self.patrol.take());
        handles.extend(self.task_manager.take());
        handles
    }

    fn live(&self) -> usize {
        self.patrol
            .iter()
            .chain(self.task_manager.iter())
            .chain(self.retired.iter())
            .filter(|h| !h.is_finished())
            .count()
    }
}

fn is_alive(handle: &Option<JoinHandle<()>>) -> bool {
    handle.as_ref().is_some_and(|h| !h.is_finished())
}

struct ControllerInner {
    settings: AgentSettings,
    state_tx: watch::Sender<AgentState>,
    events: broadcast::Sender<AgentEvent>,
    routines: Mutex<Routines>,
    registry: ActionRegistry,
    shared: SharedContext,
    tasks: Arc<TaskManager>,
}

/// 控制器句柄；Clone 后共享同一状态机
#[derive(Clone)]
pub struct AgentController {
    inner: Arc<ControllerInner>,
}

impl AgentController {
    pub fn new(settings: AgentSettings) -> Self {
        let (state_tx, _) = watch::channel(AgentState::Idle);
        let (events, _) = broadcast::channel(256);
        let tasks = TaskManager::new(settings.task_tick, settings.default_task_timeout)
            .with_retention(settings.task_retention)
            .with_events(events.clone());
        Self {
            inner: Arc::new(ControllerInner {
                settings,
                state_tx,
                events,
                routines: Mutex::new(Routines::default()),
                registry: ActionRegistry::new(),
                shared: SharedContext::new(),
                tasks: Arc::new(tasks),
            }),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.inner.settings
    }

    pub fn state(&self) -> AgentState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<AgentState> {
        self.inner.state_tx.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AgentEvent> {
        self.inner.events.subscribe()
    }

    pub fn shared_context(&self) -> &SharedContext {
        &self.inner.shared
    }

    pub fn task_manager(&self) -> &Arc<TaskManager> {
        &self.inner.tasks
    }

    /// 仍在运行的后台例程数量
    pub fn live_routines(&self) -> usize {
        self.lock_routines().live()
    }

    fn lock_routines(&self) -> MutexGuard<'_, Routines> {
        self.inner
            .routines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: AgentEvent) {
        let _ = self.inner.events.send(event);
    }

    // ---------- 状态机 ----------

    /// 进入巡逻状态；必须在 tokio 运行时内调用
    pub fn start(&self) -> Result<(), AgentError> {
        tracing::info!("Starting agent");
        self.set_state(AgentState::Patrolling)
    }

    /// 无条件切换状态
    pub fn set_state(&self, to: AgentState) -> Result<(), AgentError> {
        let mut routines = self.lock_routines();
        self.apply_state(&mut routines, to)
    }

    /// 仅当当前状态为 from 时切换到 to；返回是否切换
    pub fn transition(&self, from: AgentState, to: AgentState) -> Result<bool, AgentError> {
        Ok(self.transition_with_token(from, to)?.is_some())
    }

    /// 条件切换，并在同一临界区内取出当前例程的取消令牌。
    /// 没有活动例程时返回一个已取消的令牌。
    fn transition_with_token(
        &self,
        from: AgentState,
        to: AgentState,
    ) -> Result<Option<CancellationToken>, AgentError> {
        let mut routines = self.lock_routines();
        if self.state() != from {
            tracing::debug!(current = %self.state(), expected = %from, target = %to, "Transition skipped");
            return Ok(None);
        }
        self.apply_state(&mut routines, to)?;
        let token = routines.token.clone().unwrap_or_else(|| {
            let token = CancellationToken::new();
            token.cancel();
            token
        });
        Ok(Some(token))
    }

    fn apply_state(&self, routines: &mut Routines, to: AgentState) -> Result<(), AgentError> {
        match to {
            AgentState::Patrolling => self.ensure_routines(routines)?,
            AgentState::Idle => routines.cancel(),
            AgentState::Alert | AgentState::Responding => {}
        }

        let from = self.inner.state_tx.send_replace(to);
        if from != to {
            tracing::info!(from = %from, to = %to, "State transition");
            self.emit(AgentEvent::StateChanged { from, to });
        }
        Ok(())
    }

    /// 确保巡逻循环与任务管理器各有且仅有一份在运行
    fn ensure_routines(&self, routines: &mut Routines) -> Result<(), AgentError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| AgentError::Execution(format!("no async runtime available: {e}")))?;

        let token = match &routines.token {
            Some(token) if !token.is_cancelled() => token.clone(),
            _ => {
                // 旧 token 已取消，旧例程即将退出，不能再复用
                let stale = routines.take_handles();
                routines.retired = stale.into_iter().filter(|h| !h.is_finished()).collect();
                let token = CancellationToken::new();
                routines.token = Some(token.clone());
                token
            }
        };

        if !is_alive(&routines.patrol) {
            let scheduler = PatrolScheduler::new(self.clone(), self.inner.settings.patrol_interval);
            routines.patrol = Some(runtime.spawn(scheduler.run(token.child_token())));
            tracing::debug!("Patrol routine spawned");
        }
        if !is_alive(&routines.task_manager) {
            let tasks = Arc::clone(&self.inner.tasks);
            routines.task_manager = Some(runtime.spawn(tasks.run(token.child_token())));
            tracing::debug!("Task manager routine spawned");
        }
        Ok(())
    }

    /// 停止：进入 IDLE，等待例程退出，取消运行中的任务，注销全部 Action
    pub async fn stop(&self) {
        tracing::info!("Stopping agent");
        let handles = {
            let mut routines = self.lock_routines();
            // 进入 IDLE 只取消 token，不会失败
            let _ = self.apply_state(&mut routines, AgentState::Idle);
            routines.take_handles()
        };

        for handle in handles {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    tracing::error!(error = %e, "Background routine panicked");
                }
            }
        }

        self.inner.tasks.cancel_running().await;
        let removed = self.inner.registry.unregister_all().await;
        tracing::info!(actions = removed, "Agent stopped");
    }

    // ---------- Action 管理 ----------

    pub async fn register_action(
        &self,
        name: &str,
        action: Arc<dyn Action>,
        config: &ActionConfig,
    ) -> Result<(), AgentError> {
        self.inner.registry.register(name, action, config).await
    }

    pub async fn unregister_action(&self, name: &str) -> bool {
        self.inner.registry.unregister(name).await
    }

    pub async fn has_action(&self, name: &str) -> bool {
        self.inner.registry.contains(name).await
    }

    pub async fn action_names(&self) -> Vec<String> {
        self.inner.registry.names().await
    }

    pub async fn action_descriptions(&self) -> Vec<(String, String)> {
        self.inner.registry.descriptions().await
    }

    pub async fn action_metadata(&self, name: &str) -> Option<ActionMetadata> {
        self.inner.registry.metadata(name).await
    }

    /// 执行单个 Action；未注册、失败乃至 panic 都以失败结果返回
    pub async fn execute_action(
        &self,
        name: &str,
        input: Option<Value>,
        config: Option<ActionConfig>,
    ) -> ActionResult {
        let start = Instant::now();
        let action = match self.inner.registry.lookup(name).await {
            Ok(action) => action,
            Err(e) => {
                tracing::warn!(action = %name, "Action not registered");
                return ActionResult::failure(e).with_elapsed(start);
            }
        };

        let ctx = ActionContext::new(self.state(), self.inner.shared.clone())
            .with_input(input)
            .with_config(config.unwrap_or_default());

        tracing::debug!(action = %name, "Executing action");
        match std::panic::AssertUnwindSafe(action.execute(ctx))
            .catch_unwind()
            .await
        {
            Ok(result) => {
                if let Some(ref e) = result.error {
                    tracing::warn!(action = %name, error = %e, "Action reported failure");
                }
                result
            }
            Err(_) => {
                tracing::error!(action = %name, "Action panicked during execution");
                ActionResult::failure(AgentError::Execution(format!("action '{name}' panicked")))
                    .with_elapsed(start)
            }
        }
    }

    /// 顺序执行，上一步 output 作为下一步 input；遇到第一个失败即停止
    pub async fn execute_action_chain(&self, names: &[&str], input: Option<Value>) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(names.len());
        let mut current = input;

        for name in names {
            let result = self.execute_action(name, current.take(), None).await;
            let success = result.success;
            current = result.output.clone();
            results.push(result);
            if !success {
                tracing::warn!(action = %name, completed = results.len(), "Action chain halted");
                break;
            }
        }
        results
    }

    // ---------- 任务 ----------

    pub async fn add_task(&self, task: Task) -> Result<TaskId, AgentError> {
        self.inner.tasks.add_task(task).await
    }

    // ---------- 告警流程 ----------

    /// 紧急情况处理：ALERT → alert / speak → RESPONDING → 冷却 → PATROLLING
    ///
    /// 只在 PATROLLING 下生效；冷却期间巡逻循环被占用，新的紧急情况不会被检测到。
    /// stop 会打断冷却。
    pub async fn handle_emergency(&self, description: &str, payload: Value) {
        match self.transition(AgentState::Patrolling, AgentState::Alert) {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(state = %self.state(), "Not patrolling, emergency dropped");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to enter alert state");
                return;
            }
        }
        tracing::warn!(description = %description, "Emergency detected");
        self.emit(AgentEvent::EmergencyDetected {
            description: description.to_string(),
        });

        if self.has_action("alert").await {
            let result = self.execute_action("alert", Some(payload), None).await;
            self.report_outcome("alert", &result);
        }
        if self.state() != AgentState::Alert {
            tracing::info!(state = %self.state(), "Alert interrupted, skipping speech");
            return;
        }
        if self.has_action("speak").await {
            let text = self.inner.settings.alert_speech(description);
            let result = self.execute_action("speak", Some(Value::String(text)), None).await;
            self.report_outcome("speak", &result);
        }

        let token = match self.transition_with_token(AgentState::Alert, AgentState::Responding) {
            Ok(Some(token)) => token,
            Ok(None) => return,
            Err(e) => {
                tracing::error!(error = %e, "Failed to enter responding state");
                return;
            }
        };
        tokio::select! {
            _ = token.cancelled() => {
                tracing::info!("Cool-down interrupted by shutdown");
                return;
            }
            _ = tokio::time::sleep(self.inner.settings.cooldown) => {}
        }

        if let Err(e) = self.transition(AgentState::Responding, AgentState::Patrolling) {
            tracing::error!(error = %e, "Failed to resume patrol");
        }
    }

    fn report_outcome(&self, action: &str, result: &ActionResult) {
        if result.success {
            tracing::info!(action = %action, "Emergency action completed");
            return;
        }
        let reason = result
            .error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".into());
        tracing::error!(action = %action, error = %reason, "Emergency action failed");
        self.emit(AgentEvent::ActionFailed {
            action: action.to_string(),
            reason,
        });
    }
}
