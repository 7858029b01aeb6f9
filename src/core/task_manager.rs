//! 任务管理器：待执行队列 + 运行中句柄 + 超时监管
//!
//! 每个节拍（默认 1 秒）依次执行两项职责：
//! 1. 分发：把未超时的 Pending 任务切到 Running 并 spawn 其回调，随即移出待执行队列；
//! 2. 监管：唯一的超时判定点。超龄的 Pending / Running 任务标记为 Timeout（运行中的句柄 abort），
//!    并回收已自然结束的句柄；进入终态超过保留时间的记录被清除。
//!
//! 分发阶段跳过已超龄的任务而不做标记，所以同一任务至多被标记一次 Timeout。
//! 任务状态单调：Pending → Running → {Completed | Failed | Timeout | Cancelled}，不会回退。

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::{AgentError, AgentEvent};

/// 任务 ID
pub type TaskId = String;

pub type TaskFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;
type TaskCallback = Box<dyn FnOnce(TaskInfo) -> TaskFuture + Send>;

/// 任务默认超时
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(60);

/// 终态任务记录默认保留时间
pub const DEFAULT_TASK_RETENTION: Duration = Duration::from_secs(300);

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// 等待分发
    Pending,
    /// 正在执行
    Running,
    /// 回调返回 Ok
    Completed,
    /// 回调返回 Err
    Failed,
    /// 超过 timeout
    Timeout,
    /// 管理器停止时被取消
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending | TaskStatus::Running)
    }

    /// 合法的状态推进
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Timeout)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Timeout)
                | (Running, Cancelled)
        )
    }
}

/// 传给回调的任务标识
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
}

/// 待提交的任务：名称、回调、超时（未设置时用管理器默认值）
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub timeout: Option<Duration>,
    created: Instant,
    callback: TaskCallback,
}

impl Task {
    pub fn new<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: FnOnce(TaskInfo) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            created_at: Utc::now(),
            timeout: None,
            created: Instant::now(),
            callback: Box::new(move |info| Box::pin(callback(info))),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_id(mut self, id: impl Into<TaskId>) -> Self {
        self.id = id.into();
        self
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("created_at", &self.created_at)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// 对外暴露的任务快照
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub timeout_secs: f64,
    pub error: Option<String>,
}

struct TaskRecord {
    info: TaskInfo,
    status: TaskStatus,
    created: Instant,
    created_at: DateTime<Utc>,
    timeout: Duration,
    error: Option<String>,
    callback: Option<TaskCallback>,
    /// 进入终态的时刻
    finished: Option<Instant>,
}

impl TaskRecord {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created) > self.timeout
    }

    fn is_stale(&self, now: Instant, retention: Duration) -> bool {
        self.finished
            .is_some_and(|at| now.saturating_duration_since(at) >= retention)
    }
}

#[derive(Default)]
struct TaskTable {
    records: HashMap<TaskId, TaskRecord>,
    pending: VecDeque<TaskId>,
    running: HashMap<TaskId, JoinHandle<()>>,
}

impl TaskTable {
    /// 单调推进状态；非法推进返回 false 且不做修改
    fn transition(
        &mut self,
        id: &str,
        next: TaskStatus,
        error: Option<String>,
        events: &broadcast::Sender<AgentEvent>,
    ) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };
        if !record.status.can_transition_to(next) {
            return false;
        }
        record.status = next;
        if error.is_some() {
            record.error = error;
        }
        if next.is_terminal() {
            record.finished = Some(Instant::now());
            let _ = events.send(AgentEvent::TaskFinished {
                task_id: id.to_string(),
                status: next,
            });
        }
        true
    }
}

/// 任务管理器
pub struct TaskManager {
    table: Arc<Mutex<TaskTable>>,
    tick: Duration,
    default_timeout: Duration,
    retention: Duration,
    events: broadcast::Sender<AgentEvent>,
}

impl TaskManager {
    pub fn new(tick: Duration, default_timeout: Duration) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            table: Arc::new(Mutex::new(TaskTable::default())),
            tick,
            default_timeout,
            retention: DEFAULT_TASK_RETENTION,
            events,
        }
    }

    /// 终态记录保留多久后由监管阶段清除
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// 共用外部事件通道
    pub fn with_events(mut self, events: broadcast::Sender<AgentEvent>) -> Self {
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    /// 加入待执行队列；ID 与仍存在的任务重复时拒绝
    pub async fn add_task(&self, task: Task) -> Result<TaskId, AgentError> {
        let mut table = self.table.lock().await;
        if table.records.contains_key(&task.id) {
            return Err(AgentError::Execution(format!("duplicate task id: {}", task.id)));
        }
        let id = task.id.clone();
        let timeout = task.timeout.unwrap_or(self.default_timeout);
        tracing::info!(task_id = %id, name = %task.name, timeout_secs = timeout.as_secs_f64(), "Adding task to queue");
        table.records.insert(
            id.clone(),
            TaskRecord {
                info: TaskInfo {
                    id: id.clone(),
                    name: task.name,
                },
                status: TaskStatus::Pending,
                created: task.created,
                created_at: task.created_at,
                timeout,
                error: None,
                callback: Some(task.callback),
                finished: None,
            },
        );
        table.pending.push_back(id.clone());
        Ok(id)
    }

    /// 主循环：每个节拍分发 + 监管；取消后不再开始新节拍，并取消所有运行中的任务
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        tracing::info!(tick_ms = self.tick.as_millis() as u64, "Task manager started");
        loop {
            if token.is_cancelled() {
                break;
            }
            self.run_cycle().await;
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
        let cancelled = self.cancel_running().await;
        tracing::info!(cancelled, "Task manager stopped");
    }

    /// 执行一个节拍
    pub async fn run_cycle(&self) {
        let mut table = self.table.lock().await;
        let now = Instant::now();
        self.dispatch(&mut table, now);
        self.supervise(&mut table, now);
    }

    fn dispatch(&self, table: &mut TaskTable, now: Instant) {
        let queue = std::mem::take(&mut table.pending);
        let mut still_pending = VecDeque::new();

        for id in queue {
            let Some(record) = table.records.get_mut(&id) else {
                continue;
            };
            if record.status != TaskStatus::Pending {
                continue;
            }
            if record.is_expired(now) {
                // 由 supervise 统一标记超时
                still_pending.push_back(id);
                continue;
            }
            let Some(callback) = record.callback.take() else {
                continue;
            };
            let info = record.info.clone();
            if !table.transition(&id, TaskStatus::Running, None, &self.events) {
                continue;
            }
            tracing::info!(task_id = %id, name = %info.name, "Starting task");

            let shared = Arc::clone(&self.table);
            let events = self.events.clone();
            let handle = tokio::spawn(async move {
                let task_id = info.id.clone();
                let outcome = callback(info).await;
                let mut table = shared.lock().await;
                let (status, error) = match outcome {
                    Ok(()) => (TaskStatus::Completed, None),
                    Err(e) => (TaskStatus::Failed, Some(e)),
                };
                if table.transition(&task_id, status, error, &events) {
                    tracing::info!(task_id = %task_id, ?status, "Task finished");
                }
            });
            table.running.insert(id, handle);
        }

        table.pending = still_pending;
    }

    fn supervise(&self, table: &mut TaskTable, now: Instant) {
        let expired: Vec<TaskId> = table
            .records
            .iter()
            .filter(|(_, r)| !r.status.is_terminal() && r.is_expired(now))
            .map(|(id, _)| id.clone())
            .collect();

        for id in expired {
            if let Some(handle) = table.running.remove(&id) {
                tracing::warn!(task_id = %id, "Cancelling timed out task");
                handle.abort();
            } else {
                tracing::warn!(task_id = %id, "Task timed out before dispatch");
            }
            table.pending.retain(|p| p != &id);
            let reason = AgentError::Timeout(format!("task '{id}' exceeded its deadline")).to_string();
            table.transition(&id, TaskStatus::Timeout, Some(reason), &self.events);
            if let Some(record) = table.records.get_mut(&id) {
                record.callback = None;
            }
        }

        let finished: Vec<TaskId> = table
            .running
            .iter()
            .filter(|(_, h)| h.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in finished {
            table.running.remove(&id);
            // 回调 panic 时包装任务来不及写状态
            if table.transition(&id, TaskStatus::Failed, Some("task aborted unexpectedly".into()), &self.events) {
                tracing::error!(task_id = %id, "Task ended without reporting a result");
            }
        }

        let retention = self.retention;
        let before = table.records.len();
        let TaskTable { records, running, .. } = table;
        // 句柄尚未回收的记录留到下个节拍
        records.retain(|id, r| running.contains_key(id) || !r.is_stale(now, retention));
        let purged = before - records.len();
        if purged > 0 {
            tracing::debug!(purged, "Purged finished task records");
        }
    }

    /// 取消所有运行中的任务（Pending 任务保留原状态）；返回取消数量
    pub async fn cancel_running(&self) -> usize {
        let mut table = self.table.lock().await;
        let running: Vec<(TaskId, JoinHandle<()>)> = table.running.drain().collect();
        let count = running.len();
        for (id, handle) in running {
            handle.abort();
            let reason = AgentError::Cancelled(format!("task '{id}'")).to_string();
            table.transition(&id, TaskStatus::Cancelled, Some(reason), &self.events);
        }
        if count > 0 {
            tracing::info!(count, "Cancelled running tasks");
        }
        count
    }

    pub async fn status(&self, id: &str) -> Option<TaskStatus> {
        self.table.lock().await.records.get(id).map(|r| r.status)
    }

    pub async fn snapshot(&self) -> Vec<TaskSnapshot> {
        let table = self.table.lock().await;
        let mut list: Vec<TaskSnapshot> = table
            .records
            .values()
            .map(|r| TaskSnapshot {
                id: r.info.id.clone(),
                name: r.info.name.clone(),
                status: r.status,
                created_at: r.created_at,
                timeout_secs: r.timeout.as_secs_f64(),
                error: r.error.clone(),
            })
            .collect();
        list.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        list
    }

    pub async fn pending_count(&self) -> usize {
        self.table.lock().await.pending.len()
    }

    pub async fn running_count(&self) -> usize {
        self.table.lock().await.running.len()
    }

    /// 清理已进入终态的任务记录；返回清理数量
    pub async fn purge_finished(&self) -> usize {
        let mut table = self.table.lock().await;
        let before = table.records.len();
        table.records.retain(|_, r| !r.status.is_terminal());
        before - table.records.len()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), DEFAULT_TASK_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> TaskManager {
        TaskManager::new(Duration::from_millis(20), Duration::from_secs(5))
    }

    #[test]
    fn test_status_monotonic() {
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::Running.can_transition_to(TaskStatus::Timeout));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Running));
        assert!(!TaskStatus::Timeout.can_transition_to(TaskStatus::Completed));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
    }

    #[tokio::test]
    async fn test_dispatch_and_complete() {
        let tm = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = tm
            .add_task(Task::new("ok", move |_info| async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .await
            .unwrap();
        assert_eq!(tm.status(&id).await, Some(TaskStatus::Pending));

        tm.run_cycle().await;
        assert_eq!(tm.pending_count().await, 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tm.run_cycle().await;

        assert_eq!(tm.status(&id).await, Some(TaskStatus::Completed));
        assert_eq!(tm.running_count().await, 0);
        // 再跑一个节拍也不会重复分发
        tm.run_cycle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_callback() {
        let tm = manager();
        let id = tm
            .add_task(Task::new("bad", |_info| async { Err("boom".to_string()) }))
            .await
            .unwrap();
        tm.run_cycle().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        tm.run_cycle().await;

        assert_eq!(tm.status(&id).await, Some(TaskStatus::Failed));
        let snap = tm.snapshot().await;
        assert_eq!(snap[0].error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_running_task_timeout_aborts_handle() {
        let tm = manager();
        let finished = Arc::new(AtomicUsize::new(0));
        let f = finished.clone();
        let id = tm
            .add_task(
                Task::new("slow", move |_info| async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    f.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .with_timeout(Duration::from_millis(100)),
            )
            .await
            .unwrap();

        tm.run_cycle().await;
        assert_eq!(tm.status(&id).await, Some(TaskStatus::Running));

        tokio::time::sleep(Duration::from_millis(150)).await;
        tm.run_cycle().await;
        assert_eq!(tm.status(&id).await, Some(TaskStatus::Timeout));
        assert_eq!(tm.running_count().await, 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_pending_task_never_dispatched() {
        let tm = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let id = tm
            .add_task(
                Task::new("late", move |_info| async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .with_timeout(Duration::from_millis(10)),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        tm.run_cycle().await;

        assert_eq!(tm.status(&id).await, Some(TaskStatus::Timeout));
        assert_eq!(tm.pending_count().await, 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_event_emitted_once() {
        let tm = manager();
        let mut events = tm.subscribe();
        let id = tm
            .add_task(
                Task::new("slow", |_info| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })
                .with_timeout(Duration::from_millis(30)),
            )
            .await
            .unwrap();

        tm.run_cycle().await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        tm.run_cycle().await;
        tm.run_cycle().await;

        let mut timeouts = 0;
        while let Ok(event) = events.try_recv() {
            if let AgentEvent::TaskFinished { task_id, status } = event {
                assert_eq!(task_id, id);
                assert_eq!(status, TaskStatus::Timeout);
                timeouts += 1;
            }
        }
        assert_eq!(timeouts, 1);
    }

    #[tokio::test]
    async fn test_cancel_running_keeps_pending() {
        let tm = manager();
        let running = tm
            .add_task(Task::new("long", |_info| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }))
            .await
            .unwrap();
        tm.run_cycle().await;

        let queued = tm
            .add_task(Task::new("queued", |_info| async { Ok(()) }))
            .await
            .unwrap();

        assert_eq!(tm.cancel_running().await, 1);
        assert_eq!(tm.status(&running).await, Some(TaskStatus::Cancelled));
        assert_eq!(tm.status(&queued).await, Some(TaskStatus::Pending));
        assert_eq!(tm.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected_and_purge() {
        let tm = manager();
        tm.add_task(Task::new("a", |_info| async { Ok(()) }).with_id("job-1"))
            .await
            .unwrap();
        let err = tm
            .add_task(Task::new("b", |_info| async { Ok(()) }).with_id("job-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Execution(_)));

        tm.run_cycle().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        tm.run_cycle().await;
        assert_eq!(tm.status("job-1").await, Some(TaskStatus::Completed));

        assert_eq!(tm.purge_finished().await, 1);
        assert_eq!(tm.status("job-1").await, None);
    }

    #[tokio::test]
    async fn test_run_loop_exits_on_cancel() {
        let tm = Arc::new(manager());
        let token = CancellationToken::new();
        let handle = tokio::spawn(Arc::clone(&tm).run(token.clone()));

        let id = tm
            .add_task(Task::new("long", |_info| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(tm.status(&id).await, Some(TaskStatus::Running));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("task manager did not stop")
            .unwrap();
        assert_eq!(tm.status(&id).await, Some(TaskStatus::Cancelled));
        assert_eq!(tm.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_finished_records_dropped_after_retention() {
        let tm = manager().with_retention(Duration::from_millis(100));
        let done = tm
            .add_task(Task::new("quick", |_info| async { Ok(()) }))
            .await
            .unwrap();
        let long = tm
            .add_task(Task::new("long", |_info| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }))
            .await
            .unwrap();

        tm.run_cycle().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        tm.run_cycle().await;
        assert_eq!(tm.status(&done).await, Some(TaskStatus::Completed));

        tokio::time::sleep(Duration::from_millis(120)).await;
        tm.run_cycle().await;
        assert_eq!(tm.status(&done).await, None);
        // 未结束的任务不受保留时间影响
        assert_eq!(tm.status(&long).await, Some(TaskStatus::Running));
        assert_eq!(tm.snapshot().await.len(), 1);

        tm.cancel_running().await;
    }

    #[tokio::test]
    async fn test_snapshot_serializes() {
        let tm = manager();
        tm.add_task(Task::new("report", |_info| async { Ok(()) }).with_id("job-7"))
            .await
            .unwrap();

        let value = serde_json::to_value(tm.snapshot().await).unwrap();
        assert_eq!(value[0]["id"], "job-7");
        assert_eq!(value[0]["status"], "pending");
        assert_eq!(value[0]["timeout_secs"], 5.0);
        assert!(value[0]["created_at"].is_string());
    }
}
