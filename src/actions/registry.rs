//! Action 注册表
//!
//! 按名称存储已初始化的 Arc<dyn Action> 与其元信息；register 先初始化新实例，
//! 成功后清理同名旧实例（恰好一次），再让新实例生效。
//! register / unregister 由 lifecycle 互斥锁整体串行化；map 的读写锁只在短临界区内持有，
//! 所以 initialize / cleanup 期间 lookup 不受阻塞。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use crate::actions::{Action, ActionConfig, ActionMetadata};
use crate::core::AgentError;

struct RegisteredAction {
    action: Arc<dyn Action>,
    metadata: ActionMetadata,
}

/// Action 注册表：register / unregister / lookup / names
#[derive(Default)]
pub struct ActionRegistry {
    actions: RwLock<HashMap<String, RegisteredAction>>,
    lifecycle: Mutex<()>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 初始化并注册；初始化失败返回 Initialization 错误，原有同名实例保持不变
    pub async fn register(
        &self,
        name: &str,
        action: Arc<dyn Action>,
        config: &ActionConfig,
    ) -> Result<(), AgentError> {
        let _lifecycle = self.lifecycle.lock().await;
        tracing::info!(action = %name, "Registering action");

        if let Err(e) = action.initialize(config).await {
            tracing::error!(action = %name, error = %e, "Failed to register action");
            return Err(match e {
                AgentError::Initialization { .. } => e,
                other => AgentError::initialization(name, other.to_string()),
            });
        }

        let previous = self.actions.write().await.remove(name);
        if let Some(previous) = previous {
            tracing::info!(action = %name, "Replacing existing action, cleaning up old instance");
            previous.action.cleanup().await;
        }

        let metadata = action.metadata();
        self.actions
            .write()
            .await
            .insert(name.to_string(), RegisteredAction { action, metadata });

        tracing::info!(action = %name, "Action registered successfully");
        Ok(())
    }

    /// 注销并清理；不存在时什么也不做
    pub async fn unregister(&self, name: &str) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        let removed = self.actions.write().await.remove(name);
        match removed {
            Some(entry) => {
                tracing::info!(action = %name, "Unregistering action");
                entry.action.cleanup().await;
                tracing::info!(action = %name, "Action unregistered");
                true
            }
            None => false,
        }
    }

    /// 注销全部 Action；调用方需保证此时没有执行中的 Action
    pub async fn unregister_all(&self) -> usize {
        let _lifecycle = self.lifecycle.lock().await;
        let drained: Vec<(String, RegisteredAction)> =
            self.actions.write().await.drain().collect();
        let count = drained.len();
        for (name, entry) in drained {
            tracing::info!(action = %name, "Unregistering action");
            entry.action.cleanup().await;
        }
        count
    }

    pub async fn lookup(&self, name: &str) -> Result<Arc<dyn Action>, AgentError> {
        self.actions
            .read()
            .await
            .get(name)
            .map(|entry| Arc::clone(&entry.action))
            .ok_or_else(|| AgentError::NotRegistered(name.to_string()))
    }

    pub async fn metadata(&self, name: &str) -> Option<ActionMetadata> {
        self.actions
            .read()
            .await
            .get(name)
            .map(|entry| entry.metadata.clone())
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.actions.read().await.contains_key(name)
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.actions.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 返回 (name, description) 列表，按名称排序
    pub async fn descriptions(&self) -> Vec<(String, String)> {
        let mut list: Vec<(String, String)> = self
            .actions
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), entry.metadata.description.clone()))
            .collect();
        list.sort();
        list
    }

    pub async fn len(&self) -> usize {
        self.actions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.actions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionContext, ActionResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    struct CountingAction {
        fail_init: bool,
        initialized: AtomicBool,
        cleanups: Arc<AtomicUsize>,
        /// 设置后 cleanup 会等待放行
        cleanup_gate: Option<Arc<Notify>>,
    }

    impl CountingAction {
        fn new(cleanups: Arc<AtomicUsize>) -> Self {
            Self {
                fail_init: false,
                initialized: AtomicBool::new(false),
                cleanups,
                cleanup_gate: None,
            }
        }
    }

    #[async_trait]
    impl Action for CountingAction {
        fn metadata(&self) -> ActionMetadata {
            ActionMetadata::new("counting", "counts cleanups")
        }

        async fn initialize(&self, _config: &ActionConfig) -> Result<(), AgentError> {
            if self.fail_init {
                return Err(AgentError::Execution("no device".into()));
            }
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, _ctx: ActionContext) -> ActionResult {
            ActionResult::success(json!("ok"))
        }

        async fn cleanup(&self) {
            if let Some(gate) = &self.cleanup_gate {
                gate.notified().await;
            }
            self.initialized.store(false, Ordering::SeqCst);
            self.cleanups.fetch_add(1, Ordering::SeqCst);
        }

        fn is_initialized(&self) -> bool {
            self.initialized.load(Ordering::SeqCst)
        }
    }

    #[tokio::test]
    async fn test_reregister_cleans_up_previous_once() {
        let registry = ActionRegistry::new();
        let old_cleanups = Arc::new(AtomicUsize::new(0));
        let new_cleanups = Arc::new(AtomicUsize::new(0));

        let old: Arc<dyn Action> = Arc::new(CountingAction::new(old_cleanups.clone()));
        registry.register("watch", old.clone(), &ActionConfig::new()).await.unwrap();

        let new: Arc<dyn Action> = Arc::new(CountingAction::new(new_cleanups.clone()));
        registry.register("watch", new.clone(), &ActionConfig::new()).await.unwrap();

        assert_eq!(old_cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(new_cleanups.load(Ordering::SeqCst), 0);
        assert!(!old.is_initialized());
        assert_eq!(registry.len().await, 1);

        let active = registry.lookup("watch").await.unwrap();
        assert!(Arc::ptr_eq(&active, &new));
    }

    #[tokio::test]
    async fn test_failed_initialize_not_stored() {
        let registry = ActionRegistry::new();
        let cleanups = Arc::new(AtomicUsize::new(0));
        let action = CountingAction {
            fail_init: true,
            ..CountingAction::new(cleanups)
        };

        let err = registry
            .register("watch", Arc::new(action), &ActionConfig::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Initialization { .. }));
        assert!(registry.is_empty().await);
        assert!(matches!(
            registry.lookup("watch").await,
            Err(AgentError::NotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_unregister_absent_is_noop() {
        let registry = ActionRegistry::new();
        assert!(!registry.unregister("missing").await);

        let cleanups = Arc::new(AtomicUsize::new(0));
        registry
            .register("a", Arc::new(CountingAction::new(cleanups.clone())), &ActionConfig::new())
            .await
            .unwrap();
        registry
            .register("b", Arc::new(CountingAction::new(cleanups.clone())), &ActionConfig::new())
            .await
            .unwrap();
        assert_eq!(registry.names().await, vec!["a".to_string(), "b".to_string()]);

        assert_eq!(registry.unregister_all().await, 2);
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_overlapping_reregistration_cleans_every_displaced_instance() {
        let registry = Arc::new(ActionRegistry::new());
        let gate = Arc::new(Notify::new());
        let old_cleanups = Arc::new(AtomicUsize::new(0));
        let a_cleanups = Arc::new(AtomicUsize::new(0));
        let b_cleanups = Arc::new(AtomicUsize::new(0));

        let old = CountingAction {
            cleanup_gate: Some(gate.clone()),
            ..CountingAction::new(old_cleanups.clone())
        };
        registry.register("watch", Arc::new(old), &ActionConfig::new()).await.unwrap();

        // A 替换旧实例，旧实例的 cleanup 被卡住
        let a: Arc<dyn Action> = Arc::new(CountingAction::new(a_cleanups.clone()));
        let reg = registry.clone();
        let a_task = tokio::spawn(async move { reg.register("watch", a, &ActionConfig::new()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // B 在 A 尚未完成时发起替换
        let b: Arc<dyn Action> = Arc::new(CountingAction::new(b_cleanups.clone()));
        let reg = registry.clone();
        let b_clone = b.clone();
        let b_task = tokio::spawn(async move { reg.register("watch", b_clone, &ActionConfig::new()).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        gate.notify_one();
        a_task.await.unwrap().unwrap();
        b_task.await.unwrap().unwrap();

        assert_eq!(old_cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(a_cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(b_cleanups.load(Ordering::SeqCst), 0);
        assert_eq!(registry.len().await, 1);
        let active = registry.lookup("watch").await.unwrap();
        assert!(Arc::ptr_eq(&active, &b));
        assert!(active.is_initialized());
    }
}
